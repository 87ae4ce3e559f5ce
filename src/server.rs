//! Component C4: the server connection manager. Grounded on
//! `Http::Server`/`Http::Server::Impl` in the original `Server.cpp` —
//! per-connection reassembly and pipelining, resource-space routing, the
//! reaper thread's two-phase teardown, and the canned 400/404 responses.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;

use bstr::ByteSlice;

use crate::config::{Config, ConfigMap};
use crate::request::{Request, State as RequestState};
use crate::resource_space::{Handler, ResourceSpace};
use crate::response::Response;
use crate::serializer::serialize_response;
use crate::transport::{Connection, ServerTransport};

const NOT_FOUND_RESPONSE: &[u8] =
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 13\r\nContent-Type: text/plain\r\n\r\nFeelsBadMan\r\n";
const BAD_REQUEST_RESPONSE: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 13\r\nContent-Type: text/plain\r\n\r\nFeelsBadMan\r\n";

struct ConnectionState {
    id: u64,
    connection: Arc<dyn Connection>,
    reassembly_buffer: Mutex<Vec<u8>>,
    next_request: Mutex<Request>,
}

struct Shared {
    config: Config,
    config_map: ConfigMap,
    transport: Option<Arc<dyn ServerTransport>>,
    resources: ResourceSpace,
    active_connections: HashMap<u64, Arc<ConnectionState>>,
    broken_connections: Vec<Arc<ConnectionState>>,
    stop_reaper: bool,
    next_connection_id: u64,
}

impl Shared {
    fn new() -> Self {
        let config = Config::default();
        let config_map = ConfigMap::from_config(&config);
        Self {
            config,
            config_map,
            transport: None,
            resources: ResourceSpace::new(),
            active_connections: HashMap::new(),
            broken_connections: Vec::new(),
            stop_reaper: false,
            next_connection_id: 0,
        }
    }
}

/// The server's registration token for `register_resource`; redeeming it
/// (`unregister_resource`) removes the leaf and collapses the ancestor
/// chain.
pub struct Unregister {
    registration: crate::resource_space::Registration,
    server: Weak<Mutex<Shared>>,
}

impl Unregister {
    pub fn unregister(self) {
        if let Some(shared) = self.server.upgrade() {
            shared.lock().unwrap().resources.unregister(self.registration);
        }
    }
}

/// The server connection manager.
pub struct ServerCore {
    shared: Arc<Mutex<Shared>>,
    reaper_wake: Arc<Condvar>,
    reaper: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Default for ServerCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCore {
    pub fn new() -> Self {
        let shared = Arc::new(Mutex::new(Shared::new()));
        let reaper_wake = Arc::new(Condvar::new());

        let reaper_shared = Arc::clone(&shared);
        let reaper_wake_clone = Arc::clone(&reaper_wake);
        let handle = thread::spawn(move || Self::reap(reaper_shared, reaper_wake_clone));

        Self { shared, reaper_wake, reaper: Mutex::new(Some(handle)) }
    }

    /// Binds `transport` to `port` and installs the new-connection
    /// callback. Returns `false` on bind failure.
    pub fn mobilize(&self, transport: Arc<dyn ServerTransport>, port: u16) -> bool {
        let shared_for_callback = Arc::clone(&self.shared);
        let bound = transport.bind(
            port,
            Box::new(move |connection: Arc<dyn Connection>| {
                Self::new_connection(&shared_for_callback, connection);
            }),
        );
        let mut shared = self.shared.lock().unwrap();
        if bound {
            shared.transport = Some(transport);
        }
        bound
    }

    /// Releases the transport. Idempotent.
    pub fn demobilize(&self) {
        let transport = {
            let mut shared = self.shared.lock().unwrap();
            shared.transport.take()
        };
        if let Some(transport) = transport {
            transport.release();
        }
    }

    /// Registers `handler` at the exact path `segments`. Returns `None` if
    /// a conflicting registration exists.
    pub fn register_resource(&self, segments: &[String], handler: Handler) -> Option<Unregister> {
        let mut shared = self.shared.lock().unwrap();
        let registration = shared.resources.register(segments, handler)?;
        Some(Unregister { registration, server: Arc::downgrade(&self.shared) })
    }

    /// A synchronous wrapper over C2 for testing.
    pub fn parse_request(&self, raw: &[u8]) -> Option<Request> {
        let (request, _end) = self.parse_request_with_end(raw);
        request
    }

    pub fn parse_request_with_end(&self, raw: &[u8]) -> (Option<Request>, usize) {
        let shared = self.shared.lock().unwrap();
        let host = shared.config.host.clone().unwrap_or_default();
        let limit = shared.config.header_line_limit;
        drop(shared);
        let mut request = Request::new();
        let end = request.parse_next_with_host(raw, limit, host.as_bytes());
        if request.is_complete_or_error() {
            (Some(request), end)
        } else {
            (None, end)
        }
    }

    pub fn configuration_item(&self, key: &str) -> String {
        self.shared.lock().unwrap().config_map.get(key)
    }

    /// Setting `"HeaderLineLimit"` has the side effect of updating the
    /// live limit; setting `"host"` updates the Host-validation target.
    pub fn set_configuration_item(&self, key: &str, value: &str) {
        let mut shared = self.shared.lock().unwrap();
        if let Some(new_limit) = shared.config_map.set(key, value) {
            shared.config.header_line_limit = new_limit;
        }
        if key == "host" {
            shared.config.host = if value.is_empty() { None } else { Some(value.to_string()) };
        }
    }

    fn new_connection(shared: &Arc<Mutex<Shared>>, connection: Arc<dyn Connection>) {
        log::debug!("new connection from {}", connection.peer_id());
        let mut guard = shared.lock().unwrap();
        let id = guard.next_connection_id;
        guard.next_connection_id = guard.next_connection_id.wrapping_add(1);
        let connection_state = Arc::new(ConnectionState {
            id,
            connection: Arc::clone(&connection),
            reassembly_buffer: Mutex::new(Vec::new()),
            next_request: Mutex::new(Request::new()),
        });
        guard.active_connections.insert(id, Arc::clone(&connection_state));
        drop(guard);

        let data_shared = Arc::clone(shared);
        let data_state: Weak<ConnectionState> = Arc::downgrade(&connection_state);
        connection.set_data_received_callback(Box::new(move |data: Vec<u8>| {
            if let Some(state) = data_state.upgrade() {
                Self::data_received(&data_shared, &state, data);
            }
        }));

        let broken_shared = Arc::clone(shared);
        let broken_state: Weak<ConnectionState> = Arc::downgrade(&connection_state);
        connection.set_broken_callback(Box::new(move |_graceful: bool| {
            if let Some(state) = broken_state.upgrade() {
                Self::connection_broken(&broken_shared, &state);
            }
        }));
    }

    /// Reassembles and dispatches as many complete requests as the
    /// connection's buffer now holds, supporting pipelining within a
    /// single callback.
    fn data_received(shared: &Arc<Mutex<Shared>>, state: &Arc<ConnectionState>, data: Vec<u8>) {
        let mut guard = shared.lock().unwrap();
        {
            let mut buffer = state.reassembly_buffer.lock().unwrap();
            buffer.extend_from_slice(&data);
        }

        loop {
            let host = guard.config.host.clone().unwrap_or_default();
            let limit = guard.config.header_line_limit;

            let request = {
                let mut buffer = state.reassembly_buffer.lock().unwrap();
                let mut next_request = state.next_request.lock().unwrap();
                let consumed = next_request.parse_next_with_host(&buffer, limit, host.as_bytes());
                buffer.drain(..consumed);
                if !next_request.is_complete_or_error() {
                    break;
                }
                std::mem::replace(&mut *next_request, Request::new())
            };

            let (response, status_code, should_close) = if request.state == RequestState::Complete && request.valid {
                Self::route(&mut guard, &request)
            } else {
                let close_after = request.state == RequestState::Error;
                (BAD_REQUEST_RESPONSE.to_vec(), 400, close_after)
            };

            state.connection.send(&response);
            log::debug!("sent {} response to {}", status_code, state.connection.peer_id());

            let close_for_connection_header = request.state == RequestState::Complete
                && request
                    .headers
                    .get_multi_value("Connection")
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(b"close"));

            if should_close || close_for_connection_header {
                state.connection.close(true);
                break;
            }
            if request.state != RequestState::Complete {
                break;
            }
        }
    }

    fn route(shared: &mut Shared, request: &Request) -> (Vec<u8>, u16, bool) {
        let mut path = request.target.path.clone();
        if path.first().map(|s| s.is_empty()).unwrap_or(false) {
            path.remove(0);
        }
        match shared.resources.lookup(&path) {
            Some((handler, residual)) => {
                let mut routed = request.clone();
                routed.target.path = residual;
                let response = handler(&routed);
                (serialize_response(&response), response.status_code, false)
            }
            None => (NOT_FOUND_RESPONSE.to_vec(), 404, false),
        }
    }

    fn connection_broken(shared: &Arc<Mutex<Shared>>, state: &Arc<ConnectionState>) {
        log::debug!("connection to {} broken by peer", state.connection.peer_id());
        let mut guard = shared.lock().unwrap();
        if let Some(connection_state) = guard.active_connections.remove(&state.id) {
            guard.broken_connections.push(connection_state);
        }
        drop(guard);
    }

    /// Single background worker draining `broken_connections` outside the
    /// server lock, so a connection's own delegate can never be mid-call
    /// while its state is destroyed.
    fn reap(shared: Arc<Mutex<Shared>>, wake: Arc<Condvar>) {
        let mut guard = shared.lock().unwrap();
        loop {
            if guard.stop_reaper {
                return;
            }
            let doomed = std::mem::take(&mut guard.broken_connections);
            drop(guard);
            drop(doomed);
            guard = shared.lock().unwrap();
            guard = wake
                .wait_while(guard, |s| !s.stop_reaper && s.broken_connections.is_empty())
                .unwrap();
        }
    }
}

impl Drop for ServerCore {
    fn drop(&mut self) {
        self.demobilize();
        {
            let mut shared = self.shared.lock().unwrap();
            shared.stop_reaper = true;
        }
        self.reaper_wake.notify_all();
        if let Some(handle) = self.reaper.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// A fake client connection used to drive the server end-to-end, grounded
/// on `MockConnection` in the original `ServerTests.cpp`.
#[cfg(test)]
struct MockConnection {
    data_received_callback: Mutex<Option<Box<dyn Fn(Vec<u8>) + Send + Sync>>>,
    broken_callback: Mutex<Option<Box<dyn Fn(bool) + Send + Sync>>>,
    data_received: Mutex<Vec<u8>>,
    broken: Mutex<bool>,
}

#[cfg(test)]
impl MockConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            data_received_callback: Mutex::new(None),
            broken_callback: Mutex::new(None),
            data_received: Mutex::new(Vec::new()),
            broken: Mutex::new(false),
        })
    }

    fn deliver(&self, data: &[u8]) {
        if let Some(cb) = &*self.data_received_callback.lock().unwrap() {
            cb(data.to_vec());
        }
    }
}

#[cfg(test)]
impl Connection for MockConnection {
    fn peer_id(&self) -> String {
        "mock-peer".to_string()
    }

    fn set_data_received_callback(&self, callback: Box<dyn Fn(Vec<u8>) + Send + Sync>) {
        *self.data_received_callback.lock().unwrap() = Some(callback);
    }

    fn set_broken_callback(&self, callback: Box<dyn Fn(bool) + Send + Sync>) {
        *self.broken_callback.lock().unwrap() = Some(callback);
    }

    fn send(&self, data: &[u8]) {
        self.data_received.lock().unwrap().extend_from_slice(data);
    }

    fn close(&self, _clean: bool) {
        *self.broken.lock().unwrap() = true;
    }
}

/// Grounded on `MockTransport` in the original `ServerTests.cpp`: records
/// the bound port and hands back the new-connection callback so a test can
/// synthesize a connection on demand.
#[cfg(test)]
struct MockTransport {
    bound: Mutex<bool>,
    port: Mutex<u16>,
    new_connection_callback: Mutex<Option<Box<dyn Fn(Arc<dyn Connection>) + Send + Sync>>>,
}

#[cfg(test)]
impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self { bound: Mutex::new(false), port: Mutex::new(0), new_connection_callback: Mutex::new(None) })
    }

    fn accept(&self, connection: Arc<dyn Connection>) {
        if let Some(cb) = &*self.new_connection_callback.lock().unwrap() {
            cb(connection);
        }
    }
}

#[cfg(test)]
impl ServerTransport for MockTransport {
    fn bind(&self, port: u16, new_connection_callback: Box<dyn Fn(Arc<dyn Connection>) + Send + Sync>) -> bool {
        *self.bound.lock().unwrap() = true;
        *self.port.lock().unwrap() = port;
        *self.new_connection_callback.lock().unwrap() = Some(new_connection_callback);
        true
    }

    fn release(&self) {
        *self.bound.lock().unwrap() = false;
    }
}
