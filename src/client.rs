//! Component C5: the client connection manager. Grounded on
//! `Http::Client`/`Http::Client::Impl`/`TransactionImpl` in the original
//! `Client.cpp` — persistent-connection pooling keyed by `host:port`, the
//! housekeeper thread's idle-connection eviction, and
//! `Transaction::AwaitCompletion`'s condvar wait.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Duration;

use crate::config::{
    CONNECTION_POLLING_PERIOD_MILLISECONDS, DEFAULT_HEADER_LINE_LIMIT,
    DEFAULT_INACTIVITY_INTERVAL_SECONDS, DEFAULT_REQUEST_TIMEOUT_SECONDS,
};
use crate::request::Request;
use crate::response::{Response, State as ResponseState};
use crate::serializer::serialize_request;
use crate::transport::{ClientTransport, Connection, SystemTimeKeeper, TimeKeeper};

/// Handed ownership of the raw connection the instant a response signals a
/// protocol upgrade (status codes `[101, 200)`). Called at most once, and
/// never alongside the completion callback's normal pooling/closing.
pub type UpgradeCallback = Box<dyn FnOnce(Arc<dyn Connection>) + Send>;
pub type CompletionCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    InProgress,
    Completed,
    UnableToConnect,
    Broken,
    Timeout,
}

struct TransactionInner {
    state: TransactionState,
    response: Response,
}

/// One request/response exchange in flight on the client.
pub struct Transaction {
    inner: Mutex<TransactionInner>,
    wake: Condvar,
    completion_callback: Mutex<Option<CompletionCallback>>,
}

impl Transaction {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(TransactionInner { state: TransactionState::InProgress, response: Response::new() }),
            wake: Condvar::new(),
            completion_callback: Mutex::new(None),
        })
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().unwrap().state
    }

    pub fn response(&self) -> Response {
        self.inner.lock().unwrap().response.clone()
    }

    /// Registers a callback that fires exactly once, the instant this
    /// transaction leaves `InProgress`. If it already has, fires inline
    /// immediately instead of being silently dropped.
    pub fn set_completion_callback(&self, callback: CompletionCallback) {
        let already_done = {
            let inner = self.inner.lock().unwrap();
            inner.state != TransactionState::InProgress
        };
        if already_done {
            callback();
        } else {
            *self.completion_callback.lock().unwrap() = Some(callback);
        }
    }

    pub fn await_completion(&self) -> TransactionState {
        let inner = self.inner.lock().unwrap();
        let inner = self.wake.wait_while(inner, |i| i.state == TransactionState::InProgress).unwrap();
        inner.state
    }

    pub fn await_completion_timeout(&self, timeout: Duration) -> TransactionState {
        let inner = self.inner.lock().unwrap();
        let (inner, _timed_out) = self
            .wake
            .wait_timeout_while(inner, timeout, |i| i.state == TransactionState::InProgress)
            .unwrap();
        inner.state
    }

    fn complete(self: &Arc<Self>, state: TransactionState, response: Option<Response>) {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != TransactionState::InProgress {
                return;
            }
            inner.state = state;
            if let Some(response) = response {
                inner.response = response;
            }
            self.completion_callback.lock().unwrap().take()
        };
        self.wake.notify_all();
        if let Some(callback) = callback {
            callback();
        }
    }
}

struct PooledConnection {
    connection: Arc<dyn Connection>,
    idle_since: f64,
}

/// Per-transaction state threaded through a connection's callbacks. Holds
/// the connection strongly so the pool/in-flight map is its one owner;
/// the connection's own callback closures hold only a `Weak` back-reference
/// to this, the same non-owning-cycle shape `server.rs` uses.
struct ClientConnectionState {
    id: u64,
    connection: Mutex<Option<Arc<dyn Connection>>>,
    transaction: Arc<Transaction>,
    reassembly_buffer: Mutex<Vec<u8>>,
    next_response: Mutex<Response>,
    key: String,
    persist_connection: bool,
    upgrade_callback: Mutex<Option<UpgradeCallback>>,
    deadline: f64,
}

struct Shared {
    transport: Option<Arc<dyn ClientTransport>>,
    time_keeper: Arc<dyn TimeKeeper>,
    pool: HashMap<String, PooledConnection>,
    in_flight: HashMap<u64, Arc<ClientConnectionState>>,
    next_id: u64,
    stop_housekeeper: bool,
    request_timeout_seconds: f64,
    inactivity_interval_seconds: f64,
}

impl Shared {
    fn new() -> Self {
        Self {
            transport: None,
            time_keeper: Arc::new(SystemTimeKeeper::new()),
            pool: HashMap::new(),
            in_flight: HashMap::new(),
            next_id: 0,
            stop_housekeeper: false,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            inactivity_interval_seconds: DEFAULT_INACTIVITY_INTERVAL_SECONDS,
        }
    }
}

/// The client connection manager.
pub struct ClientCore {
    shared: Arc<Mutex<Shared>>,
    housekeeper_wake: Arc<Condvar>,
    housekeeper: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Default for ClientCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCore {
    pub fn new() -> Self {
        let shared = Arc::new(Mutex::new(Shared::new()));
        let wake = Arc::new(Condvar::new());
        let housekeeper_shared = Arc::clone(&shared);
        let housekeeper_wake = Arc::clone(&wake);
        let handle = thread::spawn(move || Self::housekeep(housekeeper_shared, housekeeper_wake));
        Self { shared, housekeeper_wake: wake, housekeeper: Mutex::new(Some(handle)) }
    }

    pub fn mobilize(&self, transport: Arc<dyn ClientTransport>, time_keeper: Arc<dyn TimeKeeper>) {
        let mut shared = self.shared.lock().unwrap();
        shared.transport = Some(transport);
        shared.time_keeper = time_keeper;
    }

    /// Drops the transport and every pooled connection. In-flight
    /// transactions are left to finish or time out on their own.
    pub fn demobilize(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.transport = None;
        shared.pool.clear();
    }

    pub fn set_request_timeout_seconds(&self, seconds: f64) {
        self.shared.lock().unwrap().request_timeout_seconds = seconds;
    }

    pub fn set_inactivity_interval_seconds(&self, seconds: f64) {
        self.shared.lock().unwrap().inactivity_interval_seconds = seconds;
    }

    /// A synchronous wrapper over the message parser, for testing.
    pub fn parse_response(&self, raw: &[u8]) -> Option<Response> {
        let mut response = Response::new();
        response.parse_next(raw, DEFAULT_HEADER_LINE_LIMIT);
        if response.is_complete_or_error() {
            Some(response)
        } else {
            None
        }
    }

    /// Sends `request` and returns a `Transaction` tracking it. Reuses a
    /// pooled connection to the same `host:port` when one is idle,
    /// enforcing at most one in-flight transaction per connection;
    /// otherwise opens a fresh connection via the mobilized transport.
    /// `persist_connection` controls whether the connection is returned to
    /// the pool afterward instead of being closed.
    pub fn request(
        &self,
        mut request: Request,
        persist_connection: bool,
        upgrade_callback: Option<UpgradeCallback>,
    ) -> Arc<Transaction> {
        let transaction = Transaction::new();

        let host = match request.target.host() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => {
                transaction.complete(TransactionState::UnableToConnect, None);
                return transaction;
            }
        };
        let port = request.target.port.unwrap_or(80);
        let key = format!("{}:{}", host, port);
        if !request.headers.has("Host") {
            request.headers.set("Host", &host);
        }
        if !persist_connection {
            request.headers.set("Connection", "Close");
        }
        let wire = serialize_request(&request);

        let mut shared = self.shared.lock().unwrap();
        let deadline = shared.time_keeper.now() + shared.request_timeout_seconds;
        let id = shared.next_id;
        shared.next_id = shared.next_id.wrapping_add(1);
        let pooled = shared.pool.remove(&key);
        let transport = shared.transport.clone();
        drop(shared);

        let state = Arc::new(ClientConnectionState {
            id,
            connection: Mutex::new(None),
            transaction: Arc::clone(&transaction),
            reassembly_buffer: Mutex::new(Vec::new()),
            next_response: Mutex::new(Response::new()),
            key,
            persist_connection,
            upgrade_callback: Mutex::new(upgrade_callback),
            deadline,
        });

        let connection = match pooled {
            Some(pooled) => {
                let connection = pooled.connection;
                Self::bind_callbacks(&self.shared, &state, &connection);
                connection
            }
            None => {
                let transport = match transport {
                    Some(t) => t,
                    None => {
                        transaction.complete(TransactionState::UnableToConnect, None);
                        return transaction;
                    }
                };
                let data_shared = Arc::clone(&self.shared);
                let data_state: Weak<ClientConnectionState> = Arc::downgrade(&state);
                let broken_shared = Arc::clone(&self.shared);
                let broken_state: Weak<ClientConnectionState> = Arc::downgrade(&state);
                let connected = transport.connect(
                    &host,
                    port,
                    Box::new(move |data: Vec<u8>| {
                        if let Some(state) = data_state.upgrade() {
                            Self::data_received(&data_shared, &state, data);
                        }
                    }),
                    Box::new(move |_graceful: bool| {
                        if let Some(state) = broken_state.upgrade() {
                            Self::connection_broken(&broken_shared, &state);
                        }
                    }),
                );
                match connected {
                    Some(connection) => connection,
                    None => {
                        transaction.complete(TransactionState::UnableToConnect, None);
                        return transaction;
                    }
                }
            }
        };

        *state.connection.lock().unwrap() = Some(Arc::clone(&connection));
        self.shared.lock().unwrap().in_flight.insert(id, state);
        connection.send(&wire);
        transaction
    }

    fn bind_callbacks(shared: &Arc<Mutex<Shared>>, state: &Arc<ClientConnectionState>, connection: &Arc<dyn Connection>) {
        let data_shared = Arc::clone(shared);
        let data_state: Weak<ClientConnectionState> = Arc::downgrade(state);
        connection.set_data_received_callback(Box::new(move |data: Vec<u8>| {
            if let Some(state) = data_state.upgrade() {
                Self::data_received(&data_shared, &state, data);
            }
        }));
        let broken_shared = Arc::clone(shared);
        let broken_state: Weak<ClientConnectionState> = Arc::downgrade(state);
        connection.set_broken_callback(Box::new(move |_graceful: bool| {
            if let Some(state) = broken_state.upgrade() {
                Self::connection_broken(&broken_shared, &state);
            }
        }));
    }

    fn data_received(shared: &Arc<Mutex<Shared>>, state: &Arc<ClientConnectionState>, data: Vec<u8>) {
        {
            let mut buffer = state.reassembly_buffer.lock().unwrap();
            buffer.extend_from_slice(&data);
        }
        let mut buffer = state.reassembly_buffer.lock().unwrap();
        let mut response = state.next_response.lock().unwrap();
        let consumed = response.parse_next(&buffer, DEFAULT_HEADER_LINE_LIMIT);
        buffer.drain(..consumed);
        if !response.is_complete_or_error() {
            return;
        }

        let connection = state.connection.lock().unwrap().clone();

        if response.state == ResponseState::Error {
            if let Some(connection) = &connection {
                connection.close(false);
            }
            Self::retire(shared, state);
            state.transaction.complete(TransactionState::Broken, None);
            return;
        }

        if response.is_upgrade() {
            if let Some(callback) = state.upgrade_callback.lock().unwrap().take() {
                if let Some(connection) = connection.clone() {
                    callback(connection);
                }
            }
            Self::retire(shared, state);
            state.transaction.complete(TransactionState::Completed, Some(response.clone()));
            return;
        }

        if let Some(connection) = connection {
            if state.persist_connection {
                let idle_since = shared.lock().unwrap().time_keeper.now();
                shared
                    .lock()
                    .unwrap()
                    .pool
                    .insert(state.key.clone(), PooledConnection { connection, idle_since });
            } else {
                connection.close(true);
            }
        }
        Self::retire(shared, state);
        state.transaction.complete(TransactionState::Completed, Some(response.clone()));
    }

    fn connection_broken(shared: &Arc<Mutex<Shared>>, state: &Arc<ClientConnectionState>) {
        Self::retire(shared, state);
        state.transaction.complete(TransactionState::Broken, None);
    }

    fn retire(shared: &Arc<Mutex<Shared>>, state: &Arc<ClientConnectionState>) {
        shared.lock().unwrap().in_flight.remove(&state.id);
    }

    /// Evicts idle pooled connections past `inactivity_interval_seconds`
    /// and times out in-flight transactions past their deadline, once per
    /// `CONNECTION_POLLING_PERIOD_MILLISECONDS`.
    fn housekeep(shared: Arc<Mutex<Shared>>, wake: Arc<Condvar>) {
        let mut guard = shared.lock().unwrap();
        loop {
            if guard.stop_housekeeper {
                return;
            }
            let now = guard.time_keeper.now();
            let inactivity = guard.inactivity_interval_seconds;
            guard.pool.retain(|_, pooled| now - pooled.idle_since < inactivity);

            let timed_out: Vec<Arc<ClientConnectionState>> = guard
                .in_flight
                .values()
                .filter(|s| now >= s.deadline && s.transaction.state() == TransactionState::InProgress)
                .cloned()
                .collect();
            drop(guard);

            for state in &timed_out {
                if let Some(connection) = state.connection.lock().unwrap().take() {
                    connection.close(false);
                }
                state.transaction.complete(TransactionState::Timeout, None);
                shared.lock().unwrap().in_flight.remove(&state.id);
            }

            guard = shared.lock().unwrap();
            let (next_guard, _timed_out) = wake
                .wait_timeout_while(
                    guard,
                    Duration::from_millis(CONNECTION_POLLING_PERIOD_MILLISECONDS),
                    |s| !s.stop_housekeeper,
                )
                .unwrap();
            guard = next_guard;
        }
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        self.demobilize();
        {
            let mut shared = self.shared.lock().unwrap();
            shared.stop_housekeeper = true;
        }
        self.housekeeper_wake.notify_all();
        if let Some(handle) = self.housekeeper.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// A fake server-side connection the client core is driven against in
/// tests; mirrors the shape of `server::MockConnection`.
#[cfg(test)]
struct MockConnection {
    data_received_callback: Mutex<Option<Box<dyn Fn(Vec<u8>) + Send + Sync>>>,
    broken_callback: Mutex<Option<Box<dyn Fn(bool) + Send + Sync>>>,
    sent: Mutex<Vec<u8>>,
    closed: Mutex<bool>,
}

#[cfg(test)]
impl MockConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            data_received_callback: Mutex::new(None),
            broken_callback: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        })
    }

    fn deliver(&self, data: &[u8]) {
        if let Some(cb) = &*self.data_received_callback.lock().unwrap() {
            cb(data.to_vec());
        }
    }

    fn break_connection(&self, graceful: bool) {
        if let Some(cb) = &*self.broken_callback.lock().unwrap() {
            cb(graceful);
        }
    }
}

#[cfg(test)]
impl Connection for MockConnection {
    fn peer_id(&self) -> String {
        "mock-server".to_string()
    }

    fn set_data_received_callback(&self, callback: Box<dyn Fn(Vec<u8>) + Send + Sync>) {
        *self.data_received_callback.lock().unwrap() = Some(callback);
    }

    fn set_broken_callback(&self, callback: Box<dyn Fn(bool) + Send + Sync>) {
        *self.broken_callback.lock().unwrap() = Some(callback);
    }

    fn send(&self, data: &[u8]) {
        self.sent.lock().unwrap().extend_from_slice(data);
    }

    fn close(&self, _clean: bool) {
        *self.closed.lock().unwrap() = true;
    }
}

/// A fake `ClientTransport` that hands back a fresh `MockConnection` (or
/// `None`, to simulate a connect failure) for every `connect()` call.
#[cfg(test)]
struct MockClientTransport {
    connections: Mutex<Vec<Arc<MockConnection>>>,
    fail_connect: bool,
}

#[cfg(test)]
impl MockClientTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self { connections: Mutex::new(Vec::new()), fail_connect: false })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self { connections: Mutex::new(Vec::new()), fail_connect: true })
    }

    fn last_connection(&self) -> Arc<MockConnection> {
        self.connections.lock().unwrap().last().cloned().unwrap()
    }
}

#[cfg(test)]
impl ClientTransport for MockClientTransport {
    fn connect(
        &self,
        _host: &str,
        _port: u16,
        data_received_callback: Box<dyn Fn(Vec<u8>) + Send + Sync>,
        broken_callback: Box<dyn Fn(bool) + Send + Sync>,
    ) -> Option<Arc<dyn Connection>> {
        if self.fail_connect {
            return None;
        }
        let connection = MockConnection::new();
        connection.set_data_received_callback(data_received_callback);
        connection.set_broken_callback(broken_callback);
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Some(connection as Arc<dyn Connection>)
    }
}
