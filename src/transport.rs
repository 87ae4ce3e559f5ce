//! The transport and wall-clock contracts. Everything in this
//! crate that touches bytes over a network or reads the clock does so
//! through these traits; no socket or `SystemTime` call appears anywhere
//! else. Grounded on `Http::ServerTransport`/`Http::ClientTransport`/
//! `Http::Connection`/`Http::TimeKeeper` in the original headers — the
//! callback-registration shape (`set_data_received_callback`,
//! `set_broken_callback`) is kept instead of translated into an async
//! `Stream`, since the rest of the crate's concurrency model is
//! thread-and-condvar based, not async.

use std::sync::Arc;

/// A single established connection, from either the server or client side.
pub trait Connection: Send + Sync {
    /// An implementation-defined string identifying the peer, used only
    /// for logging.
    fn peer_id(&self) -> String;

    fn set_data_received_callback(&self, callback: Box<dyn Fn(Vec<u8>) + Send + Sync>);

    /// `graceful` distinguishes a peer-initiated half-close from an
    /// abortive drop; both still invoke the callback exactly once.
    fn set_broken_callback(&self, callback: Box<dyn Fn(bool) + Send + Sync>);

    fn send(&self, data: &[u8]);

    /// `clean`: let any data already queued for send drain before the
    /// transport tears the connection down, rather than aborting it.
    fn close(&self, clean: bool);
}

/// The server side of the transport contract: binds a port and hands off
/// newly-accepted connections.
pub trait ServerTransport: Send + Sync {
    fn bind(
        &self,
        port: u16,
        new_connection_callback: Box<dyn Fn(Arc<dyn Connection>) + Send + Sync>,
    ) -> bool;

    fn release(&self);
}

/// The client side of the transport contract: makes outbound connections.
pub trait ClientTransport: Send + Sync {
    fn connect(
        &self,
        host: &str,
        port: u16,
        data_received_callback: Box<dyn Fn(Vec<u8>) + Send + Sync>,
        broken_callback: Box<dyn Fn(bool) + Send + Sync>,
    ) -> Option<Arc<dyn Connection>>;
}

/// Wall-clock time, injected so the server's/client's timing logic (the
/// reaper's idle watchdog, the client's request-timeout housekeeper) is
/// deterministically testable. A monotonic clock is preferred but not
/// required by the contract.
pub trait TimeKeeper: Send + Sync {
    /// Seconds since an arbitrary epoch, as a real number so sub-second
    /// precision survives.
    fn now(&self) -> f64;
}

/// A `TimeKeeper` backed by `std::time::Instant`, for production use.
pub struct SystemTimeKeeper {
    start: std::time::Instant,
}

impl Default for SystemTimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemTimeKeeper {
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

impl TimeKeeper for SystemTimeKeeper {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
