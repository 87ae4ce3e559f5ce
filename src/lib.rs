//! `httpwire`: transport-agnostic HTTP/1.1 message syntax and routing.
//!
//! The crate is organized around the wire-format pipeline: a chunked
//! transfer-coding decoder ([`chunked`]), a header-block codec
//! ([`headers`]), the request/response message parsers built on top
//! of both ([`request`], [`response`]), a serializer back to wire bytes
//! ([`serializer`]), a resource-space routing tree ([`resource_space`]),
//! and the two connection managers that drive the parsers and the router
//! against an injected transport ([`server`], [`client`]). [`transport`]
//! and [`config`] hold the seams those managers are built against; nothing
//! else in the crate touches a socket or the wall clock directly.

pub mod chunked;
pub mod client;
pub mod compression;
pub mod config;
pub mod error;
pub mod headers;
pub mod request;
pub mod resource_space;
pub mod response;
pub mod serializer;
pub mod server;
pub mod transport;
pub mod uri;
pub mod util;

pub use client::{ClientCore, Transaction, TransactionState};
pub use config::Config;
pub use error::{Error, Result};
pub use headers::Headers;
pub use request::Request;
pub use resource_space::ResourceSpace;
pub use response::Response;
pub use server::ServerCore;
pub use transport::{ClientTransport, Connection, ServerTransport, SystemTimeKeeper, TimeKeeper};
pub use uri::Uri;
