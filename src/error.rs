use std::fmt;

/// Failure modes for the pieces of the parser that *do* need to report a
/// hard error (as opposed to the public message types, whose failures are
/// observable only through their own `state` field per the wire contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A syntactic rule was violated in a way that cannot be recovered from
    /// (overlong line, malformed chunk-size line, bad separator).
    Malformed(&'static str),
    /// A configured limit was exceeded (header-line limit, body ceiling).
    LimitExceeded(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed(what) => write!(f, "malformed: {}", what),
            Error::LimitExceeded(what) => write!(f, "limit exceeded: {}", what),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
