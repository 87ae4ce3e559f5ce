//! Minimal request-target parsing.
//!
//! Full URI parsing is scoped out as an external collaborator; this
//! module implements just enough of RFC 3986 (origin-form and
//! absolute-form request targets) to support routing and Host validation,
//! matching what `Server.cpp`'s `ParseRequestLine` actually needs from its
//! own `Uri` collaborator.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uri {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Vec<String>,
    pub query: Option<String>,
}

impl Uri {
    pub fn has_port(&self) -> bool {
        self.port.is_some()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Reconstructs an origin-form request-target from `path`/`query`.
    /// Used by the serializer when a `Request` was built programmatically
    /// (by a client caller) rather than parsed off the wire, where the raw
    /// target bytes are preserved verbatim instead.
    pub fn to_target_bytes(&self) -> Vec<u8> {
        let mut out = if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.join("/")
        };
        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }
        out.into_bytes()
    }
}

/// Parses a request-target as it appears after the method in a request
/// line: either origin-form (`/path?query`) or absolute-form
/// (`http://host[:port]/path?query`). Returns `None` on a target that is
/// empty or structurally invalid (e.g. a non-numeric port).
pub fn parse(target: &[u8]) -> Option<Uri> {
    let target = std::str::from_utf8(target).ok()?;
    if target.is_empty() {
        return None;
    }
    if let Some(rest) = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
    {
        let (authority, path_and_query) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let (host, port) = split_authority(authority)?;
        let (path, query) = split_path_and_query(path_and_query);
        Some(Uri { host: Some(host), port, path, query })
    } else if target.starts_with('/') {
        let (path, query) = split_path_and_query(target);
        Some(Uri { host: None, port: None, path, query })
    } else {
        None
    }
}

fn split_authority(authority: &str) -> Option<(String, Option<u16>)> {
    if authority.is_empty() {
        return None;
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() => {
            let port: u16 = port.parse().ok()?;
            Some((host.to_string(), Some(port)))
        }
        _ => Some((authority.to_string(), None)),
    }
}

fn split_path_and_query(path_and_query: &str) -> (Vec<String>, Option<String>) {
    let (path_part, query) = match path_and_query.find('?') {
        Some(idx) => (&path_and_query[..idx], Some(path_and_query[idx + 1..].to_string())),
        None => (path_and_query, None),
    };
    let path = path_part
        .split('/')
        .map(|s| s.to_string())
        .collect();
    (path, query)
}
