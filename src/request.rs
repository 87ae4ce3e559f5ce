//! The `Request` message type and the request half of the incremental
//! message parser (component C2). Grounded on `Server::Impl::ParseRequest`
//! and `ParseRequestLine` in the original `rhymu8354/Http` `Server.cpp`:
//! a three-stage state machine (request line, headers, body) driven one
//! `parse_next` call at a time so it tolerates arbitrary fragmentation of
//! the input.

use crate::chunked::{ChunkedBody, State as ChunkedState};
use crate::headers::{Headers, ParseState as HeaderParseState};
use crate::uri::{self, Uri};
use crate::util::parse_decimal;

const CRLF: &[u8] = b"\r\n";
const HTTP_VERSION: &[u8] = b"HTTP/1.1";

/// Hard ceiling on a request body's `Content-Length`; exceeding it is an
/// unrecoverable syntax error.
pub const MAX_CONTENT_LENGTH: usize = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    RequestLine,
    Headers,
    Body,
    Complete,
    Error,
}

/// An HTTP/1.1 request, either assembled incrementally off the wire by the
/// server or built up programmatically by a client caller before being
/// handed to the serializer.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Vec<u8>,
    pub target: Uri,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// True until a syntactic or semantic check fails it. Once false it
    /// stays false; nothing resets it back to true mid-parse.
    pub valid: bool,
    pub state: State,
    /// The request-target exactly as it appeared on the wire, preserved so
    /// a parsed request that's re-serialized (e.g. by a handler acting as
    /// a minimal proxy) round-trips byte-for-byte. Empty when the request
    /// was constructed programmatically; the serializer falls back to
    /// reconstructing the target from `target` in that case.
    raw_target: Vec<u8>,
    chunked: Option<ChunkedBody>,
    content_length_remaining: usize,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    pub fn new() -> Self {
        Self {
            method: Vec::new(),
            target: Uri::default(),
            headers: Headers::new(),
            body: Vec::new(),
            valid: true,
            state: State::RequestLine,
            raw_target: Vec::new(),
            chunked: None,
            content_length_remaining: 0,
        }
    }

    pub fn is_complete_or_error(&self) -> bool {
        matches!(self.state, State::Complete | State::Error)
    }

    pub fn target_bytes(&self) -> Vec<u8> {
        if !self.raw_target.is_empty() {
            self.raw_target.clone()
        } else {
            self.target.to_target_bytes()
        }
    }

    /// Advances this request's state machine using as much of `input` as
    /// is needed, never more. Returns the count of bytes consumed; once
    /// `state` is `Complete` or `Error` this is always zero and the
    /// message is never mutated again.
    pub fn parse_next(&mut self, input: &[u8], header_line_limit: usize) -> usize {
        self.parse_next_inner(input, header_line_limit, None)
    }

    /// As `parse_next`, but also performs the server-only Host validation
    /// the instant the header block completes, against `configured_host`
    /// (empty when the server has no configured host).
    pub fn parse_next_with_host(
        &mut self,
        input: &[u8],
        header_line_limit: usize,
        configured_host: &[u8],
    ) -> usize {
        self.parse_next_inner(input, header_line_limit, Some(configured_host))
    }

    fn parse_next_inner(
        &mut self,
        input: &[u8],
        header_line_limit: usize,
        configured_host: Option<&[u8]>,
    ) -> usize {
        if self.is_complete_or_error() {
            return 0;
        }
        let mut message_end = 0usize;

        if self.state == State::RequestLine {
            let rest = &input[message_end..];
            match find_subslice(rest, CRLF) {
                None => {
                    if rest.len() > header_line_limit {
                        self.state = State::Error;
                    }
                    return message_end;
                }
                Some(line_len) => {
                    if line_len > header_line_limit {
                        self.state = State::Error;
                        return message_end;
                    }
                    let line = &rest[..line_len];
                    message_end += line_len + CRLF.len();
                    self.state = State::Headers;
                    self.valid = self.parse_request_line(line);
                }
            }
        }

        if self.state == State::Headers {
            let (header_state, offset, headers) =
                Headers::parse_raw_message(&input[message_end..], header_line_limit);
            message_end += offset;
            match header_state {
                HeaderParseState::Incomplete => return message_end,
                HeaderParseState::Error => {
                    self.state = State::Error;
                    return message_end;
                }
                HeaderParseState::Complete => {
                    self.valid = self.valid && !headers.is_damaged();
                    self.headers = headers;
                    if let Some(host) = configured_host {
                        self.validate_host(host);
                    }
                    self.state = State::Body;
                    self.begin_body();
                }
            }
        }

        if self.state == State::Body {
            message_end += self.consume_body(&input[message_end..]);
        }

        message_end
    }

    /// `METHOD SP TARGET SP "HTTP/1.1"`. Any mismatch returns `false` but
    /// still leaves the request parseable: the connection stays usable
    /// enough to answer with a canned 400.
    fn parse_request_line(&mut self, line: &[u8]) -> bool {
        let method_end = match line.iter().position(|&c| c == b' ') {
            Some(pos) => pos,
            None => return false,
        };
        self.method = line[..method_end].to_vec();
        if self.method.is_empty() {
            return false;
        }

        let rest = &line[method_end + 1..];
        let target_end = match rest.iter().position(|&c| c == b' ') {
            Some(pos) => pos,
            None => return false,
        };
        if target_end == 0 {
            return false;
        }
        self.raw_target = rest[..target_end].to_vec();
        let parsed = uri::parse(&self.raw_target);
        let target_valid = parsed.is_some();
        self.target = parsed.unwrap_or_default();

        let protocol = &rest[target_end + 1..];
        target_valid && protocol == HTTP_VERSION
    }

    /// RFC 7230 §3.3.3: Transfer-Encoding, when present, takes priority
    /// over Content-Length. Per step 3 of that section, a Content-Length
    /// sent alongside chunked framing is removed rather than honored.
    fn begin_body(&mut self) {
        if self.has_chunked_transfer_coding() {
            self.headers.remove("Content-Length");
            self.chunked = Some(ChunkedBody::new());
            return;
        }
        match self.headers.get_single("Content-Length") {
            None => self.state = State::Complete,
            Some(value) => match parse_decimal(value.as_bytes()) {
                None => self.state = State::Error,
                Some(len) if len > MAX_CONTENT_LENGTH => self.state = State::Error,
                Some(0) => self.state = State::Complete,
                Some(len) => self.content_length_remaining = len,
            },
        }
    }

    fn has_chunked_transfer_coding(&self) -> bool {
        self.headers
            .get_multi_value("Transfer-Encoding")
            .last()
            .map(|v| v.eq_ignore_ascii_case(b"chunked"))
            .unwrap_or(false)
    }

    fn consume_body(&mut self, input: &[u8]) -> usize {
        if let Some(chunked) = &mut self.chunked {
            let accepted = chunked.decode(input, 0, input.len());
            match chunked.state() {
                ChunkedState::Complete => {
                    self.body = chunked.body_as_bytes().to_vec();
                    self.state = State::Complete;
                }
                ChunkedState::Error => self.state = State::Error,
                _ => {}
            }
            accepted
        } else {
            let available = input.len().min(self.content_length_remaining);
            self.body.extend_from_slice(&input[..available]);
            self.content_length_remaining -= available;
            if self.content_length_remaining == 0 {
                self.state = State::Complete;
            }
            available
        }
    }

    /// Server-only semantic check. Follows the original's exact
    /// substitution logic: an absent target authority is treated as
    /// equal to `configured_host`; an absent `configured_host` is treated
    /// as equal to the request's own `Host` header. Only `Host` absence or
    /// a genuine three-way mismatch invalidates the request.
    pub fn validate_host(&mut self, configured_host: &[u8]) {
        let request_host = match self.headers.get_single("Host") {
            Some(h) => h.to_vec(),
            None => {
                self.valid = false;
                return;
            }
        };
        let server_host = if configured_host.is_empty() {
            request_host.clone()
        } else {
            configured_host.to_vec()
        };
        let target_host = match self.target.host() {
            Some(h) if !h.is_empty() => h.as_bytes().to_vec(),
            _ => server_host.clone(),
        };
        if request_host != target_host || request_host != server_host {
            self.valid = false;
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_a_simple_get_with_no_body() {
        let mut req = Request::new();
        let input = b"GET /hello.txt HTTP/1.1\r\nHost: www.example.com\r\n\r\n";
        let consumed = req.parse_next(input, 1000);
        assert_eq!(consumed, input.len());
        assert_eq!(req.state, State::Complete);
        assert!(req.valid);
        assert_eq!(req.method, b"GET");
        assert_eq!(req.target.path, vec!["".to_string(), "hello.txt".to_string()]);
    }

    /// Feeds `input` one byte at a time through an externally-owned
    /// reassembly buffer, the way `server::data_received` does: each byte
    /// is appended, `parse_next` runs over the whole buffer, and only the
    /// bytes it reports consuming are drained. A lone byte handed straight
    /// to `parse_next` (with no such buffer) can never contain a `CRLF`, so
    /// this is the only way a byte-at-a-time feed exercises the real
    /// fragmentation path.
    fn feed_incrementally(input: &[u8]) -> (Request, usize) {
        let mut request = Request::new();
        let mut buffer: Vec<u8> = Vec::new();
        let mut total = 0usize;
        for &byte in input {
            buffer.push(byte);
            let consumed = request.parse_next(&buffer, 1000);
            buffer.drain(..consumed);
            total += consumed;
            if request.is_complete_or_error() {
                break;
            }
        }
        (request, total)
    }

    #[test]
    fn fragmentation_agnostic_byte_at_a_time() {
        let input: &[u8] = b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 3\r\n\r\nabc";
        let mut whole = Request::new();
        whole.parse_next(input, 1000);

        let (split, total) = feed_incrementally(input);
        assert_eq!(total, input.len());
        assert_eq!(whole.state, split.state);
        assert_eq!(whole.body, split.body);
        assert_eq!(split.body, b"abc");
    }

    #[test]
    fn a_header_block_split_right_after_a_complete_line_is_not_lost() {
        let (split, total) = feed_incrementally(b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(total, 28);
        assert_eq!(split.state, State::Complete);
        assert!(split.valid);
        assert_eq!(split.headers.get_single("host").unwrap(), "h");
    }

    #[test]
    fn damaged_header_line_is_recoverable_but_invalid() {
        let mut req = Request::new();
        let input = b"GET /x HTTP/1.1\r\nUser-Agent curl/8.0\r\nHost: h\r\n\r\n";
        req.parse_next(input, 1000);
        assert_eq!(req.state, State::Complete);
        assert!(!req.valid);
    }

    #[test]
    fn missing_protocol_token_is_invalid_but_recoverable() {
        let mut req = Request::new();
        let input = b"GET /x HTTP/1.0\r\nHost: h\r\n\r\n";
        req.parse_next(input, 1000);
        assert_eq!(req.state, State::Complete);
        assert!(!req.valid);
    }

    #[test]
    fn overlong_request_line_is_unrecoverable() {
        let mut req = Request::new();
        let long = "a".repeat(2000);
        let input = format!("GET /{} HTTP/1.1\r\n\r\n", long);
        req.parse_next(input.as_bytes(), 1000);
        assert_eq!(req.state, State::Error);
    }

    #[test]
    fn content_length_overflow_is_unrecoverable() {
        let mut req = Request::new();
        let digits = "1".repeat(70);
        let input = format!("POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: {}\r\n\r\n", digits);
        req.parse_next(input.as_bytes(), 1000);
        assert_eq!(req.state, State::Error);
    }

    #[test]
    fn content_length_over_ceiling_is_unrecoverable() {
        let mut req = Request::new();
        let input = format!(
            "POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: {}\r\n\r\n",
            MAX_CONTENT_LENGTH + 1
        );
        req.parse_next(input.as_bytes(), 1000);
        assert_eq!(req.state, State::Error);
    }

    #[test]
    fn chunked_transfer_coding_is_decoded_and_content_length_is_dropped() {
        let mut req = Request::new();
        let input = b"POST /x HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\nContent-Length: 999\r\n\r\n5\r\nHello\r\n0\r\n\r\n";
        let consumed = req.parse_next(input, 1000);
        assert_eq!(consumed, input.len());
        assert_eq!(req.state, State::Complete);
        assert_eq!(req.body, b"Hello");
        assert!(!req.headers.has("Content-Length"));
    }

    #[rstest]
    #[case(Some("www.example.com"), Some("www.example.com"), true)]
    #[case(None::<&str>, Some("www.example.com"), true)]
    #[case(Some("www.example.com"), Some("other.example.com"), false)]
    #[case(None::<&str>, None::<&str>, false)]
    fn host_validation_matrix(
        #[case] host_header: Option<&str>,
        #[case] configured_host: Option<&str>,
        #[case] expect_valid: bool,
    ) {
        let mut req = Request::new();
        req.state = State::Complete;
        req.valid = true;
        if let Some(h) = host_header {
            req.headers.set("Host", h);
        }
        req.validate_host(configured_host.unwrap_or("").as_bytes());
        assert_eq!(req.valid, expect_valid);
    }

    #[test]
    fn terminal_state_is_sticky_and_consumes_nothing_further() {
        let mut req = Request::new();
        req.parse_next(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n", 1000);
        assert_eq!(req.state, State::Complete);
        let consumed = req.parse_next(b"GET / HTTP/1.1\r\n\r\n", 1000);
        assert_eq!(consumed, 0);
    }
}
