//! The `Response` message type and the response half of the incremental
//! message parser (component C2). Grounded on `ParseResponseImpl` and
//! `ParseStatusLine` in the original `rhymu8354/Http` `Client.cpp`; shares
//! its three-stage shape with `request.rs`'s `Request::parse_next`.

use crate::chunked::{ChunkedBody, State as ChunkedState};
use crate::headers::{Headers, ParseState as HeaderParseState};
use crate::util::parse_decimal;

const CRLF: &[u8] = b"\r\n";
const HTTP_VERSION: &[u8] = b"HTTP/1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    StatusLine,
    Headers,
    Body,
    Complete,
    Error,
}

/// A status code in `[101, 200)` signals a protocol upgrade.
pub fn is_upgrade_status(status_code: u16) -> bool {
    (101..200).contains(&status_code)
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status_code: u16,
    pub reason_phrase: Vec<u8>,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub valid: bool,
    pub state: State,
    chunked: Option<ChunkedBody>,
    content_length_remaining: usize,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status_code: 0,
            reason_phrase: Vec::new(),
            headers: Headers::new(),
            body: Vec::new(),
            valid: true,
            state: State::StatusLine,
            chunked: None,
            content_length_remaining: 0,
        }
    }

    pub fn is_complete_or_error(&self) -> bool {
        matches!(self.state, State::Complete | State::Error)
    }

    pub fn is_upgrade(&self) -> bool {
        is_upgrade_status(self.status_code)
    }

    pub fn parse_next(&mut self, input: &[u8], header_line_limit: usize) -> usize {
        if self.is_complete_or_error() {
            return 0;
        }
        let mut message_end = 0usize;

        if self.state == State::StatusLine {
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
                    self.valid = self.parse_status_line(line);
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

    /// `"HTTP/1.1" SP STATUS-CODE SP REASON`. An out-of-range status code
    /// marks the response invalid but, like the request line, doesn't stop
    /// the parse.
    fn parse_status_line(&mut self, line: &[u8]) -> bool {
        let protocol_end = match line.iter().position(|&c| c == b' ') {
            Some(pos) => pos,
            None => return false,
        };
        if &line[..protocol_end] != HTTP_VERSION {
            return false;
        }
        let rest = &line[protocol_end + 1..];
        let status_end = match rest.iter().position(|&c| c == b' ') {
            Some(pos) => pos,
            None => return false,
        };
        let status_text = &rest[..status_end];
        let status_value = match parse_decimal(status_text) {
            Some(n) => n,
            None => return false,
        };
        if status_value > 999 {
            return false;
        }
        self.status_code = status_value as u16;
        self.reason_phrase = rest[status_end + 1..].to_vec();
        true
    }

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
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_full_200_ok_with_content_length_body() {
        let body = "x".repeat(51);
        let input = format!("HTTP/1.1 200 OK\r\nContent-Length: 51\r\n\r\n{}\r\n", body);
        let mut resp = Response::new();
        let consumed = resp.parse_next(input.as_bytes(), 1000);
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.reason_phrase, b"OK");
        assert_eq!(resp.body.len(), 51);
        assert_eq!(resp.state, State::Complete);
        assert_eq!(&input.as_bytes()[consumed..], b"\r\n");
    }

    #[test]
    fn out_of_range_status_code_is_invalid_but_recoverable() {
        let mut resp = Response::new();
        let input = b"HTTP/1.1 12345 Nope\r\n\r\n";
        resp.parse_next(input, 1000);
        assert_eq!(resp.state, State::Complete);
        assert!(!resp.valid);
    }

    #[test]
    fn absent_content_length_completes_with_empty_body() {
        let mut resp = Response::new();
        let input = b"HTTP/1.1 204 No Content\r\n\r\n";
        resp.parse_next(input, 1000);
        assert_eq!(resp.state, State::Complete);
        assert_eq!(resp.body, b"");
    }

    #[test]
    fn chunked_response_body_is_decoded() {
        let mut resp = Response::new();
        let input = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHello\r\n0\r\n\r\n";
        resp.parse_next(input, 1000);
        assert_eq!(resp.state, State::Complete);
        assert_eq!(resp.body, b"Hello");
    }

    #[test]
    fn upgrade_class_status_is_recognized() {
        assert!(is_upgrade_status(101));
        assert!(!is_upgrade_status(200));
        assert!(!is_upgrade_status(100));
    }

    /// Feeds `input` one byte at a time through an externally-owned
    /// reassembly buffer, the way `client::data_received` does: each byte
    /// is appended, `parse_next` runs over the whole buffer, and only the
    /// bytes it reports consuming are drained. A lone byte handed straight
    /// to `parse_next` (with no such buffer) can never contain a `CRLF`, so
    /// this is the only way a byte-at-a-time feed exercises the real
    /// fragmentation path.
    fn feed_incrementally(input: &[u8]) -> (Response, usize) {
        let mut response = Response::new();
        let mut buffer: Vec<u8> = Vec::new();
        let mut total = 0usize;
        for &byte in input {
            buffer.push(byte);
            let consumed = response.parse_next(&buffer, 1000);
            buffer.drain(..consumed);
            total += consumed;
            if response.is_complete_or_error() {
                break;
            }
        }
        (response, total)
    }

    #[test]
    fn fragmentation_agnostic_one_byte_at_a_time() {
        let input: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let mut whole = Response::new();
        whole.parse_next(input, 1000);

        let (split, total) = feed_incrementally(input);
        assert_eq!(total, input.len());
        assert_eq!(whole.body, split.body);
        assert_eq!(whole.state, split.state);
    }

    #[test]
    fn a_header_block_split_right_after_a_complete_line_is_not_lost() {
        let (split, total) =
            feed_incrementally(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
        assert_eq!(total, 40);
        assert_eq!(split.state, State::Complete);
        assert_eq!(split.body, b"hi");
    }
}
