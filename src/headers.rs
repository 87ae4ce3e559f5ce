//! An ordered, case-insensitive multi-map of header name to header value,
//! together with its raw wire-format codec.
//!
//! This is the "Message Headers" external collaborator: Request and
//! Response both hold one and drive it through `parse_raw_message` as
//! header-block bytes arrive. Grounded on the teacher's `Table<T>` for
//! the ordered case-insensitive lookup shape, simplified to the single
//! line terminator (`CRLF`) this wire format actually uses instead of the
//! teacher's tolerance for bare-CR/bare-LF responses.

use crate::util::{split_comma_list, trimmed};
use bstr::{BStr, BString, ByteSlice};
use nom::bytes::streaming::{tag, take_until};
use nom::IResult;

const CRLF: &[u8] = b"\r\n";

/// One header line up to (not including) its `CRLF`, using the same
/// streaming-combinator style the teacher's `headers.rs` parses header
/// lines with: `Err::Incomplete` signals "need more bytes", not a parse
/// failure.
fn take_line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (rest, line) = take_until(CRLF)(input)?;
    let (rest, _) = tag(CRLF)(rest)?;
    Ok((rest, line))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Complete,
    Incomplete,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(BString, BString)>,
    damaged: bool,
}

impl Headers {
    pub fn new() -> Self {
        Self { entries: Vec::new(), damaged: false }
    }

    /// True if `parse_raw_message` encountered a header line with no colon.
    /// The line is still accepted as an empty-name header; the caller
    /// decides whether that invalidates the message.
    pub fn is_damaged(&self) -> bool {
        self.damaged
    }

    /// Removes every existing entry for `name` and inserts a single one.
    pub fn set<N: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, name: N, value: V) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name.as_ref()));
        self.add(name, value);
    }

    /// Appends a new entry, preserving any existing ones with the same name.
    pub fn add<N: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, name: N, value: V) {
        self.entries.push((BString::from(name.as_ref()), BString::from(value.as_ref())));
    }

    pub fn has<N: AsRef<[u8]>>(&self, name: N) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name.as_ref()))
    }

    /// Removes every entry matching `name`. Used when chunked framing
    /// supersedes a `Content-Length` the peer also sent (RFC 7230 §3.3.3
    /// step 3).
    pub fn remove<N: AsRef<[u8]>>(&mut self, name: N) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name.as_ref()));
    }

    /// Returns the value of the first entry matching `name`, if any.
    pub fn get_single<N: AsRef<[u8]>>(&self, name: N) -> Option<&BStr> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.as_ref()))
            .map(|(_, v)| v.as_bstr())
    }

    /// Returns every comma-separated value across every entry matching
    /// `name`, trimmed of surrounding whitespace, empty elements dropped.
    pub fn get_multi_value<N: AsRef<[u8]>>(&self, name: N) -> Vec<BString> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name.as_ref()))
            .flat_map(|(_, v)| split_comma_list(v.as_bytes()))
            .map(BString::from)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BStr, &BStr)> {
        self.entries.iter().map(|(n, v)| (n.as_bstr(), v.as_bstr()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes every entry as `Name: Value\r\n`, followed by the
    /// blank-line terminator. The serializer (`serializer.rs`) appends this
    /// directly after the start line.
    pub fn generate_raw(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.entries {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
        out
    }

    /// Parses as many complete header lines as `input` holds, stopping at
    /// the first blank line (end of header block). A line (including its
    /// terminator) longer than `limit` bytes is an unrecoverable error. A
    /// line with no colon is accepted as a header with an empty name and
    /// the whole line as its value, rather than failing the connection
    /// over it, but marks the block `is_damaged()` so the caller can still
    /// invalidate the message.
    ///
    /// Returns the parse state and the offset into `input` of the first
    /// byte after the header block (valid only when `Complete`). On
    /// `Incomplete` the offset is always `0`: this function discards
    /// whatever header lines it has parsed so far rather than returning
    /// them, so the caller must not treat any of `input` as consumed until
    /// the whole header block (through the terminating blank line) is
    /// available in one call.
    pub fn parse_raw_message(input: &[u8], limit: usize) -> (ParseState, usize, Headers) {
        let mut headers = Headers::new();
        let mut offset = 0usize;
        loop {
            let rest = &input[offset..];
            let (line, consumed) = match take_line(rest) {
                Ok((after, line)) => (line, rest.len() - after.len()),
                Err(nom::Err::Incomplete(_)) => {
                    if rest.len() > limit {
                        return (ParseState::Error, offset, headers);
                    }
                    return (ParseState::Incomplete, 0, headers);
                }
                Err(_) => return (ParseState::Error, offset, headers),
            };
            if line.len() > limit {
                return (ParseState::Error, offset, headers);
            }
            if line.is_empty() {
                offset += consumed;
                return (ParseState::Complete, offset, headers);
            }
            if (line[0] == b' ' || line[0] == b'\t') && !headers.entries.is_empty() {
                let continuation = trimmed(line);
                let last = headers.entries.last_mut().expect("checked non-empty above");
                if !continuation.is_empty() {
                    if !last.1.is_empty() {
                        last.1.push(b' ');
                    }
                    last.1.extend_from_slice(continuation);
                }
            } else if let Some(colon) = line.iter().position(|&c| c == b':') {
                let name = trimmed(&line[..colon]);
                let value = trimmed(&line[colon + 1..]);
                headers.add(name, value);
            } else {
                headers.damaged = true;
                headers.add(b"" as &[u8], trimmed(line));
            }
            offset += consumed;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[test]
    fn set_replaces_all_prior_entries() {
        let mut h = Headers::new();
        h.add("X-Thing", "1");
        h.add("X-Thing", "2");
        h.set("X-Thing", "3");
        assert_eq!(h.get_multi_value("x-thing"), vec![BString::from("3")]);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut h = Headers::new();
        h.add("Content-Type", "text/plain");
        assert!(h.has("content-type"));
        assert_eq!(h.get_single("CONTENT-TYPE").unwrap(), "text/plain");
    }

    #[test]
    fn multi_value_splits_and_trims_commas_across_entries() {
        let mut h = Headers::new();
        h.add("Connection", "keep-alive, Upgrade");
        h.add("Connection", "close");
        assert_eq!(
            h.get_multi_value("connection"),
            vec![BString::from("keep-alive"), BString::from("Upgrade"), BString::from("close")]
        );
    }

    #[test]
    fn parses_complete_header_block() {
        let input = b"Host: example.com\r\nContent-Length: 5\r\n\r\nbody rest";
        let (state, offset, headers) = Headers::parse_raw_message(input, 1000);
        assert_eq!(state, ParseState::Complete);
        assert_eq!(&input[offset..], b"body rest");
        assert_eq!(headers.get_single("host").unwrap(), "example.com");
        assert_eq!(headers.get_single("content-length").unwrap(), "5");
    }

    #[test]
    fn incomplete_without_terminating_blank_line() {
        let input = b"Host: example.com\r\nX-Partial: ab";
        let (state, _offset, _headers) = Headers::parse_raw_message(input, 1000);
        assert_eq!(state, ParseState::Incomplete);
    }

    #[test]
    fn incomplete_reports_zero_offset_even_after_a_complete_line() {
        // One full "Host" line is present, but the block hasn't reached its
        // terminating blank line yet. The caller discards `headers` on
        // Incomplete, so crediting any of this input as consumed would lose
        // the Host line for good once the caller drains its buffer by that
        // amount.
        let input = b"Host: example.com\r\n";
        let (state, offset, _headers) = Headers::parse_raw_message(input, 1000);
        assert_eq!(state, ParseState::Incomplete);
        assert_eq!(offset, 0);
    }

    #[test]
    fn overlong_line_is_an_unrecoverable_error() {
        let long_value = "a".repeat(2000);
        let input = format!("X-Long: {}\r\n\r\n", long_value);
        let (state, _offset, _headers) = Headers::parse_raw_message(input.as_bytes(), 1000);
        assert_eq!(state, ParseState::Error);
    }

    #[test]
    fn missing_colon_is_tolerated_as_an_empty_name_header_but_marked_damaged() {
        let input = b"User-Agent curl/8.0\r\n\r\n";
        let (state, _offset, headers) = Headers::parse_raw_message(input, 1000);
        assert_eq!(state, ParseState::Complete);
        assert_eq!(headers.get_single("").unwrap(), "User-Agent curl/8.0");
        assert!(headers.is_damaged());
    }

    #[rstest]
    #[case(b"A: 1\r\n B: continued\r\n\r\n", "1 B: continued")]
    #[case(b"A: 1\r\n\tmore\r\n\r\n", "1 more")]
    fn folded_continuation_lines_join_onto_the_prior_value(#[case] input: &[u8], #[case] expected: &str) {
        let (state, _offset, headers) = Headers::parse_raw_message(input, 1000);
        assert_eq!(state, ParseState::Complete);
        assert_eq!(headers.get_single("a").unwrap(), expected);
    }
}
