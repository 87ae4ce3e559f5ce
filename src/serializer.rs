//! Component C3: emits well-formed request/response byte streams.
//! Grounded on `Http::Request::Generate`/`Http::Response::Generate` in the
//! original — start line, then the header collaborator's own raw block
//! (which already carries the trailing blank-line CRLF), then the body
//! verbatim. No header is synthesized here; the caller is responsible for
//! `Content-Length` et al.

use crate::request::Request;
use crate::response::Response;

const CRLF: &[u8] = b"\r\n";
const HTTP_VERSION: &[u8] = b"HTTP/1.1";

pub fn serialize_request(request: &Request) -> Vec<u8> {
    let mut out = Vec::with_capacity(request.body.len() + 64);
    out.extend_from_slice(&request.method);
    out.push(b' ');
    out.extend_from_slice(&request.target_bytes());
    out.push(b' ');
    out.extend_from_slice(HTTP_VERSION);
    out.extend_from_slice(CRLF);
    out.extend_from_slice(&request.headers.generate_raw());
    out.extend_from_slice(&request.body);
    out
}

pub fn serialize_response(response: &Response) -> Vec<u8> {
    let mut out = Vec::with_capacity(response.body.len() + 64);
    out.extend_from_slice(HTTP_VERSION);
    out.push(b' ');
    out.extend_from_slice(response.status_code.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(&response.reason_phrase);
    out.extend_from_slice(CRLF);
    out.extend_from_slice(&response.headers.generate_raw());
    out.extend_from_slice(&response.body);
    out
}
