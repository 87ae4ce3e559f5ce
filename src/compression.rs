//! Thin wrappers over `flate2` for the `gzip`/`deflate` content- and
//! transfer-codings. Out of the core parse path: nothing in
//! `request.rs`/`response.rs` invokes this module on its own. It exists so
//! a caller (a handler, or client code inspecting a response) can
//! decode/encode a body without reaching for a different crate than the
//! one already in the dependency graph.

use std::io::{self, Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;

pub fn gzip_decode(input: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(input);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

pub fn gzip_encode(input: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input)?;
    encoder.finish()
}

pub fn deflate_decode(input: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(input);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

pub fn deflate_encode(input: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input)?;
    encoder.finish()
}
