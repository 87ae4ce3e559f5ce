/// Small helpers shared by the chunked decoder, the header collaborator and
/// the message parser. Kept free of any state so every caller can reuse them
/// without touching a lock.

/// RFC 7230 `tchar`.
pub fn is_token(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

pub fn is_space(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

/// Trims leading/trailing `SP`/`HTAB` per RFC 7230's `OWS`.
pub fn trimmed(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|&c| !is_space(c)).unwrap_or(data.len());
    let end = data.iter().rposition(|&c| !is_space(c)).map(|i| i + 1).unwrap_or(start);
    &data[start..end]
}

/// Parses a run of ASCII decimal digits into a `usize`, rejecting overflow
/// and any non-digit byte. Mirrors the original's `ParseSize`, which detects
/// overflow by checking that the running value divided back out still
/// equals what it was before the last digit was folded in.
pub fn parse_decimal(data: &[u8]) -> Option<usize> {
    if data.is_empty() {
        return None;
    }
    let mut value: usize = 0;
    for &c in data {
        if !c.is_ascii_digit() {
            return None;
        }
        let digit = (c - b'0') as usize;
        value = value.checked_mul(10)?.checked_add(digit)?;
    }
    Some(value)
}

/// Case-insensitive ASCII comparison of two byte strings.
pub fn eq_nocase(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
}

/// Splits a comma-separated header value into trimmed, non-empty tokens.
pub fn split_comma_list(value: &[u8]) -> Vec<Vec<u8>> {
    value
        .split(|&c| c == b',')
        .map(trimmed)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_vec())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trims_ows() {
        assert_eq!(trimmed(b"  hello \t"), b"hello");
        assert_eq!(trimmed(b""), b"");
        assert_eq!(trimmed(b"   "), b"");
    }

    #[test]
    fn parses_decimal() {
        assert_eq!(parse_decimal(b"123"), Some(123));
        assert_eq!(parse_decimal(b""), None);
        assert_eq!(parse_decimal(b"12a"), None);
        assert_eq!(parse_decimal(b"99999999999999999999999999999999"), None);
    }

    #[test]
    fn nocase_compare() {
        assert!(eq_nocase(b"Close", b"CLOSE"));
        assert!(!eq_nocase(b"Close", b"Open"));
    }

    #[test]
    fn comma_split_trims_and_drops_empty() {
        assert_eq!(
            split_comma_list(b" close ,  , keep-alive"),
            vec![b"close".to_vec(), b"keep-alive".to_vec()]
        );
    }
}
