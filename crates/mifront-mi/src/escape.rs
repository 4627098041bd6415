//! C-string escaping used by MI on both directions of the pipe.

use crate::error::SyntaxError;

/// Decode the C-string whose opening quote sits at `start`.
///
/// Returns the decoded text and the offset just past the closing quote.
/// Escapes are decoded to bytes first so that octal sequences emitted for
/// multi-byte characters reassemble into valid UTF-8.
pub(crate) fn read_c_string(bytes: &[u8], start: usize) -> Result<(String, usize), SyntaxError> {
    debug_assert_eq!(bytes.get(start), Some(&b'"'));
    let mut out = Vec::new();
    let mut pos = start + 1;

    while let Some(&b) = bytes.get(pos) {
        match b {
            b'"' => return Ok((String::from_utf8_lossy(&out).into_owned(), pos + 1)),
            b'\\' => {
                pos += 1;
                let Some(&esc) = bytes.get(pos) else {
                    break;
                };
                pos += 1;
                match esc {
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'v' => out.push(0x0b),
                    b'e' => out.push(0x1b),
                    b'"' | b'\\' | b'\'' | b'?' => out.push(esc),
                    b'0'..=b'7' => {
                        let mut value = u32::from(esc - b'0');
                        let mut digits = 1;
                        while digits < 3 {
                            match bytes.get(pos) {
                                Some(&d @ b'0'..=b'7') => {
                                    value = value * 8 + u32::from(d - b'0');
                                    pos += 1;
                                    digits += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push((value & 0xff) as u8);
                    }
                    b'x' => {
                        let mut value = 0u32;
                        let mut digits = 0;
                        while digits < 2 {
                            match bytes.get(pos).and_then(|d| (*d as char).to_digit(16)) {
                                Some(d) => {
                                    value = value * 16 + d;
                                    pos += 1;
                                    digits += 1;
                                }
                                None => break,
                            }
                        }
                        if digits == 0 {
                            out.extend_from_slice(b"\\x");
                        } else {
                            out.push(value as u8);
                        }
                    }
                    other => {
                        // Unknown escapes are kept as written.
                        out.push(b'\\');
                        out.push(other);
                    }
                }
            }
            _ => {
                out.push(b);
                pos += 1;
            }
        }
    }

    Err(SyntaxError::UnterminatedString { offset: start })
}

/// Escape `text` for use inside an MI C-string parameter.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap `text` in double quotes, escaping as needed, for use as a command
/// parameter (file names, expressions, conditions).
pub fn quote(text: &str) -> String {
    format!("\"{}\"", escape(text))
}
