//! Line framing for debugger output.
//!
//! MI is line oriented but pipes deliver arbitrary byte chunks. A
//! [`LineBuffer`] accumulates chunks and hands out complete lines, holding
//! back a trailing partial line until its terminator arrives.

/// Accumulates raw bytes and yields complete lines.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    ///
    /// Lines are returned without their `\n` / `\r\n` terminator and are
    /// decoded as UTF-8 only once complete, so a multi-byte character split
    /// across two chunks survives intact.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Flush a final unterminated line, if any (used at end of stream).
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }

    /// Number of buffered bytes not yet forming a complete line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_single_complete_line() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"^done\n"), vec!["^done".to_string()]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn framing_partial_line_held_back() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"*stopped,reason=").is_empty());
        assert_eq!(buf.pending_len(), 16);
        let lines = buf.push(b"\"breakpoint-hit\"\n(gdb)\n");
        assert_eq!(
            lines,
            vec![
                "*stopped,reason=\"breakpoint-hit\"".to_string(),
                "(gdb)".to_string()
            ]
        );
    }

    #[test]
    fn framing_strips_crlf() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"~\"hi\"\r\n"), vec!["~\"hi\"".to_string()]);
    }

    #[test]
    fn framing_split_utf8_character() {
        let mut buf = LineBuffer::new();
        let bytes = "héllo\n".as_bytes();
        assert!(buf.push(&bytes[..2]).is_empty());
        assert_eq!(buf.push(&bytes[2..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn framing_finish_flushes_tail() {
        let mut buf = LineBuffer::new();
        buf.push(b"first\nsecond");
        assert_eq!(buf.finish().as_deref(), Some("second"));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn framing_empty_lines_are_kept() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"\n\n"), vec![String::new(), String::new()]);
    }
}
