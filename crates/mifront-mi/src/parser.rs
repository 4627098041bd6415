//! GDB/MI record parser.
//!
//! [`Parser::parse_line`] consumes one complete output line and yields at
//! most one [`Record`]. The parser keeps no state between lines, so a bad
//! line never affects the next one.

use tracing::trace;

use crate::error::SyntaxError;
use crate::escape::read_c_string;
use crate::record::{
    AsyncClass, AsyncKind, AsyncRecord, Record, ResultClass, ResultRecord, StreamKind,
    StreamRecord, Token,
};
use crate::value::{Results, Value};

/// Default bound on tuple/list nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

const PROMPT: &str = "(gdb)";

/// Stateless line parser with a nesting bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parser {
    max_depth: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a parser with [`DEFAULT_MAX_DEPTH`].
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// Create a parser that rejects values nested deeper than `max_depth`.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    /// The configured nesting bound.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Parse one line of output.
    ///
    /// Returns `Ok(None)` for blank lines and the `(gdb)` prompt. Lines that
    /// do not start with a record marker are output of the program being
    /// debugged and come back verbatim as a [`StreamKind::Target`] record.
    pub fn parse_line(&self, line: &str) -> Result<Option<Record>, SyntaxError> {
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed == PROMPT {
            return Ok(None);
        }

        let bytes = trimmed.as_bytes();
        let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
        let marker = bytes.get(digits).copied();

        let is_record_marker = matches!(marker, Some(b'^' | b'*' | b'+' | b'='));
        let is_stream_marker = digits == 0 && matches!(marker, Some(b'~' | b'@' | b'&'));
        if !is_record_marker && !is_stream_marker {
            trace!(line, "unprefixed output");
            return Ok(Some(target_text(line)));
        }

        let token = if digits > 0 {
            let raw = &trimmed[..digits];
            Some(
                raw.parse::<Token>()
                    .map_err(|_| SyntaxError::InvalidToken(raw.to_string()))?,
            )
        } else {
            None
        };

        let mut cursor = Cursor {
            text: trimmed,
            bytes,
            pos: digits + 1,
            max_depth: self.max_depth,
        };

        let record = match marker {
            Some(b'^') => {
                let name = cursor.read_name("result class")?;
                let class = ResultClass::from_name(name)
                    .ok_or_else(|| SyntaxError::UnknownResultClass(name.to_string()))?;
                let results = cursor.read_results_tail()?;
                Record::Result(ResultRecord {
                    token,
                    class,
                    results,
                })
            }
            Some(m @ (b'*' | b'+' | b'=')) => {
                let kind = AsyncKind::from_marker(m).unwrap_or(AsyncKind::Notify);
                let class = AsyncClass::from_name(cursor.read_name("async class")?);
                let results = cursor.read_results_tail()?;
                Record::Async(AsyncRecord {
                    token,
                    kind,
                    class,
                    results,
                })
            }
            Some(m) => {
                let kind = StreamKind::from_marker(m).unwrap_or(StreamKind::Target);
                let text = cursor.read_string()?;
                cursor.expect_end()?;
                Record::Stream(StreamRecord { kind, text })
            }
            None => return Ok(Some(target_text(line))),
        };

        Ok(Some(record))
    }
}

fn target_text(line: &str) -> Record {
    Record::Stream(StreamRecord {
        kind: StreamKind::Target,
        text: line.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    max_depth: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn char_at(&self, pos: usize) -> char {
        self.text
            .get(pos..)
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER)
    }

    fn unexpected(&self, expected: &'static str) -> SyntaxError {
        if self.pos >= self.bytes.len() {
            SyntaxError::UnexpectedEnd {
                offset: self.pos,
                expected,
            }
        } else {
            SyntaxError::UnexpectedChar {
                offset: self.pos,
                found: self.char_at(self.pos),
                expected,
            }
        }
    }

    fn expect(&mut self, byte: u8, expected: &'static str) -> Result<(), SyntaxError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_end(&self) -> Result<(), SyntaxError> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }

    /// Read a class or variable name: `[A-Za-z0-9_.-]+`.
    fn read_name(&mut self, expected: &'static str) -> Result<&'a str, SyntaxError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.unexpected(expected));
        }
        Ok(&self.text[start..self.pos])
    }

    fn read_string(&mut self) -> Result<String, SyntaxError> {
        if self.peek() != Some(b'"') {
            return Err(self.unexpected("'\"'"));
        }
        let (text, end) = read_c_string(self.bytes, self.pos)?;
        self.pos = end;
        Ok(text)
    }

    /// Read `(',' result)*` up to the end of the line.
    ///
    /// GDB emits multi-location breakpoints as `bkpt={..},{..},{..}`, which
    /// is outside the grammar. A bare tuple after a comma is stored under
    /// the preceding variable's name so those locations are not lost.
    fn read_results_tail(&mut self) -> Result<Results, SyntaxError> {
        let mut results = Results::new();
        let mut last_key: Option<&'a str> = None;
        while self.pos < self.bytes.len() {
            self.expect(b',', "',' or end of line")?;
            match (self.peek(), last_key) {
                (Some(b'{'), Some(key)) => {
                    let value = self.read_value(0)?;
                    results.push(key, value);
                }
                _ => {
                    let (key, value) = self.read_result(0)?;
                    results.push(key, value);
                    last_key = Some(key);
                }
            }
        }
        Ok(results)
    }

    fn read_result(&mut self, depth: usize) -> Result<(&'a str, Value), SyntaxError> {
        let key = self.read_name("variable name")?;
        self.expect(b'=', "'='")?;
        let value = self.read_value(depth)?;
        Ok((key, value))
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, SyntaxError> {
        match self.peek() {
            Some(b'"') => self.read_string().map(Value::Const),
            Some(b'{') => {
                self.enter(depth)?;
                self.read_tuple(depth + 1)
            }
            Some(b'[') => {
                self.enter(depth)?;
                self.read_list(depth + 1)
            }
            _ => Err(self.unexpected("value")),
        }
    }

    fn enter(&self, depth: usize) -> Result<(), SyntaxError> {
        if depth >= self.max_depth {
            return Err(SyntaxError::DepthExceeded {
                limit: self.max_depth,
                offset: self.pos,
            });
        }
        Ok(())
    }

    fn read_tuple(&mut self, depth: usize) -> Result<Value, SyntaxError> {
        self.expect(b'{', "'{'")?;
        let mut results = Results::new();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(Value::Tuple(results));
        }
        loop {
            let (key, value) = self.read_result(depth)?;
            results.push(key, value);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Value::Tuple(results));
                }
                _ => return Err(self.unexpected("',' or '}'")),
            }
        }
    }

    fn read_list(&mut self, depth: usize) -> Result<Value, SyntaxError> {
        self.expect(b'[', "'['")?;
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(Value::List(Vec::new()));
        }

        if matches!(self.peek(), Some(b'"' | b'{' | b'[')) {
            let mut values = Vec::new();
            loop {
                values.push(self.read_value(depth)?);
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b']') => {
                        self.pos += 1;
                        return Ok(Value::List(values));
                    }
                    _ => return Err(self.unexpected("',' or ']'")),
                }
            }
        }

        let mut results = Results::new();
        loop {
            let (key, value) = self.read_result(depth)?;
            results.push(key, value);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Value::ResultList(results));
                }
                _ => return Err(self.unexpected("',' or ']'")),
            }
        }
    }
}
