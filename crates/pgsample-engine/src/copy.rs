//! COPY text format encoding
//!
//! One row per line, columns separated by TAB, `\N` for NULL. Inside a value
//! backslash, TAB, LF and CR are backslash-escaped; every other byte is
//! written unchanged.

use pgsample_catalog::Row;
use std::io::{self, Write};

/// Reusable line encoder.
///
/// Keeps its buffer between rows so streaming a large table does not
/// allocate per row.
#[derive(Debug, Default)]
pub struct CopyRowEncoder {
    buf: Vec<u8>,
}

impl CopyRowEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one row, including the trailing newline
    pub fn encode<S: AsRef<str>>(&mut self, row: &[Option<S>]) -> &[u8] {
        self.buf.clear();
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                self.buf.push(b'\t');
            }
            match value {
                Some(v) => escape_copy_value(v.as_ref(), &mut self.buf),
                None => self.buf.extend_from_slice(b"\\N"),
            }
        }
        self.buf.push(b'\n');
        &self.buf
    }

    /// Encode `row` and write it to `out`
    pub fn write_row<W: Write + ?Sized, S: AsRef<str>>(
        &mut self,
        out: &mut W,
        row: &[Option<S>],
    ) -> io::Result<()> {
        let line = self.encode(row);
        out.write_all(line)
    }
}

/// Append the escaped form of `value` to `buf`
pub fn escape_copy_value(value: &str, buf: &mut Vec<u8>) {
    for byte in value.bytes() {
        match byte {
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            _ => buf.push(byte),
        }
    }
}

/// Errors from [`decode_copy_line`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Line ends with an unfinished backslash escape")]
    TrailingBackslash,

    #[error("Column {column} is not valid UTF-8 after unescaping")]
    InvalidUtf8 { column: usize },
}

/// Parse one COPY text line back into values.
///
/// A single trailing newline is ignored. Besides the escapes the encoder
/// produces this accepts `\b`, `\f`, `\v`, octal (`\NNN`) and hex (`\xHH`)
/// escapes; a backslash before any other character yields that character.
/// A line always has at least one column, so a zero-column row does not
/// survive the round trip.
pub fn decode_copy_line(line: &str) -> Result<Row, DecodeError> {
    let line = line.strip_suffix('\n').unwrap_or(line);

    line.split('\t')
        .enumerate()
        .map(|(column, field)| {
            if field == "\\N" {
                return Ok(None);
            }
            let bytes = unescape_field(field.as_bytes())?;
            String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| DecodeError::InvalidUtf8 { column })
        })
        .collect()
}

fn unescape_field(field: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;

    while i < field.len() {
        let byte = field[i];
        i += 1;
        if byte != b'\\' {
            out.push(byte);
            continue;
        }

        let Some(&escape) = field.get(i) else {
            return Err(DecodeError::TrailingBackslash);
        };
        i += 1;

        match escape {
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(escape - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match field.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                // \777 wraps like the server's reader
                out.push((value & 0xff) as u8);
            }
            b'x' => match field.get(i).and_then(|&d| hex_digit(d)) {
                Some(first) => {
                    i += 1;
                    let mut value = first;
                    if let Some(second) = field.get(i).and_then(|&d| hex_digit(d)) {
                        value = value * 16 + second;
                        i += 1;
                    }
                    out.push(value);
                }
                None => out.push(b'x'),
            },
            other => out.push(other),
        }
    }

    Ok(out)
}

fn hex_digit(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}
