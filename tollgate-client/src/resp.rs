//! RESP (Redis Serialization Protocol) implementation
//!
//! This module provides parsing and serialization for RESP2 data types, plus
//! a helper that encodes a command as an array of bulk strings.

use bytes::{BufMut, Bytes, BytesMut};
use std::str;

use crate::error::{ClientError, Result};

const MAX_BULK_STRING_SIZE: i64 = 512 * 1024 * 1024; // 512MB max
const MAX_ARRAY_SIZE: i64 = 1024 * 1024; // 1M elements max
const MAX_ARRAY_DEPTH: usize = 128; // Max nesting depth

/// RESP value types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :42\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n or $-1\r\n (null)
    ///
    /// Binary safe: cached payloads are opaque bytes.
    BulkString(Option<Bytes>),
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// Short human-readable form for error messages
    pub(crate) fn describe(&self) -> String {
        match self {
            RespValue::SimpleString(s) => format!("+{s}"),
            RespValue::Error(e) => format!("-{e}"),
            RespValue::Integer(n) => format!(":{n}"),
            RespValue::BulkString(Some(b)) => format!("${} bytes", b.len()),
            RespValue::BulkString(None) => "nil".to_string(),
            RespValue::Array(items) => format!("array of {}", items.len()),
        }
    }
}

/// RESP protocol parser
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Parse a RESP value from bytes
    /// Returns Some((value, bytes_consumed)) if a complete value is found
    /// Returns None if more data is needed
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<(RespValue, usize)>> {
        if data.is_empty() {
            return Ok(None);
        }

        match data[0] {
            b'+' => Self::parse_simple_string(data),
            b'-' => Self::parse_error(data),
            b':' => Self::parse_integer(data),
            b'$' => Self::parse_bulk_string(data),
            b'*' => self.parse_array(data),
            other => Err(ClientError::Protocol(format!(
                "invalid RESP type marker: {:?}",
                other as char
            ))),
        }
    }

    fn parse_simple_string(data: &[u8]) -> Result<Option<(RespValue, usize)>> {
        match Self::read_line(data) {
            Some((line, consumed)) => Ok(Some((
                RespValue::SimpleString(utf8(&line[1..])?.to_string()),
                consumed,
            ))),
            None => Ok(None),
        }
    }

    fn parse_error(data: &[u8]) -> Result<Option<(RespValue, usize)>> {
        match Self::read_line(data) {
            Some((line, consumed)) => Ok(Some((
                RespValue::Error(utf8(&line[1..])?.to_string()),
                consumed,
            ))),
            None => Ok(None),
        }
    }

    fn parse_integer(data: &[u8]) -> Result<Option<(RespValue, usize)>> {
        match Self::read_line(data) {
            Some((line, consumed)) => Ok(Some((RespValue::Integer(number(&line[1..])?), consumed))),
            None => Ok(None),
        }
    }

    fn parse_bulk_string(data: &[u8]) -> Result<Option<(RespValue, usize)>> {
        let Some((length_line, mut consumed)) = Self::read_line(data) else {
            return Ok(None);
        };

        let length = number(&length_line[1..])?;

        if length == -1 {
            // Null bulk string
            return Ok(Some((RespValue::BulkString(None), consumed)));
        }

        // Prevent integer overflow and enforce size limits
        if !(0..=MAX_BULK_STRING_SIZE).contains(&length) {
            return Err(ClientError::Protocol(format!(
                "invalid bulk string length: {length}"
            )));
        }

        let length = length as usize;

        // Check if we have enough data for the string + CRLF
        if data.len() < consumed + length + 2 {
            return Ok(None);
        }

        if &data[consumed + length..consumed + length + 2] != b"\r\n" {
            return Err(ClientError::Protocol(
                "bulk string not terminated by CRLF".to_string(),
            ));
        }

        let payload = Bytes::copy_from_slice(&data[consumed..consumed + length]);
        consumed += length + 2; // String + CRLF

        Ok(Some((RespValue::BulkString(Some(payload)), consumed)))
    }

    fn parse_array(&mut self, data: &[u8]) -> Result<Option<(RespValue, usize)>> {
        // Check recursion depth
        if self.depth >= MAX_ARRAY_DEPTH {
            return Err(ClientError::Protocol(
                "maximum array nesting depth exceeded".to_string(),
            ));
        }

        let Some((count_line, mut consumed)) = Self::read_line(data) else {
            return Ok(None);
        };

        let count = number(&count_line[1..])?;

        if count == -1 {
            // Null array
            return Ok(Some((RespValue::Array(vec![]), consumed)));
        }

        // Prevent integer overflow and enforce size limits
        if !(0..=MAX_ARRAY_SIZE).contains(&count) {
            return Err(ClientError::Protocol(format!("invalid array size: {count}")));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count.min(1024));

        self.depth += 1;
        let outcome = (|| -> Result<bool> {
            for _ in 0..count {
                match self.parse(&data[consumed..])? {
                    Some((value, element_consumed)) => {
                        elements.push(value);
                        consumed += element_consumed;
                    }
                    None => return Ok(false),
                }
            }
            Ok(true)
        })();
        self.depth -= 1;

        match outcome? {
            true => Ok(Some((RespValue::Array(elements), consumed))),
            // Need more data
            false => Ok(None),
        }
    }

    /// Read a line terminated by CRLF
    /// Returns Some((line_without_crlf, total_bytes_consumed)) or None if incomplete
    fn read_line(data: &[u8]) -> Option<(&[u8], usize)> {
        data.windows(2)
            .position(|pair| pair == b"\r\n")
            .map(|i| (&data[..i], i + 2))
    }
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

fn utf8(raw: &[u8]) -> Result<&str> {
    str::from_utf8(raw).map_err(|e| ClientError::Protocol(format!("invalid UTF-8: {e}")))
}

fn number(raw: &[u8]) -> Result<i64> {
    let text = utf8(raw)?;
    text.parse()
        .map_err(|_| ClientError::Protocol(format!("invalid integer: {text:?}")))
}

/// RESP protocol serializer
pub struct RespSerializer;

impl RespSerializer {
    /// Serialize a RESP value to bytes
    pub fn serialize(value: &RespValue) -> Vec<u8> {
        let mut buf = BytesMut::new();
        Self::write(value, &mut buf);
        buf.to_vec()
    }

    fn write(value: &RespValue, buf: &mut BytesMut) {
        match value {
            RespValue::SimpleString(s) => line(buf, b'+', s.as_bytes()),
            RespValue::Error(s) => line(buf, b'-', s.as_bytes()),
            RespValue::Integer(n) => line(buf, b':', n.to_string().as_bytes()),
            RespValue::BulkString(Some(data)) => {
                line(buf, b'$', data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(None) => buf.put_slice(b"$-1\r\n"),
            RespValue::Array(elements) => {
                line(buf, b'*', elements.len().to_string().as_bytes());
                for element in elements {
                    Self::write(element, buf);
                }
            }
        }
    }

    /// Encode a command the way clients send it: an array of bulk strings
    pub fn command(args: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        line(&mut buf, b'*', args.len().to_string().as_bytes());
        for arg in args {
            line(&mut buf, b'$', arg.len().to_string().as_bytes());
            buf.put_slice(arg);
            buf.put_slice(b"\r\n");
        }
        buf.to_vec()
    }
}

fn line(buf: &mut BytesMut, marker: u8, body: &[u8]) {
    buf.put_u8(marker);
    buf.put_slice(body);
    buf.put_slice(b"\r\n");
}
