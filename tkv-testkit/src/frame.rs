//! # Server-Side Framing
//!
//! Request parsing and reply encoding for the test servers. Requests are
//! RESP2 arrays of bulk strings; anything else is a protocol error and the
//! connection is dropped.

use bytes::{Bytes, BytesMut};

/// One request: command name followed by its arguments.
pub type Args = Vec<Bytes>;

/// Malformed request bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolError;

/// Pops one complete request off `buffer`, or returns `Ok(None)` when more
/// bytes are needed.
pub fn parse_request(buffer: &mut BytesMut) -> Result<Option<Args>, ProtocolError> {
    let mut pos = 0;
    let Some(line) = read_line(buffer, &mut pos) else {
        return Ok(None);
    };
    if line.first() != Some(&b'*') {
        return Err(ProtocolError);
    }
    let count = parse_len(&line[1..])?;

    let mut spans = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(line) = read_line(buffer, &mut pos) else {
            return Ok(None);
        };
        if line.first() != Some(&b'$') {
            return Err(ProtocolError);
        }
        let len = parse_len(&line[1..])?;
        if buffer.len() < pos + len + 2 {
            return Ok(None);
        }
        if &buffer[pos + len..pos + len + 2] != b"\r\n" {
            return Err(ProtocolError);
        }
        spans.push((pos, len));
        pos += len + 2;
    }

    let frame = buffer.split_to(pos).freeze();
    Ok(Some(
        spans
            .into_iter()
            .map(|(start, len)| frame.slice(start..start + len))
            .collect(),
    ))
}

fn read_line<'a>(buffer: &'a BytesMut, pos: &mut usize) -> Option<&'a [u8]> {
    let rest = &buffer[*pos..];
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    *pos += end + 2;
    Some(&rest[..end])
}

fn parse_len(data: &[u8]) -> Result<usize, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError);
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(ProtocolError);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}

/// Reply value as the store sends it.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Simple(&'static str),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    NullBulk,
    NullArray,
    Array(Vec<Frame>),
}

impl Frame {
    pub fn ok() -> Self {
        Frame::Simple("OK")
    }

    pub fn err(message: impl Into<String>) -> Self {
        Frame::Error(message.into())
    }

    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        Frame::Bulk(Bytes::copy_from_slice(data.as_ref()))
    }

    pub fn optional(data: Option<Bytes>) -> Self {
        data.map_or(Frame::NullBulk, Frame::Bulk)
    }

    pub fn bulks<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Frame::Array(items.into_iter().map(Frame::Bulk).collect())
    }

    /// Appends the RESP2 encoding of `self` to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Simple(message) => {
                out.push(b'+');
                out.extend_from_slice(message.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::Error(message) => {
                out.push(b'-');
                out.extend_from_slice(message.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::Integer(value) => {
                out.push(b':');
                out.extend_from_slice(value.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Frame::NullBulk => out.extend_from_slice(b"$-1\r\n"),
            Frame::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Frame::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Encodes `self` into a fresh buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// ASCII case-insensitive comparison for command names and keywords.
pub fn eq_ignore_ascii_case(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_and_partial_requests() {
        let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n*1\r\n$4\r\nPI"[..]);
        let args = parse_request(&mut buffer).unwrap().unwrap();
        assert_eq!(args, vec![Bytes::from_static(b"GET"), Bytes::from_static(b"k")]);
        assert_eq!(parse_request(&mut buffer).unwrap(), None);
        buffer.extend_from_slice(b"NG\r\n");
        let args = parse_request(&mut buffer).unwrap().unwrap();
        assert_eq!(args, vec![Bytes::from_static(b"PING")]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_inline_commands() {
        let mut buffer = BytesMut::from(&b"PING\r\n"[..]);
        assert_eq!(parse_request(&mut buffer), Err(ProtocolError));
    }

    #[test]
    fn encodes_nested_arrays() {
        let frame = Frame::Array(vec![Frame::bulk("k"), Frame::Integer(3), Frame::NullBulk]);
        assert_eq!(frame.to_vec(), b"*3\r\n$1\r\nk\r\n:3\r\n$-1\r\n");
        assert_eq!(Frame::NullArray.to_vec(), b"*-1\r\n");
    }
}
