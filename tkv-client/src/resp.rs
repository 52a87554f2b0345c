//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and incrementally parse server replies
//! from the connection's read buffer.
//!
//! ## Design Principles
//! 1. **One Tagged Union**: Every reply is a `Reply`; knowing which shape a
//!    command expects is the job of its decoder, not of this module.
//! 2. **Incremental Parsing**: A partial frame leaves the buffer untouched
//!    and reports `None`; the decoder keeps its scan position, so the caller
//!    simply reads more bytes and calls again.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing, oversized lengths and runaway nesting
//!    return protocol errors immediately.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::TransportError;

/// RESP2 reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Null bulk string (`$-1`) or null array (`*-1`).
    Nil,
    /// `+OK` or `+PONG` style replies.
    Status(Bytes),
    /// `-ERR ...` replies.
    Error(Bytes),
    /// `:123` replies.
    Integer(i64),
    /// `$...` bulk strings.
    Bulk(Bytes),
    /// `*...` arrays.
    Array(Vec<Reply>),
}

impl Reply {
    /// Short description of the reply shape, used in decode errors.
    pub fn describe(&self) -> String {
        match self {
            Reply::Nil => "nil".to_string(),
            Reply::Status(text) => format!("status {:?}", String::from_utf8_lossy(text)),
            Reply::Error(text) => format!("error {:?}", String::from_utf8_lossy(text)),
            Reply::Integer(value) => format!("integer {}", value),
            Reply::Bulk(data) => format!("bulk string of {} bytes", data.len()),
            Reply::Array(items) => format!("array of {} elements", items.len()),
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut BytesMut) {
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Deepest array nesting accepted in a reply.
pub const MAX_NESTING: usize = 64;
/// Largest bulk string accepted in a reply, matching the store's own cap.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Largest element count accepted for a single array.
pub const MAX_ARRAY_LEN: usize = 512 * 1024 * 1024;

/// Resumable reply parser.
///
/// A frame is first scanned for completeness, remembering how far the scan
/// got, and only then built, so every byte of a frame split across many reads
/// is scanned once and copied never.
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    /// Offset of the first byte not yet scanned in the current frame.
    scanned: usize,
    /// Elements still missing from each open array, innermost last.
    open: Vec<usize>,
}

impl ReplyDecoder {
    /// Creates a decoder with no partial frame.
    pub fn new() -> Self {
        ReplyDecoder::default()
    }

    /// Parses one reply from the front of `buf`.
    ///
    /// Returns `Ok(None)` without consuming anything when the frame is not
    /// yet complete; the next call resumes where this one stopped, so `buf`
    /// may only grow at the back in between.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Reply>, TransportError> {
        let len = match self.scan(&buf[..])? {
            Some(len) => len,
            None => return Ok(None),
        };
        self.scanned = 0;
        let frame = buf.split_to(len).freeze();
        let (reply, _) = build(&frame, 0)?;
        Ok(Some(reply))
    }

    /// Bytes of the current partial frame already validated.
    pub fn progress(&self) -> usize {
        self.scanned
    }

    fn scan(&mut self, buf: &[u8]) -> Result<Option<usize>, TransportError> {
        loop {
            let pos = self.scanned;
            let (marker, line, next) = match header(buf, pos)? {
                Some(header) => header,
                None => return Ok(None),
            };

            let element_end = match marker {
                b'+' | b'-' => next,
                b':' => {
                    parse_i64(line)?;
                    next
                }
                b'$' => match bulk_len(line)? {
                    None => next,
                    Some(len) => {
                        let end = next + len;
                        if buf.len() < end + 2 {
                            return Ok(None);
                        }
                        if &buf[end..end + 2] != b"\r\n" {
                            return Err(protocol("bulk string missing CRLF"));
                        }
                        end + 2
                    }
                },
                b'*' => match array_len(line)? {
                    Some(len) if len > 0 => {
                        if self.open.len() >= MAX_NESTING {
                            return Err(protocol("reply nested too deeply"));
                        }
                        self.open.push(len);
                        self.scanned = next;
                        continue;
                    }
                    _ => next,
                },
                other => return Err(protocol(&format!("unknown reply marker 0x{:02x}", other))),
            };

            self.scanned = element_end;
            loop {
                match self.open.last_mut() {
                    None => return Ok(Some(element_end)),
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }
}

/// Parses one reply from the front of `buf` with a fresh decoder.
///
/// Returns `Ok(None)` without consuming anything when the frame is not yet
/// complete; consumes exactly one frame otherwise. Callers reading a stream
/// should keep a `ReplyDecoder` instead.
pub fn parse_reply(buf: &mut BytesMut) -> Result<Option<Reply>, TransportError> {
    ReplyDecoder::new().decode(buf)
}

/// Splits the type marker and line off the header at `pos`.
fn header(buf: &[u8], pos: usize) -> Result<Option<(u8, &[u8], usize)>, TransportError> {
    let line_end = match find_crlf(buf, pos) {
        Some(end) => end,
        None => return Ok(None),
    };
    if line_end == pos {
        return Err(protocol("empty reply line"));
    }
    Ok(Some((buf[pos], &buf[pos + 1..line_end], line_end + 2)))
}

fn bulk_len(line: &[u8]) -> Result<Option<usize>, TransportError> {
    match parse_i64(line)? {
        len if len < 0 => Ok(None),
        len if len as u64 > MAX_BULK_LEN as u64 => Err(protocol("bulk string too large")),
        len => Ok(Some(len as usize)),
    }
}

fn array_len(line: &[u8]) -> Result<Option<usize>, TransportError> {
    match parse_i64(line)? {
        len if len < 0 => Ok(None),
        len if len as u64 > MAX_ARRAY_LEN as u64 => Err(protocol("array too large")),
        len => Ok(Some(len as usize)),
    }
}

/// Builds the reply at `pos` of a frame already scanned as complete.
fn build(frame: &Bytes, pos: usize) -> Result<(Reply, usize), TransportError> {
    let (marker, line, next) = header(frame, pos)?.ok_or_else(|| protocol("truncated reply"))?;
    let line_start = pos + 1;
    let line_end = next - 2;

    match marker {
        b'+' => Ok((Reply::Status(frame.slice(line_start..line_end)), next)),
        b'-' => Ok((Reply::Error(frame.slice(line_start..line_end)), next)),
        b':' => Ok((Reply::Integer(parse_i64(line)?), next)),
        b'$' => match bulk_len(line)? {
            None => Ok((Reply::Nil, next)),
            Some(len) => Ok((Reply::Bulk(frame.slice(next..next + len)), next + len + 2)),
        },
        b'*' => match array_len(line)? {
            None => Ok((Reply::Nil, next)),
            Some(len) => {
                let mut items = Vec::with_capacity(len);
                let mut cursor = next;
                for _ in 0..len {
                    let (item, after) = build(frame, cursor)?;
                    items.push(item);
                    cursor = after;
                }
                Ok((Reply::Array(items), cursor))
            }
        },
        other => Err(protocol(&format!("unknown reply marker 0x{:02x}", other))),
    }
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    if buf.len() < start + 2 {
        return None;
    }
    buf[start..]
        .windows(2)
        .position(|pair| pair == b"\r\n")
        .map(|offset| start + offset)
}

fn parse_i64(data: &[u8]) -> Result<i64, TransportError> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(protocol("empty integer")),
    };
    if digits.is_empty() {
        return Err(protocol("integer without digits"));
    }

    // Accumulate on the sign's side so i64::MIN parses.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(protocol("invalid integer"));
        }
        let digit = (b - b'0') as i64;
        value = value
            .checked_mul(10)
            .and_then(|v| if negative { v.checked_sub(digit) } else { v.checked_add(digit) })
            .ok_or_else(|| protocol("integer out of range"))?;
    }
    Ok(value)
}

fn protocol(message: &str) -> TransportError {
    TransportError::Protocol(message.to_string())
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> Result<Option<Reply>, TransportError> {
        let mut buf = BytesMut::from(input);
        parse_reply(&mut buf)
    }

    #[test]
    fn encodes_command() {
        let mut buf = BytesMut::new();
        encode_command(&[&b"GET"[..], &b"key"[..]], &mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_binary_and_empty_arguments() {
        let mut buf = BytesMut::new();
        encode_command(&[&b"SET"[..], &b"\x00\r\n"[..], &b""[..]], &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$3\r\n\x00\r\n\r\n$0\r\n\r\n");
    }

    #[test]
    fn parses_simple_string() {
        assert_eq!(parse(b"+OK\r\n").unwrap(), Some(Reply::Status(Bytes::from_static(b"OK"))));
    }

    #[test]
    fn parses_bulk_string() {
        assert_eq!(
            parse(b"$5\r\nhello\r\n").unwrap(),
            Some(Reply::Bulk(Bytes::from_static(b"hello")))
        );
    }

    #[test]
    fn parses_bulk_with_embedded_crlf() {
        assert_eq!(
            parse(b"$4\r\na\r\nb\r\n").unwrap(),
            Some(Reply::Bulk(Bytes::from_static(b"a\r\nb")))
        );
    }

    #[test]
    fn parses_null_bulk_and_null_array() {
        assert_eq!(parse(b"$-1\r\n").unwrap(), Some(Reply::Nil));
        assert_eq!(parse(b"*-1\r\n").unwrap(), Some(Reply::Nil));
    }

    #[test]
    fn parses_integer() {
        assert_eq!(parse(b":42\r\n").unwrap(), Some(Reply::Integer(42)));
        assert_eq!(parse(b":-2\r\n").unwrap(), Some(Reply::Integer(-2)));
    }

    #[test]
    fn parses_error() {
        assert_eq!(
            parse(b"-ERR bad\r\n").unwrap(),
            Some(Reply::Error(Bytes::from_static(b"ERR bad")))
        );
    }

    #[test]
    fn parses_nested_array() {
        let reply = parse(b"*2\r\n$1\r\n0\r\n*2\r\n$1\r\na\r\n$-1\r\n").unwrap();
        assert_eq!(
            reply,
            Some(Reply::Array(vec![
                Reply::Bulk(Bytes::from_static(b"0")),
                Reply::Array(vec![Reply::Bulk(Bytes::from_static(b"a")), Reply::Nil]),
            ]))
        );
    }

    #[test]
    fn partial_frames_are_not_consumed() {
        let mut buf = BytesMut::from(&b"*2\r\n$1\r\na\r\n$3\r\nbc"[..]);
        assert_eq!(parse_reply(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 17);
        buf.extend_from_slice(b"d\r\n:7\r\n");
        assert_eq!(
            parse_reply(&mut buf).unwrap(),
            Some(Reply::Array(vec![
                Reply::Bulk(Bytes::from_static(b"a")),
                Reply::Bulk(Bytes::from_static(b"bcd")),
            ]))
        );
        assert_eq!(parse_reply(&mut buf).unwrap(), Some(Reply::Integer(7)));
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_unknown_marker() {
        assert!(matches!(parse(b"?x\r\n"), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn large_array_fed_in_chunks_resumes_scanning() {
        let count = 20_000;
        let mut wire = BytesMut::new();
        let items: Vec<String> = (0..count).map(|i| format!("item:{i}")).collect();
        encode_command(&items, &mut wire);
        wire.extend_from_slice(b":1\r\n");

        let mut decoder = ReplyDecoder::new();
        let mut buf = BytesMut::new();
        let mut last_progress = 0;
        let mut replies = Vec::new();
        for chunk in wire.chunks(1024) {
            buf.extend_from_slice(chunk);
            while let Some(reply) = decoder.decode(&mut buf).unwrap() {
                replies.push(reply);
            }
            if replies.is_empty() {
                assert!(decoder.progress() >= last_progress);
                last_progress = decoder.progress();
            }
        }

        assert!(last_progress > wire.len() / 2);
        assert_eq!(replies.len(), 2);
        match &replies[0] {
            Reply::Array(parsed) => {
                assert_eq!(parsed.len(), count);
                assert_eq!(parsed[count - 1], Reply::Bulk(Bytes::from(format!("item:{}", count - 1))));
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(replies[1], Reply::Integer(1));
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_resets_between_frames() {
        let mut decoder = ReplyDecoder::new();
        let mut buf = BytesMut::from(&b"*2\r\n:1\r\n"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b":2\r\n*1\r\n$1\r\nx\r\n");
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Reply::Array(vec![Reply::Integer(1), Reply::Integer(2)]))
        );
        assert_eq!(decoder.progress(), 0);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Reply::Array(vec![Reply::Bulk(Bytes::from_static(b"x"))]))
        );
    }

    #[test]
    fn rejects_runaway_nesting() {
        let input = b"*1\r\n".repeat(MAX_NESTING + 1);
        assert!(matches!(parse(&input), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn rejects_oversized_lengths() {
        assert!(matches!(parse(b"$600000000\r\n"), Err(TransportError::Protocol(_))));
        assert!(matches!(parse(b"*9999999999\r\n"), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn integer_extremes() {
        assert_eq!(parse(b":-9223372036854775808\r\n").unwrap(), Some(Reply::Integer(i64::MIN)));
        assert_eq!(parse(b":9223372036854775807\r\n").unwrap(), Some(Reply::Integer(i64::MAX)));
        assert!(matches!(parse(b":9223372036854775808\r\n"), Err(TransportError::Protocol(_))));
    }
}
