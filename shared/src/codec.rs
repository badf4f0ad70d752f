//! RESP2 codec for talking to the store
//!
//! Commands go out as arrays of bulk strings:
//! ```text
//! *<argc>\r\n  ( $<len>\r\n <bytes>\r\n ){argc}
//! ```
//! Replies come back as one of the five RESP2 types (`+`, `-`, `:`, `$`, `*`).
//! A reply may arrive split across reads, so decoding never consumes input
//! until a complete reply is available.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest bulk string accepted (the store's own limit)
pub const MAX_BULK_SIZE: i64 = 512 * 1024 * 1024;

/// Arrays nested deeper than this are rejected
pub const MAX_NESTING: usize = 32;

const CRLF: &[u8] = b"\r\n";

/// A decoded store reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Status(String),
    /// `-ERR ...`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`
    Bulk(Bytes),
    /// `$-1` or `*-1`
    Nil,
    /// `*2 ...`
    Array(Vec<Reply>),
}

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unknown reply type byte: 0x{0:02x}")]
    UnknownType(u8),

    #[error("Invalid length or integer: {0:?}")]
    InvalidInteger(String),

    #[error("Bulk string too large: {0} bytes (max: {MAX_BULK_SIZE})")]
    BulkTooLarge(i64),

    #[error("Bulk string not terminated by CRLF")]
    MissingTerminator,

    #[error("Reply nested deeper than {MAX_NESTING} levels")]
    TooDeep,

    #[error("Command has no arguments")]
    EmptyCommand,
}

/// Encode a command and its arguments
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_command_into(args, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a command directly into a provided buffer
pub fn encode_command_into<A: AsRef<[u8]>>(
    args: &[A],
    buf: &mut BytesMut,
) -> Result<(), CodecError> {
    if args.is_empty() {
        return Err(CodecError::EmptyCommand);
    }

    let payload: usize = args.iter().map(|a| a.as_ref().len() + 16).sum();
    buf.reserve(16 + payload);

    put_header(buf, b'*', args.len());
    for arg in args {
        let arg = arg.as_ref();
        put_header(buf, b'$', arg.len());
        buf.put_slice(arg);
        buf.put_slice(CRLF);
    }

    Ok(())
}

fn put_header(buf: &mut BytesMut, kind: u8, len: usize) {
    buf.put_u8(kind);
    buf.put_slice(len.to_string().as_bytes());
    buf.put_slice(CRLF);
}

/// Try to decode one reply from the front of a buffer
///
/// Returns:
/// - `Ok(Some(reply))` if a complete reply was decoded (and consumed)
/// - `Ok(None)` if more data is needed (nothing consumed)
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Reply>, CodecError> {
    match parse(&buf[..], 0)? {
        Some((reply, used)) => {
            buf.advance(used);
            Ok(Some(reply))
        }
        None => Ok(None),
    }
}

/// Parse a reply from `input`, returning it with the number of bytes used
fn parse(input: &[u8], depth: usize) -> Result<Option<(Reply, usize)>, CodecError> {
    if depth > MAX_NESTING {
        return Err(CodecError::TooDeep);
    }

    let Some((&kind, rest)) = input.split_first() else {
        return Ok(None);
    };

    let Some(line_len) = find_crlf(rest) else {
        return Ok(None);
    };
    let line = &rest[..line_len];
    let header_len = 1 + line_len + CRLF.len();

    match kind {
        b'+' => Ok(Some((
            Reply::Status(String::from_utf8_lossy(line).into_owned()),
            header_len,
        ))),
        b'-' => Ok(Some((
            Reply::Error(String::from_utf8_lossy(line).into_owned()),
            header_len,
        ))),
        b':' => Ok(Some((Reply::Integer(parse_int(line)?), header_len))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((Reply::Nil, header_len)));
            }
            if len < 0 {
                return Err(CodecError::InvalidInteger(len.to_string()));
            }
            if len > MAX_BULK_SIZE {
                return Err(CodecError::BulkTooLarge(len));
            }

            let len = len as usize;
            let total = header_len + len + CRLF.len();
            if input.len() < total {
                return Ok(None);
            }
            if &input[header_len + len..total] != CRLF {
                return Err(CodecError::MissingTerminator);
            }

            let data = Bytes::copy_from_slice(&input[header_len..header_len + len]);
            Ok(Some((Reply::Bulk(data), total)))
        }
        b'*' => {
            let count = parse_int(line)?;
            if count == -1 {
                return Ok(Some((Reply::Nil, header_len)));
            }
            if count < 0 {
                return Err(CodecError::InvalidInteger(count.to_string()));
            }

            let mut used = header_len;
            let mut items = Vec::with_capacity((count as usize).min(64));
            for _ in 0..count {
                match parse(&input[used..], depth + 1)? {
                    Some((item, n)) => {
                        items.push(item);
                        used += n;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(items), used)))
        }
        other => Err(CodecError::UnknownType(other)),
    }
}

fn find_crlf(input: &[u8]) -> Option<usize> {
    input.windows(2).position(|w| w == CRLF)
}

fn parse_int(line: &[u8]) -> Result<i64, CodecError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| CodecError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial reply data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next reply from the buffer
    pub fn decode_next(&mut self) -> Result<Option<Reply>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial data, e.g. after a protocol error
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
