//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode a pipelined run of calls and parse server responses into
//! `Reply` values, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Untrusted Lengths**: Sizes announced by the server bound reads, never
//!    allocations; oversize or over-nested replies are protocol errors.
//! 2. **Buffer Reuse**: Caller provides the line buffer shared by every frame.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::{self, BufRead, Read};

use bytes::Bytes;

use crate::call::Call;
use crate::error::{ClientError, ClientResult, ReplyError};
use crate::reply::{Reply, Value};

/// Largest bulk string the server may announce (the Redis `proto-max-bulk-len` default).
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Upper bound on capacity reserved up front from a declared length.
const MAX_PREALLOC: usize = 1024;
/// Deepest array nesting accepted in a single reply.
const MAX_DEPTH: usize = 32;

/// Encodes one call as a RESP2 array of bulk strings.
pub fn encode_call(call: &Call, out: &mut Vec<u8>) {
    push_header(out, b'*', call.args().len() + 1);
    push_bulk(out, call.command().as_bytes());
    for arg in call.args() {
        push_bulk(out, arg.as_bytes());
    }
}

/// Encodes a pipelined sequence of calls back to back.
pub fn encode_calls(calls: &[Call], out: &mut Vec<u8>) {
    for call in calls {
        encode_call(call, out);
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Reply> {
    read_frame(reader, line_buf, 0)
}

fn read_frame<R: BufRead>(reader: &mut R, line: &mut Vec<u8>, depth: usize) -> ClientResult<Reply> {
    let marker = next_line(reader, line)?;
    let payload = &line[1..];

    match marker {
        b'+' => Ok(Reply::value(Value::Status(Bytes::copy_from_slice(payload)))),
        b'-' => Ok(Reply::error_reply(ReplyError::server(payload))),
        b':' => Ok(Reply::value(Value::Integer(parse_i64(payload)?))),
        b'$' => match declared_len(payload, MAX_BULK_LEN)? {
            Some(len) => read_bulk(reader, len),
            None => Ok(Reply::value(Value::Nil)),
        },
        b'*' => {
            // `*-1` is how EXEC reports an aborted transaction.
            let Some(count) = declared_len(payload, usize::MAX)? else {
                return Ok(Reply::value(Value::Nil));
            };
            if depth >= MAX_DEPTH {
                return Err(ClientError::Protocol);
            }
            let mut elems = Vec::with_capacity(count.min(MAX_PREALLOC));
            for _ in 0..count {
                elems.push(read_frame(reader, line, depth + 1)?);
            }
            Ok(Reply::batch(elems))
        }
        _ => Err(ClientError::Protocol),
    }
}

/// Fills `line` with the next CRLF-terminated line, minus the CRLF, and
/// returns its type marker.
fn next_line<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> ClientResult<u8> {
    line.clear();
    if reader.read_until(b'\n', line)? == 0 || !line.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    line.truncate(line.len() - 2);
    line.first().copied().ok_or(ClientError::Protocol)
}

/// Length header of a bulk string or array; negative means nil.
fn declared_len(digits: &[u8], limit: usize) -> ClientResult<Option<usize>> {
    let len = parse_i64(digits)?;
    if len < 0 {
        return Ok(None);
    }
    match usize::try_from(len) {
        Ok(len) if len <= limit => Ok(Some(len)),
        _ => Err(ClientError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: usize) -> ClientResult<Reply> {
    let framed = len + 2;
    let mut data = Vec::with_capacity(framed.min(MAX_PREALLOC));
    reader.by_ref().take(framed as u64).read_to_end(&mut data)?;
    if data.len() < framed {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    if !data.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    data.truncate(len);
    Ok(Reply::value(Value::Bulk(Bytes::from(data))))
}

fn parse_i64(digits: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(ClientError::Protocol)
}

fn push_header(out: &mut Vec<u8>, marker: u8, len: usize) {
    out.push(marker);
    push_decimal(out, len);
    out.extend_from_slice(b"\r\n");
}

fn push_bulk(out: &mut Vec<u8>, data: &[u8]) {
    push_header(out, b'$', data.len());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Appends `value` in decimal without going through a `String`.
fn push_decimal(out: &mut Vec<u8>, value: usize) {
    let start = out.len();
    let mut rest = value;
    loop {
        out.push(b'0' + (rest % 10) as u8);
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    out[start..].reverse();
}
