// Length-delimited message framing over TCP.
//
// Wire format: a 4-byte big-endian length prefix followed by exactly that many
// bytes of UTF-8 JSON. The prefix is always network order so hosts of either
// endianness interoperate.
//
// `read_frame` distinguishes the three ways a read can end:
// - a whole frame (`FrameRead::Frame`),
// - a clean close before any header byte (`FrameRead::Closed`), which is the
//   peer hanging up between messages and not an error,
// - a short header or short body (`FrameError::Truncated*`), which means the
//   stream is desynchronized and the connection has to be abandoned.
//
// `encode_frame` builds header and payload into one buffer so a sender can
// hand the whole frame to a single `write_all`.
//
// A `MAX_MESSAGE_SIZE` constant (16 MB) protects against unbounded allocation
// from malformed or malicious length prefixes.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum allowed message size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Length of the frame header in bytes.
pub const HEADER_LEN: usize = 4;

/// Result of a successful read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead {
    Frame(Vec<u8>),
    /// The peer closed the stream on a frame boundary.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error while framing: {0}")]
    Io(#[from] io::Error),
    #[error("short frame header: got {got} of 4 bytes")]
    TruncatedHeader { got: usize },
    #[error("short frame body: got {got} of {expected} bytes")]
    TruncatedBody { expected: usize, got: usize },
    #[error("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})")]
    TooLarge { len: usize },
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Build a complete frame: header then payload.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or(FrameError::TooLarge { len: payload.len() })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Serialize `value` to JSON and frame it.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(value)?;
    encode_frame(&json)
}

/// Write one framed message.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> Result<(), FrameError> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed message.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<FrameRead, FrameError> {
    let mut header = [0u8; HEADER_LEN];
    match read_full(reader, &mut header)? {
        0 => return Ok(FrameRead::Closed),
        HEADER_LEN => {}
        got => return Err(FrameError::TruncatedHeader { got }),
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge { len: len as usize });
    }
    let expected = len as usize;
    let mut body = vec![0u8; expected];
    let got = read_full(reader, &mut body)?;
    if got < expected {
        return Err(FrameError::TruncatedBody { expected, got });
    }
    Ok(FrameRead::Frame(body))
}

/// Decode a frame payload as JSON.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Fill `buf` as far as the stream allows. Returns the number of bytes read,
/// which is less than `buf.len()` only when the stream hit EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
