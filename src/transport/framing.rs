//! CRLF framing
//!
//! Bytes are accumulated until a delimiter arrives; each complete line is one
//! JSON frame. A trailing partial line stays buffered for the next read.

use bytes::BytesMut;

pub const CRLF: &[u8] = b"\r\n";

/// Split the next complete frame off the front of the buffer, without its
/// delimiter
pub fn next_frame(buffer: &mut BytesMut) -> Option<BytesMut> {
    let pos = buffer.windows(CRLF.len()).position(|w| w == CRLF)?;
    let mut frame = buffer.split_to(pos + CRLF.len());
    frame.truncate(pos);
    Some(frame)
}
