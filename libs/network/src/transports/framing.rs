//! Stream framing for TCP adapters
//!
//! Lines framing carries text (one envelope per `\n` terminated line) and
//! yields `Text` payloads; a line that is not UTF-8 is surfaced as `Bytes`.
//! Envelopes with an embedded newline cannot be line framed and are refused.
//! Length-prefixed framing uses a 4-byte big-endian length header and yields
//! `Bytes` payloads.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder, LengthDelimitedCodec,
};
use tracing::warn;
use types::Payload;

/// Maximum frame size accepted by default (16MB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Wire framing of a TCP stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    #[default]
    Lines,
    LengthPrefixed,
}

/// Codec turning a byte stream into payloads and back
#[derive(Debug)]
pub enum FrameCodec {
    Lines(AnyDelimiterCodec),
    LengthPrefixed(LengthDelimitedCodec),
}

impl FrameCodec {
    pub fn new(framing: Framing, max_frame_len: usize) -> Self {
        match framing {
            Framing::Lines => FrameCodec::Lines(AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                max_frame_len,
            )),
            Framing::LengthPrefixed => FrameCodec::LengthPrefixed(
                LengthDelimitedCodec::builder()
                    .length_field_length(4)
                    .max_frame_length(max_frame_len)
                    .new_codec(),
            ),
        }
    }
}

fn lines_error(e: AnyDelimiterCodecError) -> io::Error {
    match e {
        AnyDelimiterCodecError::Io(e) => e,
        AnyDelimiterCodecError::MaxChunkLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line exceeds maximum frame length")
        }
    }
}

fn line_payload(line: Bytes) -> Payload {
    let len = line.strip_suffix(b"\r").map_or(line.len(), <[u8]>::len);
    let line = line.slice(..len);
    match std::str::from_utf8(&line) {
        Ok(text) => Payload::Text(text.to_string()),
        Err(e) => {
            warn!(bytes = line.len(), error = %e, "Received line is not UTF-8, passing raw bytes");
            Payload::Bytes(line)
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Payload;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Payload>, io::Error> {
        match self {
            FrameCodec::Lines(codec) => codec
                .decode(src)
                .map(|line| line.map(line_payload))
                .map_err(lines_error),
            FrameCodec::LengthPrefixed(codec) => Ok(codec
                .decode(src)?
                .map(|frame| Payload::Bytes(frame.freeze()))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Payload>, io::Error> {
        match self {
            FrameCodec::Lines(codec) => codec
                .decode_eof(src)
                .map(|line| line.map(line_payload))
                .map_err(lines_error),
            FrameCodec::LengthPrefixed(codec) => Ok(codec
                .decode_eof(src)?
                .map(|frame| Payload::Bytes(frame.freeze()))),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        match self {
            FrameCodec::Lines(_) => {
                // One trailing newline in the payload is absorbed by the terminator
                let body = item.strip_suffix(b"\n").unwrap_or(&item[..]);
                if body.contains(&b'\n') {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "line framing cannot carry an embedded newline",
                    ));
                }
                dst.reserve(body.len() + 1);
                dst.extend_from_slice(body);
                dst.put_u8(b'\n');
                Ok(())
            }
            FrameCodec::LengthPrefixed(codec) => codec.encode(item, dst),
        }
    }
}
