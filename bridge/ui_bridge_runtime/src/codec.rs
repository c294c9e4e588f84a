//! Length-prefixed msgpack framing.
//!
//! Every frame is a `u32` little-endian payload length followed by exactly that
//! many bytes of msgpack. Frames are concatenated with no other delimiter.

use std::io::{Read, Write};
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

pub const HEADER_LEN: usize = 4;
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let payload = rmp_serde::to_vec_named(value)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(payload)?)
}

pub fn write_frame<T: Serialize>(writer: &mut impl Write, value: &T) -> Result<(), CodecError> {
    let frame = encode_frame(value)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T, CodecError> {
    let mut len_buf = [0_u8; HEADER_LEN];
    reader.read_exact(&mut len_buf)?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    decode_payload(&payload)
}

/// Accumulates stream chunks and yields every complete frame.
///
/// A payload that fails to decode is reported for that frame only; the next
/// frame still starts at the right offset. An oversized length header cannot
/// be resynchronized, so the decoder reports it once and then stays poisoned.
pub struct FrameDecoder<T> {
    buffer: Vec<u8>,
    max_frame: usize,
    poisoned: bool,
    _message: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FrameDecoder<T> {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_LEN)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
            poisoned: false,
            _message: PhantomData,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<T, CodecError>> {
        if self.poisoned {
            return Vec::new();
        }

        self.buffer.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        let mut offset = 0;

        loop {
            let available = &self.buffer[offset..];
            if available.len() < HEADER_LEN {
                break;
            }

            let mut len_buf = [0_u8; HEADER_LEN];
            len_buf.copy_from_slice(&available[..HEADER_LEN]);
            let len = u32::from_le_bytes(len_buf) as usize;

            if len > self.max_frame {
                self.poisoned = true;
                self.buffer.clear();
                decoded.push(Err(CodecError::FrameTooLarge {
                    len,
                    max: self.max_frame,
                }));
                return decoded;
            }

            if available.len() < HEADER_LEN + len {
                break;
            }

            decoded.push(decode_payload(&available[HEADER_LEN..HEADER_LEN + len]));
            offset += HEADER_LEN + len;
        }

        self.buffer.drain(..offset);
        decoded
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl<T: DeserializeOwned> Default for FrameDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}
