#![forbid(unsafe_code)]

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Default maximum envelope payload size.
pub const DEFAULT_MAX_ENVELOPE_SIZE: usize = 4 * 1024 * 1024; // 4 MiB

/// Flag byte + big-endian u32 length.
pub const ENVELOPE_PREFIX_LEN: usize = 5;

/// Payload is compressed with the negotiated encoding.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Final message of a stream; payload is an end-of-stream trailer.
pub const FLAG_END_STREAM: u8 = 0b0000_0010;

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("envelope exceeds maximum size: len={len} max={max}")]
	EnvelopeTooLarge {
		len: usize,
		max: usize,
	},

	#[error("insufficient data: need={need} have={have}")]
	InsufficientData {
		need: usize,
		have: usize,
	},

	#[error("compressed envelopes are not supported (flags={flags:#04x})")]
	Compressed {
		flags: u8,
	},

	#[error("json codec error: {0}")]
	Json(#[from] serde_json::Error),
}

/// One decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
	pub flags: u8,
	pub payload: Bytes,
}

impl Envelope {
	pub fn is_end_stream(&self) -> bool {
		self.flags & FLAG_END_STREAM != 0
	}

	/// Decode the payload as JSON.
	pub fn decode_json<M: DeserializeOwned>(&self) -> Result<M, FramingError> {
		Ok(serde_json::from_slice(&self.payload)?)
	}
}

/// Encode a JSON message into an enveloped frame.
pub fn encode_envelope<M: Serialize>(msg: &M, flags: u8, max_envelope_size: usize) -> Result<Vec<u8>, FramingError> {
	let payload = serde_json::to_vec(msg)?;
	if payload.len() > max_envelope_size {
		return Err(FramingError::EnvelopeTooLarge {
			len: payload.len(),
			max: max_envelope_size,
		});
	}

	let mut out = BytesMut::with_capacity(ENVELOPE_PREFIX_LEN + payload.len());
	out.put_u8(flags);
	out.put_u32(payload.len() as u32);
	out.put_slice(&payload);
	Ok(out.to_vec())
}

/// Encode a plain message envelope using `DEFAULT_MAX_ENVELOPE_SIZE`.
pub fn encode_envelope_default<M: Serialize>(msg: &M) -> Result<Vec<u8>, FramingError> {
	encode_envelope(msg, 0, DEFAULT_MAX_ENVELOPE_SIZE)
}

fn read_prefix(src: &[u8], max_envelope_size: usize) -> Result<Option<(u8, usize)>, FramingError> {
	if src.len() < ENVELOPE_PREFIX_LEN {
		return Ok(None);
	}

	let flags = src[0];
	let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
	if len > max_envelope_size {
		return Err(FramingError::EnvelopeTooLarge {
			len,
			max: max_envelope_size,
		});
	}
	if flags & FLAG_COMPRESSED != 0 {
		return Err(FramingError::Compressed { flags });
	}

	Ok(Some((flags, len)))
}

/// Decode a single envelope from the start of `src`.
pub fn decode_envelope(src: &[u8], max_envelope_size: usize) -> Result<(Envelope, usize), FramingError> {
	let Some((flags, len)) = read_prefix(src, max_envelope_size)? else {
		return Err(FramingError::InsufficientData {
			need: ENVELOPE_PREFIX_LEN,
			have: src.len(),
		});
	};

	let need = ENVELOPE_PREFIX_LEN + len;
	if src.len() < need {
		return Err(FramingError::InsufficientData { need, have: src.len() });
	}

	let envelope = Envelope {
		flags,
		payload: Bytes::copy_from_slice(&src[ENVELOPE_PREFIX_LEN..need]),
	};
	Ok((envelope, need))
}

/// Try to decode a single envelope from a growable buffer.
///
/// Returns `Ok(None)` until a full envelope is buffered; consumed bytes are split off `buf`.
pub fn try_decode_envelope_from_buffer(
	buf: &mut BytesMut,
	max_envelope_size: usize,
) -> Result<Option<Envelope>, FramingError> {
	let Some((flags, len)) = read_prefix(buf, max_envelope_size)? else {
		return Ok(None);
	};

	let need = ENVELOPE_PREFIX_LEN + len;
	if buf.len() < need {
		return Ok(None);
	}

	let mut frame = buf.split_to(need);
	let payload = frame.split_off(ENVELOPE_PREFIX_LEN).freeze();
	Ok(Some(Envelope { flags, payload }))
}
