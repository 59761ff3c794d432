#![forbid(unsafe_code)]

pub mod envelope;
pub mod v1;

pub use envelope::{
	DEFAULT_MAX_ENVELOPE_SIZE, ENVELOPE_PREFIX_LEN, Envelope, FLAG_COMPRESSED, FLAG_END_STREAM, FramingError,
	decode_envelope, encode_envelope, encode_envelope_default, try_decode_envelope_from_buffer,
};

/// Connect protocol constants.
pub mod version {
	/// Value of the `Connect-Protocol-Version` header.
	pub const CONNECT_PROTOCOL_VERSION: &str = "1";

	/// Content type for unary JSON calls.
	pub const UNARY_JSON_CONTENT_TYPE: &str = "application/json";

	/// Content type for enveloped (streaming) JSON calls.
	pub const STREAM_JSON_CONTENT_TYPE: &str = "application/connect+json";
}
