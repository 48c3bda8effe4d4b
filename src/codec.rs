//! Record codecs.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Record encoding/decoding error.
#[derive(Debug)]
pub enum CodecError {
    /// Record could not be turned into a token.
    Encode(Box<dyn Error + Send + Sync>),
    /// Token could not be turned back into a record.
    Decode(Box<dyn Error + Send + Sync>),
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            CodecError::Encode(err) => &**err,
            CodecError::Decode(err) => &**err,
        })
    }
}

impl Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            CodecError::Encode(err) => write!(f, "record encoding failed: {}", err),
            CodecError::Decode(err) => write!(f, "record decoding failed: {}", err),
        }
    }
}

/// Codec interface. Maps a record to an opaque text token and back.
///
/// Tokens are stored one per line by the line-oriented stores, so a token must never contain `'\n'`.
pub trait Codec<T> {
    /// Encodes a record into a token.
    fn encode(&self, record: &T) -> Result<String, CodecError>;

    /// Decodes a token produced by [`Codec::encode`].
    fn decode(&self, token: &str) -> Result<T, CodecError>;
}

/// MessagePack + base64 codec.
/// Records are serialized with MessagePack (see https://msgpack.org/) and the bytes are
/// turned into standard base64 text, so tokens are always line-safe.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmpBase64Codec;

impl<T> Codec<T> for RmpBase64Codec
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    fn encode(&self, record: &T) -> Result<String, CodecError> {
        let bytes = rmp_serde::encode::to_vec(record).map_err(|err| CodecError::Encode(Box::new(err)))?;

        return Ok(STANDARD.encode(bytes));
    }

    fn decode(&self, token: &str) -> Result<T, CodecError> {
        let bytes = STANDARD
            .decode(token)
            .map_err(|err| CodecError::Decode(Box::new(err)))?;

        rmp_serde::decode::from_read(bytes.as_slice()).map_err(|err| CodecError::Decode(Box::new(err)))
    }
}
