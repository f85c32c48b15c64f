//! Wire codecs for typed message payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};

/// Content type tagged on JSON envelopes.
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type tagged on bitcode envelopes.
pub const BITCODE_CONTENT_TYPE: &str = "application/x-bitcode";

/// Encode/decode capability pair selected explicitly by the caller.
///
/// The codec used to decode a delivery is always the one the subscriber was
/// configured with; the envelope's content type is never consulted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Textual structured data via `serde_json`.
    #[default]
    Json,
    /// Compact binary records via `bitcode`.
    Bitcode,
}

impl Codec {
    pub fn content_type(&self) -> &'static str {
        match self {
            Codec::Json => JSON_CONTENT_TYPE,
            Codec::Bitcode => BITCODE_CONTENT_TYPE,
        }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        match self {
            Codec::Json => Ok(serde_json::to_vec(value)?),
            Codec::Bitcode => Ok(bitcode::serialize(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, DecodeError> {
        match self {
            Codec::Json => Ok(serde_json::from_slice(body)?),
            Codec::Bitcode => Ok(bitcode::deserialize(body)?),
        }
    }
}
