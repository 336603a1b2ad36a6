use hermes_core::{AssetType, ExchangeId};
use thiserror::Error;

/// Failure of a REST fetch made by an adapter
///
/// Infrastructure implementations convert their transport errors to this
/// type; the engine passes it through unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error {code}: {message}")]
    Api { code: i32, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{exchange} does not support {asset}")]
    Unsupported {
        exchange: ExchangeId,
        asset: AssetType,
    },
}

/// Failure to encode a request or decode an inbound message
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
