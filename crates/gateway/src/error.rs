//! Error types for the gateway crate

use hermes_core::ExchangeId;
use hermes_ports::{CodecError, FetchError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::ratelimit::RateLimitError;
use crate::subscription::SubscriptionError;

/// Transport-level errors; any of these on a live socket triggers a reconnect
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Connection closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,
}

/// Engine-level errors surfaced to callers
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Exchange not registered: {0}")]
    UnknownExchange(ExchangeId),

    #[error("Exchange already registered: {0}")]
    DuplicateExchange(ExchangeId),

    #[error("No account source for exchange: {0}")]
    NoAccountSource(ExchangeId),

    #[error("Engine is shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
