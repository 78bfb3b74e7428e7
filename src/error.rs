//! # Error Types
//!
//! Custom error types for Drone Link using `thiserror`.
//!
//! Connection-lifecycle errors force the session back to `Idle`; decode and
//! write errors are reported without tearing the session down. No variant is
//! fatal to the process; everything is recoverable by re-issuing an
//! enable-connect request.

use thiserror::Error;

use crate::w2st::protocol::CharacteristicKind;

/// Main error type for Drone Link
#[derive(Debug, Error)]
pub enum DroneLinkError {
    /// Scan finished without producing a candidate peripheral
    #[error("scan timed out with no candidate peripherals")]
    ScanTimeout,

    /// Link-level connect failed or timed out
    #[error("failed to connect to peripheral: {0}")]
    ConnectFailed(String),

    /// Services/characteristics could not be discovered
    #[error("service discovery failed: {0}")]
    ServiceDiscoveryFailed(String),

    /// Telemetry notification subscription could not be registered
    #[error("telemetry subscription failed: {0}")]
    SubscriptionFailed(String),

    /// A control frame write was rejected by the transport
    #[error("control frame write failed: {0}")]
    WriteFailed(String),

    /// A telemetry payload did not match its record's fixed layout
    #[error("failed to decode {kind:?} record: {reason}")]
    Decode {
        kind: CharacteristicKind,
        reason: String,
    },

    /// The peripheral dropped the link without being asked to
    #[error("peripheral disconnected unexpectedly")]
    UnsolicitedDisconnect,

    /// Adapter-level Bluetooth errors (no adapter, stack failures)
    #[error("bluetooth error: {0}")]
    Bluetooth(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Drone Link
pub type Result<T> = std::result::Result<T, DroneLinkError>;
