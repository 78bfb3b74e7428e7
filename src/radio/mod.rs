//! # Radio Transport Module
//!
//! The transport boundary the session state machine drives.
//!
//! [`DroneRadio`] is the opaque "radio" capability: scan, connect, discover,
//! subscribe, write, disconnect, plus unsolicited-disconnect watching. The
//! production implementation lives in [`ble`] (btleplug); tests drive the
//! session through the mock in [`mocks`].

pub mod ble;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::w2st::protocol::CharacteristicKind;

pub use ble::BleRadio;

/// Opaque identifier of a discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral produced by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralInfo {
    pub id: PeripheralId,

    /// Advertised local name; empty if the peripheral did not advertise one
    pub name: String,

    /// Advertisement RSSI in dBm, when the adapter reported one
    pub rssi: Option<i16>,
}

/// One inbound notification from a subscribed characteristic.
#[derive(Debug, Clone)]
pub struct RadioNotification {
    pub kind: CharacteristicKind,
    pub payload: Bytes,
}

/// The transport capability consumed by the session.
///
/// All operations are completion-based; none may block the caller beyond
/// its own await. Implementations must keep `disconnect` idempotent: asking
/// to drop an unknown or already-closed link is not an error.
#[async_trait]
pub trait DroneRadio: Send + Sync {
    /// Collect advertisements for `timeout` and return the candidates seen.
    ///
    /// An empty list is not an error at this level; the session maps it to
    /// a scan timeout.
    async fn scan(&self, timeout: Duration) -> Result<Vec<PeripheralInfo>>;

    /// Establish a link-level connection to a previously scanned peripheral.
    async fn connect(&self, id: &PeripheralId) -> Result<()>;

    /// Discover services and report which known characteristics are present.
    async fn discover_characteristics(&self, id: &PeripheralId)
        -> Result<Vec<CharacteristicKind>>;

    /// Register a notification subscription for one characteristic.
    ///
    /// Every notification for `kind` is forwarded to `tx` until the link
    /// drops or the receiver is closed.
    async fn subscribe(
        &self,
        id: &PeripheralId,
        kind: CharacteristicKind,
        tx: mpsc::UnboundedSender<RadioNotification>,
    ) -> Result<()>;

    /// Write raw bytes to one characteristic (fire-and-forget semantics).
    async fn write(&self, id: &PeripheralId, kind: CharacteristicKind, bytes: &[u8])
        -> Result<()>;

    /// Tear the link down. Idempotent.
    async fn disconnect(&self, id: &PeripheralId) -> Result<()>;

    /// Register a listener for peripheral-initiated disconnects.
    fn watch_disconnects(&self, tx: mpsc::UnboundedSender<PeripheralId>);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_id_display() {
        let id = PeripheralId::new("hci0/dev_C0_FF_EE_00_00_01");
        assert_eq!(id.to_string(), "hci0/dev_C0_FF_EE_00_00_01");
        assert_eq!(id.as_str(), "hci0/dev_C0_FF_EE_00_00_01");
    }

    #[test]
    fn test_peripheral_info_equality_ignores_nothing() {
        let a = PeripheralInfo {
            id: PeripheralId::new("a"),
            name: "DRN1110".to_string(),
            rssi: Some(-50),
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
