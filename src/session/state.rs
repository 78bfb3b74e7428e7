//! # Link State and Peripheral Selection
//!
//! The connection lifecycle states and the pluggable candidate-selection
//! strategy the session applies after a scan.

use crate::radio::PeripheralInfo;

/// Connection lifecycle state.
///
/// ```text
/// Idle -> Scanning -> Connecting -> DiscoveringServices -> Streaming
///                                                              |
///   Idle <---------------------- Disconnecting <--------------+
/// ```
///
/// `Error` is an exit usable from any non-`Idle` state; the session passes
/// through it and settles back on `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No link and no activity
    Idle,
    /// Collecting advertisements
    Scanning,
    /// Link-level connect in progress
    Connecting,
    /// GATT discovery and telemetry subscription in progress
    DiscoveringServices,
    /// Telemetry flowing, control writes accepted
    Streaming,
    /// Explicit teardown in progress
    Disconnecting,
    /// A lifecycle operation failed; transient, resolves to Idle
    Error,
}

impl LinkState {
    /// Whether control frames may be transmitted in this state.
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming)
    }
}

/// Strategy for picking one peripheral out of the scan candidates.
///
/// The stock behavior connects to the first candidate discovered, with no
/// signal-strength ranking. That policy is deliberately isolated here so a
/// smarter one (e.g. strongest RSSI) can replace it without touching the
/// state machine.
pub trait SelectPeripheral: Send {
    /// Pick a candidate, or `None` to treat the scan as empty.
    fn select<'a>(&self, candidates: &'a [PeripheralInfo]) -> Option<&'a PeripheralInfo>;
}

/// First-discovered-wins selection (index 0).
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstDiscovered;

impl SelectPeripheral for FirstDiscovered {
    fn select<'a>(&self, candidates: &'a [PeripheralInfo]) -> Option<&'a PeripheralInfo> {
        candidates.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::PeripheralId;

    fn info(id: &str, rssi: i16) -> PeripheralInfo {
        PeripheralInfo {
            id: PeripheralId::new(id),
            name: format!("DRN-{id}"),
            rssi: Some(rssi),
        }
    }

    #[test]
    fn test_first_discovered_picks_index_zero() {
        let candidates = vec![info("a", -80), info("b", -40)];
        let chosen = FirstDiscovered.select(&candidates).unwrap();
        // Not the strongest signal: strictly first-wins.
        assert_eq!(chosen.id, PeripheralId::new("a"));
    }

    #[test]
    fn test_first_discovered_on_empty_list() {
        assert!(FirstDiscovered.select(&[]).is_none());
    }

    #[test]
    fn test_only_streaming_transmits() {
        assert!(LinkState::Streaming.is_streaming());
        for state in [
            LinkState::Idle,
            LinkState::Scanning,
            LinkState::Connecting,
            LinkState::DiscoveringServices,
            LinkState::Disconnecting,
            LinkState::Error,
        ] {
            assert!(!state.is_streaming());
        }
    }
}
