//! # W2ST Protocol Constants and Types
//!
//! Core protocol definitions for the W2ST (BlueST) link to the ST drone.
//!
//! All multi-byte telemetry fields are little-endian. Every telemetry record
//! starts with a 16-bit tick, a wrapping sequence counter the firmware
//! increments per notification.

use std::collections::VecDeque;

use uuid::{uuid, Uuid};

/// W2ST primary service exposed by the drone firmware.
pub const W2ST_SERVICE_UUID: Uuid = uuid!("00000000-0001-11e1-9ab4-0002a5d5c51b");

/// BlueST debug console service (stdout/stderr text streams).
pub const CONSOLE_SERVICE_UUID: Uuid = uuid!("00000000-000e-11e1-9ab4-0002a5d5c51b");

/// Arming status characteristic (tick + armed flag).
pub const ARMING_CHAR_UUID: Uuid = uuid!("20000000-0001-11e1-ac36-0002a5d5c51b");

/// Environment characteristic (pressure, battery, temperature, RSSI).
pub const ENVIRONMENT_CHAR_UUID: Uuid = uuid!("00160000-0001-11e1-ac36-0002a5d5c51b");

/// AHRS characteristic (acceleration, gyrometer, magnetometer/axis).
pub const AHRS_CHAR_UUID: Uuid = uuid!("00e00000-0001-11e1-ac36-0002a5d5c51b");

/// Console stdout characteristic.
pub const STDOUT_CHAR_UUID: Uuid = uuid!("00000001-000e-11e1-ac36-0002a5d5c51b");

/// Console stderr characteristic.
pub const STDERR_CHAR_UUID: Uuid = uuid!("00000002-000e-11e1-ac36-0002a5d5c51b");

/// Joystick/control characteristic the central writes control frames to.
pub const CONTROL_CHAR_UUID: Uuid = uuid!("00008000-0001-11e1-ac36-0002a5d5c51b");

/// Arming record payload size: tick(2) + enabled(1).
pub const ARMING_PAYLOAD_LEN: usize = 3;

/// Environment record payload size:
/// tick(2) + pressure(2) + battery(2) + temperature(2) + rssi(2).
pub const ENVIRONMENT_PAYLOAD_LEN: usize = 10;

/// AHRS record payload size: tick(2) + 3 × (x, y, z as i16).
pub const AHRS_PAYLOAD_LEN: usize = 20;

/// Control frame size: reserved(1) + 4 axes + reserved(1) + flags(1).
pub const CONTROL_FRAME_LEN: usize = 7;

/// Takeoff flag bit in control frame byte 6.
pub const FLAG_TAKEOFF: u8 = 0x01;

/// Calibrate flag bit in control frame byte 6.
pub const FLAG_CALIBRATE: u8 = 0x02;

/// Armed flag bit in control frame byte 6.
pub const FLAG_ARMED: u8 = 0x04;

/// Neutral/center value for rudder, aileron and elevator.
pub const AXIS_CENTER: u8 = 128;

/// Pressure scaling: raw value is hPa × 100.
pub const PRESSURE_SCALE: f32 = 100.0;

/// Battery scaling: raw value is percent × 10.
pub const BATTERY_SCALE: f32 = 10.0;

/// Temperature scaling: raw value is °C × 10.
pub const TEMPERATURE_SCALE: f32 = 10.0;

/// RSSI scaling: raw value is dBm × 10.
pub const RSSI_SCALE: f32 = 10.0;

/// A complete outbound control frame.
pub type ControlFrame = [u8; CONTROL_FRAME_LEN];

/// The characteristics the engine knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicKind {
    /// Arming status notifications
    Arming,
    /// Environment notifications (pressure, battery, temperature, RSSI)
    Environment,
    /// AHRS notifications (acceleration, gyrometer, magnetometer/axis)
    Ahrs,
    /// Firmware stdout text stream
    Stdout,
    /// Firmware stderr text stream
    Stderr,
    /// Control frame write channel
    Control,
}

impl CharacteristicKind {
    /// The BLE characteristic UUID this kind maps to.
    pub fn uuid(self) -> Uuid {
        match self {
            Self::Arming => ARMING_CHAR_UUID,
            Self::Environment => ENVIRONMENT_CHAR_UUID,
            Self::Ahrs => AHRS_CHAR_UUID,
            Self::Stdout => STDOUT_CHAR_UUID,
            Self::Stderr => STDERR_CHAR_UUID,
            Self::Control => CONTROL_CHAR_UUID,
        }
    }

    /// Map a discovered characteristic UUID back to its kind.
    ///
    /// Returns `None` for characteristics the engine does not use.
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        match uuid {
            ARMING_CHAR_UUID => Some(Self::Arming),
            ENVIRONMENT_CHAR_UUID => Some(Self::Environment),
            AHRS_CHAR_UUID => Some(Self::Ahrs),
            STDOUT_CHAR_UUID => Some(Self::Stdout),
            STDERR_CHAR_UUID => Some(Self::Stderr),
            CONTROL_CHAR_UUID => Some(Self::Control),
            _ => None,
        }
    }

    /// Whether this characteristic delivers inbound notifications.
    ///
    /// Everything except the control write channel is subscribed to.
    pub fn is_notifying(self) -> bool {
        !matches!(self, Self::Control)
    }
}

/// Whether `next` is the same tick as `previous` or a later one, taking
/// 16-bit wraparound into account.
///
/// Ticks are monotonically non-decreasing per stream modulo 2^16, so a
/// consumer must not treat `next < previous` as stale data near a wrap.
/// A tick is considered newer if it is at most half the counter space
/// ahead of the previous one.
pub fn tick_newer(previous: u16, next: u16) -> bool {
    next.wrapping_sub(previous) < 0x8000
}

/// A 3-axis sensor sample (raw little-endian i16 values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vector3 {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl Vector3 {
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }
}

/// Arming status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArmingRecord {
    /// Wrapping sequence counter
    pub tick: u16,

    /// Whether the flight controller reports itself armed
    pub enabled: bool,
}

/// Environment record.
///
/// Raw fields keep the firmware's fixed-point scaling; use the accessor
/// methods for physical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvironmentRecord {
    /// Wrapping sequence counter
    pub tick: u16,

    /// Pressure in hPa × 100
    pub pressure: u16,

    /// Battery level in percent × 10
    pub battery: u16,

    /// Temperature in °C × 10
    pub temperature: i16,

    /// Link RSSI in dBm × 10
    pub rssi: i16,
}

impl EnvironmentRecord {
    /// Pressure in hPa.
    pub fn pressure_hpa(&self) -> f32 {
        f32::from(self.pressure) / PRESSURE_SCALE
    }

    /// Battery level in percent.
    pub fn battery_percent(&self) -> f32 {
        f32::from(self.battery) / BATTERY_SCALE
    }

    /// Temperature in °C.
    pub fn temperature_celsius(&self) -> f32 {
        f32::from(self.temperature) / TEMPERATURE_SCALE
    }

    /// RSSI in dBm.
    pub fn rssi_dbm(&self) -> f32 {
        f32::from(self.rssi) / RSSI_SCALE
    }
}

/// The third sensor triple of an AHRS record.
///
/// AHRS firmware reports a magnetometer sample (gauss × 1000); the
/// pre-AHRS firmware variant reports an orientation axis triple instead.
/// The wire layout is identical, only the meaning differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AhrsAux {
    /// Magnetometer sample in gauss × 1000 (AHRS firmware)
    Magnetometer(Vector3),
    /// Orientation axis triple (pre-AHRS firmware)
    Axis(Vector3),
}

impl Default for AhrsAux {
    fn default() -> Self {
        Self::Magnetometer(Vector3::default())
    }
}

/// Which firmware flavor the AHRS characteristic speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AhrsVariant {
    /// Third triple is a magnetometer sample (canonical)
    #[default]
    Magnetometer,
    /// Third triple is an orientation axis (pre-AHRS firmware)
    Axis,
}

/// AHRS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AhrsRecord {
    /// Wrapping sequence counter
    pub tick: u16,

    /// Acceleration in g × 1000
    pub acceleration: Vector3,

    /// Angular rate in dps × 1000
    pub gyrometer: Vector3,

    /// Magnetometer or axis triple, depending on firmware variant
    pub aux: AhrsAux,
}

/// Bounded accumulator for the firmware's console text streams.
///
/// The drone pushes free-form UTF-8 chunks over the debug console
/// characteristics for as long as the link is up, so the buffer keeps only
/// the most recent `capacity` bytes and drops the oldest on overflow.
#[derive(Debug, Clone)]
pub struct ConsoleBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl ConsoleBuffer {
    /// Create an empty buffer that retains at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a raw chunk, evicting the oldest bytes past capacity.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend(bytes.iter().copied());
        let excess = self.data.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.data.drain(..excess);
        }
    }

    /// Current number of retained bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Maximum number of retained bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained bytes as (lossy) UTF-8 text.
    pub fn to_text(&self) -> String {
        let bytes: Vec<u8> = self.data.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Aggregate snapshot of the latest telemetry per record type.
///
/// Updated record-by-record as notifications arrive; a malformed payload
/// never overwrites the last good record of its type. On disconnect the
/// snapshot is frozen, not zeroed, so consumers keep last-known values.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub arming: ArmingRecord,
    pub environment: EnvironmentRecord,
    pub ahrs: AhrsRecord,
    pub stdout: ConsoleBuffer,
    pub stderr: ConsoleBuffer,
}

impl Telemetry {
    /// New empty snapshot with the given console retention per stream.
    pub fn new(console_capacity: usize) -> Self {
        Self {
            arming: ArmingRecord::default(),
            environment: EnvironmentRecord::default(),
            ahrs: AhrsRecord::default(),
            stdout: ConsoleBuffer::new(console_capacity),
            stderr: ConsoleBuffer::new(console_capacity),
        }
    }
}

/// Control axes addressable by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAxis {
    Rudder,
    Throttle,
    Aileron,
    Elevator,
}

/// Boolean control flags addressable by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    Takeoff,
    Calibrate,
    Armed,
}

/// Mutable control-stick and flag state owned by the session.
///
/// Created with neutral defaults at session start, mutated on every control
/// input event, serialized to a [`ControlFrame`] on every mutation while
/// streaming and discarded on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub rudder: u8,
    pub throttle: u8,
    pub aileron: u8,
    pub elevator: u8,
    pub takeoff: bool,
    pub calibrate: bool,
    pub armed: bool,
}

impl ControlState {
    /// Neutral state: sticks centered, throttle at its idle value
    /// (0 or 1 depending on firmware variant), all flags clear.
    pub fn neutral(throttle_idle: u8) -> Self {
        Self {
            rudder: AXIS_CENTER,
            throttle: throttle_idle,
            aileron: AXIS_CENTER,
            elevator: AXIS_CENTER,
            takeoff: false,
            calibrate: false,
            armed: false,
        }
    }

    /// Set one axis to a raw byte value.
    pub fn set_axis(&mut self, axis: ControlAxis, value: u8) {
        match axis {
            ControlAxis::Rudder => self.rudder = value,
            ControlAxis::Throttle => self.throttle = value,
            ControlAxis::Aileron => self.aileron = value,
            ControlAxis::Elevator => self.elevator = value,
        }
    }

    /// Set one boolean flag.
    pub fn set_flag(&mut self, flag: ControlFlag, value: bool) {
        match flag {
            ControlFlag::Takeoff => self.takeoff = value,
            ControlFlag::Calibrate => self.calibrate = value,
            ControlFlag::Armed => self.armed = value,
        }
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::neutral(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_length_constants() {
        assert_eq!(ARMING_PAYLOAD_LEN, 3);
        assert_eq!(ENVIRONMENT_PAYLOAD_LEN, 10);
        assert_eq!(AHRS_PAYLOAD_LEN, 20);
        assert_eq!(CONTROL_FRAME_LEN, 7);
    }

    #[test]
    fn test_flag_bits_are_distinct() {
        assert_eq!(FLAG_TAKEOFF, 0b001);
        assert_eq!(FLAG_CALIBRATE, 0b010);
        assert_eq!(FLAG_ARMED, 0b100);
    }

    #[test]
    fn test_characteristic_kind_uuid_round_trip() {
        let kinds = [
            CharacteristicKind::Arming,
            CharacteristicKind::Environment,
            CharacteristicKind::Ahrs,
            CharacteristicKind::Stdout,
            CharacteristicKind::Stderr,
            CharacteristicKind::Control,
        ];
        for kind in kinds {
            assert_eq!(CharacteristicKind::from_uuid(kind.uuid()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_uuid_maps_to_none() {
        let unknown = uuid!("12345678-0001-11e1-ac36-0002a5d5c51b");
        assert_eq!(CharacteristicKind::from_uuid(unknown), None);
    }

    #[test]
    fn test_control_is_the_only_non_notifying_kind() {
        assert!(!CharacteristicKind::Control.is_notifying());
        assert!(CharacteristicKind::Arming.is_notifying());
        assert!(CharacteristicKind::Stdout.is_notifying());
    }

    #[test]
    fn test_tick_newer_simple_increase() {
        assert!(tick_newer(0, 1));
        assert!(tick_newer(100, 5000));
    }

    #[test]
    fn test_tick_newer_is_non_strict() {
        // Equal ticks are "non-decreasing", not stale.
        assert!(tick_newer(42, 42));
    }

    #[test]
    fn test_tick_newer_across_wrap() {
        // 0xFFFF -> 0x0003 wraps but is newer.
        assert!(tick_newer(0xFFFF, 0x0003));
        // The reverse direction is a regression.
        assert!(!tick_newer(0x0003, 0xFFFF));
    }

    #[test]
    fn test_tick_newer_rejects_old_ticks() {
        assert!(!tick_newer(5000, 100));
    }

    #[test]
    fn test_neutral_control_state() {
        let state = ControlState::neutral(0);
        assert_eq!(state.rudder, 128);
        assert_eq!(state.throttle, 0);
        assert_eq!(state.aileron, 128);
        assert_eq!(state.elevator, 128);
        assert!(!state.takeoff);
        assert!(!state.calibrate);
        assert!(!state.armed);

        // Variant firmware idles the throttle at 1.
        assert_eq!(ControlState::neutral(1).throttle, 1);
    }

    #[test]
    fn test_control_state_mutation() {
        let mut state = ControlState::neutral(0);
        state.set_axis(ControlAxis::Throttle, 200);
        state.set_flag(ControlFlag::Armed, true);
        assert_eq!(state.throttle, 200);
        assert!(state.armed);
        state.set_flag(ControlFlag::Armed, false);
        assert!(!state.armed);
    }

    #[test]
    fn test_console_buffer_accumulates_text() {
        let mut buffer = ConsoleBuffer::new(64);
        buffer.append(b"boot ok\n");
        buffer.append(b"imu ready\n");
        assert_eq!(buffer.to_text(), "boot ok\nimu ready\n");
        assert_eq!(buffer.len(), 18);
    }

    #[test]
    fn test_console_buffer_evicts_oldest_bytes() {
        let mut buffer = ConsoleBuffer::new(8);
        buffer.append(b"0123456789");
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.to_text(), "23456789");

        buffer.append(b"AB");
        assert_eq!(buffer.to_text(), "456789AB");
    }

    #[test]
    fn test_console_buffer_lossy_utf8() {
        let mut buffer = ConsoleBuffer::new(16);
        buffer.append(&[0x68, 0x69, 0xFF]);
        let text = buffer.to_text();
        assert!(text.starts_with("hi"));
    }

    #[test]
    fn test_environment_unit_accessors() {
        let record = EnvironmentRecord {
            tick: 1,
            pressure: 1000,   // 10.00 hPa
            battery: 874,     // 87.4 %
            temperature: -52, // -5.2 °C
            rssi: -613,       // -61.3 dBm
        };
        assert!((record.pressure_hpa() - 10.0).abs() < f32::EPSILON);
        assert!((record.battery_percent() - 87.4).abs() < 0.01);
        assert!((record.temperature_celsius() + 5.2).abs() < 0.01);
        assert!((record.rssi_dbm() + 61.3).abs() < 0.01);
    }

    #[test]
    fn test_telemetry_snapshot_defaults() {
        let telemetry = Telemetry::new(128);
        assert_eq!(telemetry.arming, ArmingRecord::default());
        assert_eq!(telemetry.environment, EnvironmentRecord::default());
        assert_eq!(telemetry.ahrs.aux, AhrsAux::default());
        assert!(telemetry.stdout.is_empty());
        assert_eq!(telemetry.stderr.capacity(), 128);
    }
}
