//! # Telemetry Codec
//!
//! Decodes raw BLE notification payloads into typed telemetry records.
//!
//! All decode functions are pure: payload bytes in, typed record or
//! [`DroneLinkError::Decode`] out. A payload whose length does not match the
//! fixed size of its record type is rejected outright; no partial records
//! are ever produced, so callers can keep their last good snapshot on error.

use super::protocol::{
    AhrsAux, AhrsRecord, AhrsVariant, ArmingRecord, CharacteristicKind, EnvironmentRecord,
    Vector3, AHRS_PAYLOAD_LEN, ARMING_PAYLOAD_LEN, ENVIRONMENT_PAYLOAD_LEN,
};
use crate::error::{DroneLinkError, Result};

/// Decode an Arming record (3 bytes).
///
/// # Arguments
///
/// * `payload` - Raw notification payload: tick u16 LE + enabled u8
///
/// # Errors
///
/// Returns [`DroneLinkError::Decode`] if the payload is not exactly 3 bytes.
pub fn decode_arming(payload: &[u8]) -> Result<ArmingRecord> {
    check_len(CharacteristicKind::Arming, payload, ARMING_PAYLOAD_LEN)?;

    Ok(ArmingRecord {
        tick: read_u16(payload, 0),
        enabled: payload[2] != 0,
    })
}

/// Decode an Environment record (10 bytes).
///
/// Field layout, all little-endian:
///
/// ```text
/// Bytes 0-1: tick (u16)
/// Bytes 2-3: pressure (u16, hPa × 100)
/// Bytes 4-5: battery (u16, percent × 10)
/// Bytes 6-7: temperature (i16, °C × 10)
/// Bytes 8-9: RSSI (i16, dBm × 10)
/// ```
///
/// # Errors
///
/// Returns [`DroneLinkError::Decode`] if the payload is not exactly 10 bytes.
pub fn decode_environment(payload: &[u8]) -> Result<EnvironmentRecord> {
    check_len(
        CharacteristicKind::Environment,
        payload,
        ENVIRONMENT_PAYLOAD_LEN,
    )?;

    Ok(EnvironmentRecord {
        tick: read_u16(payload, 0),
        pressure: read_u16(payload, 2),
        battery: read_u16(payload, 4),
        temperature: read_i16(payload, 6),
        rssi: read_i16(payload, 8),
    })
}

/// Decode an AHRS record (20 bytes).
///
/// Field layout, all little-endian:
///
/// ```text
/// Bytes  0-1:  tick (u16)
/// Bytes  2-7:  acceleration x, y, z (i16, g × 1000)
/// Bytes  8-13: gyrometer x, y, z (i16, dps × 1000)
/// Bytes 14-19: magnetometer x, y, z (i16, gauss × 1000),
///              or orientation axis on pre-AHRS firmware
/// ```
///
/// # Arguments
///
/// * `payload` - Raw notification payload
/// * `variant` - Whether the third triple is a magnetometer sample or an
///   orientation axis; the wire layout is the same either way
///
/// # Errors
///
/// Returns [`DroneLinkError::Decode`] if the payload is not exactly 20 bytes.
pub fn decode_ahrs(payload: &[u8], variant: AhrsVariant) -> Result<AhrsRecord> {
    check_len(CharacteristicKind::Ahrs, payload, AHRS_PAYLOAD_LEN)?;

    let third = read_vector3(payload, 14);
    let aux = match variant {
        AhrsVariant::Magnetometer => AhrsAux::Magnetometer(third),
        AhrsVariant::Axis => AhrsAux::Axis(third),
    };

    Ok(AhrsRecord {
        tick: read_u16(payload, 0),
        acceleration: read_vector3(payload, 2),
        gyrometer: read_vector3(payload, 8),
        aux,
    })
}

/// Decode a console text chunk (stdout/stderr).
///
/// Console payloads are free-form and any length; invalid UTF-8 is replaced
/// rather than rejected, since losing a log byte must never tear down the
/// telemetry stream.
pub fn decode_console(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

fn check_len(kind: CharacteristicKind, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() != expected {
        return Err(DroneLinkError::Decode {
            kind,
            reason: format!("expected {} bytes, got {}", expected, payload.len()),
        });
    }
    Ok(())
}

fn read_u16(payload: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([payload[offset], payload[offset + 1]])
}

fn read_i16(payload: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([payload[offset], payload[offset + 1]])
}

fn read_vector3(payload: &[u8], offset: usize) -> Vector3 {
    Vector3::new(
        read_i16(payload, offset),
        read_i16(payload, offset + 2),
        read_i16(payload, offset + 4),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_decode_arming_enabled() {
        let record = assert_ok!(decode_arming(&[0x2A, 0x00, 0x01]));
        assert_eq!(record.tick, 42);
        assert!(record.enabled);
    }

    #[test]
    fn test_decode_arming_disabled() {
        let record = assert_ok!(decode_arming(&[0xFF, 0xFF, 0x00]));
        assert_eq!(record.tick, 0xFFFF);
        assert!(!record.enabled);
    }

    #[test]
    fn test_decode_arming_nonzero_means_armed() {
        let record = assert_ok!(decode_arming(&[0x00, 0x00, 0x7F]));
        assert!(record.enabled);
    }

    #[test]
    fn test_decode_arming_wrong_length() {
        for bad in [&[][..], &[0x01][..], &[0x01, 0x02][..], &[0, 0, 1, 0][..]] {
            let err = decode_arming(bad).unwrap_err();
            match err {
                DroneLinkError::Decode { kind, .. } => {
                    assert_eq!(kind, CharacteristicKind::Arming);
                }
                other => panic!("expected Decode error, got: {:?}", other),
            }
        }
    }

    #[test]
    fn test_decode_environment() {
        // tick=7, pressure=1000 (10.00 hPa), battery=874 (87.4%),
        // temperature=235 (23.5°C), rssi=-412 (-41.2 dBm)
        let payload = [
            0x07, 0x00, // tick
            0xE8, 0x03, // pressure: 1000 LE
            0x6A, 0x03, // battery: 874
            0xEB, 0x00, // temperature: 235
            0x64, 0xFE, // rssi: -412
        ];

        let record = assert_ok!(decode_environment(&payload));
        assert_eq!(record.tick, 7);
        assert_eq!(record.pressure, 1000);
        assert_eq!(record.battery, 874);
        assert_eq!(record.temperature, 235);
        assert_eq!(record.rssi, -412);

        // raw/100 => physical hPa
        assert!((record.pressure_hpa() - 10.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_decode_environment_negative_temperature() {
        // temperature = -52 (-5.2°C) = 0xFFCC LE
        let payload = [
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0xCC, 0xFF, 0x00, 0x00,
        ];
        let record = assert_ok!(decode_environment(&payload));
        assert_eq!(record.temperature, -52);
        assert!((record.temperature_celsius() + 5.2).abs() < 0.01);
    }

    #[test]
    fn test_decode_environment_wrong_length() {
        let err = decode_environment(&[0u8; 9]).unwrap_err();
        match err {
            DroneLinkError::Decode { kind, reason } => {
                assert_eq!(kind, CharacteristicKind::Environment);
                assert!(reason.contains("expected 10 bytes"));
            }
            other => panic!("expected Decode error, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_ahrs_magnetometer_variant() {
        let mut payload = [0u8; 20];
        payload[0..2].copy_from_slice(&100u16.to_le_bytes());
        payload[2..4].copy_from_slice(&(-1000i16).to_le_bytes()); // acc.x
        payload[4..6].copy_from_slice(&0i16.to_le_bytes()); // acc.y
        payload[6..8].copy_from_slice(&1000i16.to_le_bytes()); // acc.z
        payload[8..10].copy_from_slice(&250i16.to_le_bytes()); // gyro.x
        payload[10..12].copy_from_slice(&(-250i16).to_le_bytes()); // gyro.y
        payload[12..14].copy_from_slice(&0i16.to_le_bytes()); // gyro.z
        payload[14..16].copy_from_slice(&42i16.to_le_bytes()); // mag.x
        payload[16..18].copy_from_slice(&(-42i16).to_le_bytes()); // mag.y
        payload[18..20].copy_from_slice(&7i16.to_le_bytes()); // mag.z

        let record = assert_ok!(decode_ahrs(&payload, AhrsVariant::Magnetometer));
        assert_eq!(record.tick, 100);
        assert_eq!(record.acceleration, Vector3::new(-1000, 0, 1000));
        assert_eq!(record.gyrometer, Vector3::new(250, -250, 0));
        assert_eq!(record.aux, AhrsAux::Magnetometer(Vector3::new(42, -42, 7)));
    }

    #[test]
    fn test_decode_ahrs_axis_variant() {
        let mut payload = [0u8; 20];
        payload[14..16].copy_from_slice(&90i16.to_le_bytes());
        payload[16..18].copy_from_slice(&(-90i16).to_le_bytes());
        payload[18..20].copy_from_slice(&180i16.to_le_bytes());

        let record = assert_ok!(decode_ahrs(&payload, AhrsVariant::Axis));
        assert_eq!(record.aux, AhrsAux::Axis(Vector3::new(90, -90, 180)));
    }

    #[test]
    fn test_decode_ahrs_wrong_length() {
        let err = decode_ahrs(&[0u8; 19], AhrsVariant::Magnetometer).unwrap_err();
        match err {
            DroneLinkError::Decode { kind, .. } => {
                assert_eq!(kind, CharacteristicKind::Ahrs);
            }
            other => panic!("expected Decode error, got: {:?}", other),
        }

        // One byte too many is just as malformed as one too few.
        assert!(decode_ahrs(&[0u8; 21], AhrsVariant::Magnetometer).is_err());
    }

    #[test]
    fn test_decode_console_plain_text() {
        assert_eq!(decode_console(b"fc: sensors ready\n"), "fc: sensors ready\n");
    }

    #[test]
    fn test_decode_console_is_lossy_not_failing() {
        let text = decode_console(&[b'o', b'k', 0xC3]);
        assert!(text.starts_with("ok"));
    }

    #[test]
    fn test_decode_fields_round_trip_through_encoding() {
        // Any valid 16-bit field survives decode after re-encoding its bytes.
        for value in [0u16, 1, 0x7FFF, 0x8000, 0xFFFF] {
            let mut payload = [0u8; 10];
            payload[2..4].copy_from_slice(&value.to_le_bytes());
            let record = assert_ok!(decode_environment(&payload));
            assert_eq!(record.pressure, value);
            assert_eq!(record.pressure.to_le_bytes(), [payload[2], payload[3]]);
        }
    }
}
