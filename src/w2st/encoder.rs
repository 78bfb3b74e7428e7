//! # Control Frame Encoder
//!
//! Encodes control-stick and flag state into the fixed 7-byte frame the
//! drone firmware expects on the joystick characteristic.
//!
//! Frame layout (bit-exact wire contract):
//!
//! ```text
//! Byte 0: reserved (always 0)
//! Byte 1: rudder
//! Byte 2: throttle
//! Byte 3: aileron
//! Byte 4: elevator
//! Byte 5: reserved (always 0)
//! Byte 6: flags (bit0 takeoff, bit1 calibrate, bit2 armed, rest 0)
//! ```

use super::protocol::{
    ControlFrame, ControlState, FLAG_ARMED, FLAG_CALIBRATE, FLAG_TAKEOFF,
};

/// Encode a control state into a complete 7-byte frame.
///
/// Encoding is total: every input is already a bounded 8-bit value or a
/// boolean, so this can never fail.
///
/// # Arguments
///
/// * `state` - Current control-stick and flag state
///
/// # Returns
///
/// * `ControlFrame` - 7-byte frame ready to write to the control characteristic
///
/// # Examples
///
/// ```
/// use drone_link::w2st::encoder::encode_control_frame;
/// use drone_link::w2st::protocol::ControlState;
///
/// let state = ControlState::neutral(0);
/// let frame = encode_control_frame(&state);
/// assert_eq!(frame, [0, 128, 0, 128, 128, 0, 0]);
/// ```
pub fn encode_control_frame(state: &ControlState) -> ControlFrame {
    let mut flags = 0u8;
    if state.takeoff {
        flags |= FLAG_TAKEOFF;
    }
    if state.calibrate {
        flags |= FLAG_CALIBRATE;
    }
    if state.armed {
        flags |= FLAG_ARMED;
    }

    [
        0, // reserved
        state.rudder,
        state.throttle,
        state.aileron,
        state.elevator,
        0, // reserved
        flags,
    ]
}
