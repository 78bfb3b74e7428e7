//! # W2ST Protocol Module
//!
//! Implementation of the W2ST (BlueST) wire protocol spoken by the ST drone.
//!
//! This module handles:
//! - Telemetry record decoding (Arming, Environment, AHRS, console text)
//! - Control frame encoding (4 axes + 3 flags into a fixed 7-byte frame)
//! - Protocol constants, characteristic UUIDs and record layouts

pub mod protocol;
pub mod encoder;
pub mod decoder;
