//! # Drone Link Library
//!
//! Telemetry and control link for ST BlueST (W2ST) quadcopters over BLE.
//!
//! This library provides the core functionality for discovering a drone,
//! driving its connection lifecycle and exchanging W2ST telemetry and
//! control frames with it.

pub mod config;
pub mod error;
pub mod w2st;
pub mod radio;
pub mod session;
