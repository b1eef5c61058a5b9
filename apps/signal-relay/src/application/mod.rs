//! Application Layer
//!
//! Ports describe the I/O the relay needs; services hold the relay logic
//! that drives those ports.

pub mod ports;
pub mod services;
