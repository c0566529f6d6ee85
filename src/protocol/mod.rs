//! Control-channel wire protocols
//!
//! Both protocols are decoded one byte at a time so the control loop never blocks on a
//! partial command. It includes:
//! - Newline-delimited JSON records (`json`)
//! - RNode-compatible KISS frames (`kiss`)

/// JSON lines
pub mod json;

/// KISS frames
pub mod kiss;
