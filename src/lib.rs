//! LoRa modem control plane in Rust
//!
//! This crate turns a LoRa transceiver into a host-controlled modem. A host talks to
//! it over any duplex byte stream (serial, TCP, BLE, ...) using either newline-delimited
//! JSON records or RNode-compatible KISS frames. The modem applies radio settings,
//! transmits packets and relays received packets back with signal metadata.
//!
//! # Features
//! - Radio abstraction with an explicit mode state machine and per-setting clamping
//! - SX127x (RFM95) and SX126x (SX1262) register-level backends over `embedded-hal`
//! - Lock-free single-producer/single-consumer queue between the receive interrupt
//!   and the control loop
//! - Single active control stream with ordered hand-off
//! - JSON and KISS control protocols
//!
//! # Example
//! ```
//! use lora_modem::protocol::kiss::{encode_frame, CMD_DATA};
//!
//! let frame = encode_frame(CMD_DATA, &[0xC0, 0x01, 0xDB]).unwrap();
//! assert_eq!(&frame[..], &[0xC0, 0x00, 0xDB, 0xDC, 0x01, 0xDB, 0xDD, 0xC0]);
//! ```

#![warn(missing_docs)]
#![no_std]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

/// Modem and radio configuration
pub mod config;

/// High-level modem interface
pub mod modem;

/// Control-channel wire protocols
pub mod protocol;

/// Receive queue shared with interrupt context
pub mod queue;

/// Radio hardware abstraction layer
pub mod radio;

/// Control stream ownership
pub mod stream;
