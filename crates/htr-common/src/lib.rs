//! Common types and utilities shared across the HTR tunnel stack.
//!
//! This crate provides:
//! - Control-channel frame serialization and parsing ([`frame`])
//! - Tunnel-id (subdomain) validation and minting ([`subdomain`])
//! - Protocol type definitions and constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod frame;
pub mod subdomain;
pub mod types;

pub use frame::Frame;
