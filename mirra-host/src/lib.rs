//! # mirra-host: Mirroring Session Host
//!
//! Keeps one mirroring session alive on behalf of the user: reads the
//! persisted preferences, relays start / stop / retry commands to the
//! session, and stops it exactly once on user stop or process teardown.
//!
//! ## Modes
//!
//! - **Console**: drives a simulated platform in the foreground, pumping
//!   frames into whatever surface the session binds (the binary).
//! - **Embedded**: [`service::SessionHost`] over any [`mirra_core::Platform`].

pub mod config;
pub mod service;
