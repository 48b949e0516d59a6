//! # capstream-server: screen frame streaming service
//!
//! Captures frames from a configurable provider, encodes them to JPEG
//! and serves them to one client at a time over a unix or TCP socket,
//! using the minicap-compatible banner and framing.
//!
//! ## Modes
//!
//! - **Serve**: stream to clients until Ctrl-C (default).
//! - **Screenshot**: write one JPEG to stdout (`-s`).
//! - **Info**: print display information as JSON (`-i`).
//! - **Test**: capture one frame and report success via the exit code (`-t`).

pub mod config;
pub mod service;
