//! Control-plane client library for a fleet of LuxOS-style mining devices.
//!
//! The wire engine, session/command executor, and fleet runner are the
//! supported public surface; everything else (catalog, validator,
//! normalizer, address parsing, config) backs those three.

pub mod addr;
pub mod catalog;
pub mod config;
pub mod error;
pub mod launch;
pub mod params;
pub mod retry;
pub mod session;
pub mod toggle;
pub mod validate;
pub mod wire;

pub use config::Config;
pub use error::{ConnectionError, LaunchFailure};
pub use launch::{launch, launch_bounded, CancelSignal, LaunchOptions, Outcome};
pub use params::Param;
pub use session::rexec;
pub use validate::Envelope;
