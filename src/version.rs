//! Version information for the ICAP engine.

/// The version of this crate, used as the default ISTag payload.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = "icap-engine";
