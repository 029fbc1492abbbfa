//! Startup output

pub mod logger;

pub use logger::{display_startup_banner, StartupLogger};
