//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing from the environment (`RUST_LOG`, `FORGECRM_LOG_FORMAT`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

pub mod tracing;

pub use tracing::{LogFormat, init_with};
