//! Integrity core for a ranked-choice tabulator
//!
//! Verifies vendor-signed cast vote record exports before they are admitted and
//! seals every artifact the tabulator writes so later tampering is detectable.

pub mod config;
pub mod crypto;
pub mod cvr;
pub mod errors;
pub mod ledger;
pub mod ranking;
pub mod types;
mod xml;

// Re-export commonly used types
pub use errors::{Error, Result};
pub use ledger::TransferLedger;
pub use ranking::RankingSlot;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the integrity core with default logging
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=info".into()),
        )
        .try_init()
        .map_err(|e| Error::internal(format!("Failed to install logger: {e}")))?;

    tracing::info!("🔏 Tabulator integrity core v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from a loaded [`config::LoggingConfig`]
pub fn init_with(logging: &config::LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(format!("tally={}", logging.level))
        .map_err(|e| Error::internal(format!("Invalid LOG_LEVEL: {e}")))?;

    let installed = match logging.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
    };
    installed.map_err(|e| Error::internal(format!("Failed to install logger: {e}")))?;

    tracing::info!("🔏 Tabulator integrity core v{} initialized", VERSION);
    Ok(())
}
