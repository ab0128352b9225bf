mod config;
pub mod database;
pub mod memory;
pub mod traits;

pub use config::{Config, DefaultsConfig, EngineConfig};
pub use database::Database;
pub use memory::MemoryStore;
pub use traits::{MemberRecord, MembershipStore, SessionStore, StoreResult};

use std::path::PathBuf;

/// Returns `~/.config/cotimer[-dev]/` based on COTIMER_ENV.
///
/// Set COTIMER_ENV=dev to use development data directory. COTIMER_DATA_DIR
/// overrides the location entirely.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os("COTIMER_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("COTIMER_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("cotimer-dev")
            } else {
                base_dir.join("cotimer")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
