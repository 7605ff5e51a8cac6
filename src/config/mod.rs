//! Layered configuration.
//!
//! Tiers, lowest to highest priority:
//! 1. **Defaults** - compiled in
//! 2. **Project** - `$CWD/taskq/config.yaml`
//! 3. **User** - `~/.taskq/config.yaml`
//! 4. **Environment** - variables below
//!
//! YAML tiers are merged field by field; lists and scalars are replaced.
//!
//! ## Environment Variables
//! - `TASKQ_CONFIG_PATH` - Explicit config file (replaces tier discovery)
//! - `TASKQ_DB_PATH` - Database path
//! - `TASKQ_COMMANDS_DIR` - Directory commands are resolved in
//! - `TASKQ_POLL_INTERVAL_MS` - Daemon poll interval
//! - `TASKQ_USER_DIR` - User config dir (default: `~/.taskq`)
//! - `TASKQ_PROJECT_DIR` - Project config dir (default: `./taskq`)

mod loader;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, deep_merge};
pub use types::*;
