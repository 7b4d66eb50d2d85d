//! Session stores for Stepwise.

pub mod file_store;
pub mod in_memory;

use std::sync::Arc;

use stepwise_config::SessionsConfig;
use stepwise_core::session::SessionStore;

pub use file_store::FileSessionStore;
pub use in_memory::InMemorySessionStore;

/// Open the store the configuration names. The backend name is validated
/// when the configuration is loaded; anything but `memory` opens files.
pub fn open_store(config: &SessionsConfig) -> Arc<dyn SessionStore> {
    match config.backend.as_str() {
        "memory" => Arc::new(InMemorySessionStore::new()),
        _ => Arc::new(FileSessionStore::new(config.resolved_dir())),
    }
}
