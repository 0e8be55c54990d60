use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const COURIER_DIR: &str = ".courier";
pub const CONFIG_FILE: &str = ".courier/config.yaml";
pub const DEFAULT_STORE_FILE: &str = "store.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn courier_dir(root: &Path) -> PathBuf {
    root.join(COURIER_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Location of the redb file. `file_name` comes from `StoreConfig`.
pub fn store_path(root: &Path, file_name: &str) -> PathBuf {
    courier_dir(root).join(file_name)
}
