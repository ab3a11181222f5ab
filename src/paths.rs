use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// State root holding one directory per managed instance: `~/.vagabond/`
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".vagabond")
}

/// Default config file: `~/.config/vagabond/vagabond.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vagabond")
        .join("vagabond.toml")
}

/// Per-instance work directory, keyed on the assigned address.
pub fn instance_dir(state_dir: &Path, address: Ipv4Addr) -> PathBuf {
    state_dir.join(address.to_string())
}
