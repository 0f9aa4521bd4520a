use std::path::{Path, PathBuf};

/// Default config file: `~/.config/vmclone/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vmclone")
        .join("config.toml")
}

/// Log directory: `~/.local/share/vmclone/logs/`
pub fn logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vmclone")
        .join("logs")
}

/// Saved clone runs: `~/.local/share/vmclone/history/`
pub fn history_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vmclone")
        .join("history")
}

/// Throwaway target for the reflink trial copy: `<disk>.test` next to the disk.
pub fn trial_copy_path(disk: &Path) -> PathBuf {
    let mut name = disk.as_os_str().to_os_string();
    name.push(".test");
    PathBuf::from(name)
}
