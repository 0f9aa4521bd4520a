use std::path::{Path, PathBuf};

use facet::Facet;

use crate::connection::ConnectionScope;
use crate::error::CloneError;
use crate::paths;

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default = "system")]
    pub connection: String,
    #[facet(default)]
    pub tools: ToolsConfig,
    #[facet(default)]
    pub elevation: ElevationConfig,
    #[facet(default)]
    pub logs: LogsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: "system".into(),
            tools: ToolsConfig::default(),
            elevation: ElevationConfig::default(),
            logs: LogsConfig::default(),
        }
    }
}

/// Executables used for each host query. Bare names are looked up on PATH.
#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ToolsConfig {
    #[facet(default = "virsh")]
    pub virsh: String,
    #[facet(default = "virt-clone")]
    pub virt_clone: String,
    #[facet(default = "df")]
    pub df: String,
    #[facet(default = "cp")]
    pub cp: String,
    #[facet(default = "rm")]
    pub rm: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            virsh: "virsh".into(),
            virt_clone: "virt-clone".into(),
            df: "df".into(),
            cp: "cp".into(),
            rm: "rm".into(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ElevationConfig {
    #[facet(default = true)]
    pub enabled: bool,
    #[facet(default = "sudo")]
    pub sudo: String,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sudo: "sudo".into(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct LogsConfig {
    #[facet(default = 10)]
    pub keep: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self { keep: 10 }
    }
}

impl Config {
    /// Connection scope from the config file. Validated at load time.
    pub fn scope(&self) -> ConnectionScope {
        self.connection.parse().unwrap_or_default()
    }
}

fn validate_config(config: &Config) -> Result<(), CloneError> {
    config.connection.parse::<ConnectionScope>()?;

    let tools = [
        ("virsh", &config.tools.virsh),
        ("virt_clone", &config.tools.virt_clone),
        ("df", &config.tools.df),
        ("cp", &config.tools.cp),
        ("rm", &config.tools.rm),
    ];
    for (key, value) in tools {
        if value.trim().is_empty() {
            return Err(CloneError::Validation {
                message: format!("tools.{key} must not be empty"),
            });
        }
    }

    if config.elevation.enabled && config.elevation.sudo.trim().is_empty() {
        return Err(CloneError::Validation {
            message: "elevation.sudo must not be empty when elevation is enabled".into(),
        });
    }

    if config.logs.keep == 0 {
        return Err(CloneError::Validation {
            message: "logs.keep must be at least 1".into(),
        });
    }

    Ok(())
}

// ── public API ────────────────────────────────────────────

/// Parse and validate config text. `origin` is only used in error messages.
pub fn parse_config(contents: &str, origin: &Path) -> Result<Config, CloneError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| CloneError::ConfigParse {
        path: origin.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config file.
///
/// An explicit path must exist. Without one, the per-user default location is
/// tried and built-in defaults are used if nothing is there.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, CloneError> {
    let (path, required): (PathBuf, bool) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => (paths::default_config_path(), false),
    };

    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(CloneError::ConfigLoad {
                path: path.display().to_string(),
                source,
            });
        }
    };

    parse_config(&contents, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Config, CloneError> {
        parse_config(s, Path::new("test.toml"))
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.connection, "system");
        assert_eq!(config.tools.virsh, "virsh");
        assert_eq!(config.tools.virt_clone, "virt-clone");
        assert!(config.elevation.enabled);
        assert_eq!(config.logs.keep, 10);
    }

    #[test]
    fn parse_full_config() {
        let config = parse(
            r#"
connection = "session"

[tools]
virsh = "/usr/local/bin/virsh"
virt_clone = "/opt/virt-manager/virt-clone"

[elevation]
enabled = false

[logs]
keep = 3
"#,
        )
        .unwrap();
        assert_eq!(config.scope(), ConnectionScope::Session);
        assert_eq!(config.tools.virsh, "/usr/local/bin/virsh");
        assert_eq!(config.tools.virt_clone, "/opt/virt-manager/virt-clone");
        assert_eq!(config.tools.df, "df");
        assert!(!config.elevation.enabled);
        assert_eq!(config.logs.keep, 3);
    }

    #[test]
    fn bad_connection_rejected() {
        let err = parse(r#"connection = "remote""#).unwrap_err();
        assert!(err.to_string().contains("connection must be"));
    }

    #[test]
    fn empty_tool_rejected() {
        let err = parse("[tools]\ncp = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("tools.cp must not be empty"));
    }

    #[test]
    fn zero_keep_rejected() {
        assert!(parse("[logs]\nkeep = 0\n").is_err());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/vmclone.toml"))).unwrap_err();
        assert!(matches!(err, CloneError::ConfigLoad { .. }));
    }

    #[test]
    fn load_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "connection = \"session\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.scope(), ConnectionScope::Session);
    }
}
