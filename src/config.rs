use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::VagabondError;
use crate::lifecycle::ProvisionScript;
use crate::paths;

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default = "vagrant")]
    pub tool: String,
    pub state_dir: Option<String>,
    pub provision_script: Option<String>,
    #[facet(default)]
    pub defaults: DefaultsConfig,
    #[facet(default)]
    pub images: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool: "vagrant".into(),
            state_dir: None,
            provision_script: None,
            defaults: DefaultsConfig::default(),
            images: BTreeMap::new(),
        }
    }
}

/// Values used by `create` when the command line leaves them out.
#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct DefaultsConfig {
    #[facet(default = "trusty64")]
    pub image: String,
    #[facet(default = 512)]
    pub ram_mb: u32,
    #[facet(default = 1)]
    pub cpus: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            image: "trusty64".into(),
            ram_mb: 512,
            cpus: 1,
        }
    }
}

// ── Settings ──────────────────────────────────────────────

/// Parsed config plus the paths resolved from it.
#[derive(Debug, Clone)]
pub struct Settings {
    /// File the config was read from, if any.
    pub config_path: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub config: Config,
}

impl Settings {
    pub fn from_config(config: Config, config_path: Option<PathBuf>) -> Self {
        let state_dir = config
            .state_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(paths::state_dir);
        Self {
            config_path,
            state_dir,
            config,
        }
    }

    pub fn provision_script(&self) -> ProvisionScript {
        match &self.config.provision_script {
            Some(path) => ProvisionScript::File(PathBuf::from(path)),
            None => ProvisionScript::Bundled,
        }
    }
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), VagabondError> {
    if config.tool.trim().is_empty() {
        return Err(VagabondError::Validation {
            message: "tool must not be empty".into(),
        });
    }
    validate_resources(config.defaults.ram_mb, config.defaults.cpus)?;
    if config.defaults.image.is_empty() {
        return Err(VagabondError::Validation {
            message: "defaults.image must not be empty".into(),
        });
    }

    for (name, url) in &config.images {
        if !["http://", "https://", "file://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(VagabondError::Validation {
                message: format!("images.{name}: url must be http(s):// or file:// (got '{url}')"),
            });
        }
    }
    Ok(())
}

/// Shared by config defaults and command-line overrides.
pub fn validate_resources(ram_mb: u32, cpus: u32) -> Result<(), VagabondError> {
    if cpus < 1 {
        return Err(VagabondError::Validation {
            message: "cpus must be at least 1".into(),
        });
    }
    if ram_mb < 256 {
        return Err(VagabondError::Validation {
            message: "ram_mb must be at least 256".into(),
        });
    }
    Ok(())
}

/// Instance names label every output line; keep them short and printable.
pub fn validate_name(name: &str) -> Result<(), VagabondError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(VagabondError::Validation {
            message: format!("instance name must match [a-zA-Z0-9._-]+ (got '{name}')"),
        });
    }
    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, VagabondError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| VagabondError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Load settings from `explicit`, or from the default location.
///
/// A missing file at the default location means "use defaults"; a missing
/// file that was asked for by path is an error.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings, VagabondError> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => (paths::default_config_path(), false),
    };

    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Settings::from_config(Config::default(), None));
        }
        Err(source) => {
            return Err(VagabondError::ConfigLoad {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let config = parse_config(&contents, &path)?;
    Ok(Settings::from_config(config, Some(path)))
}
