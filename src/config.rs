use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub global: Global,
    #[serde(default)]
    pub toolkit: ToolkitConfig,
    #[serde(default)]
    pub resolver: ResolverOptions,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub listen: String,
    pub data_entry_listen: String,
    pub auth: Auth,
    pub fqdn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    pub mode: AuthMode,
    pub keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    ApiKey,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolkitConfig {
    #[serde(default)]
    pub mode: ToolkitMode,
    pub command: Option<String>,
    #[serde(default = "default_toolkit_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_toolkit_timeout_ms() -> u64 {
    30_000
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            mode: ToolkitMode::default(),
            command: None,
            timeout_ms: default_toolkit_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolkitMode {
    #[default]
    InProcess,
    Subprocess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverOptions {
    #[serde(default = "default_true")]
    pub linktype_fallback: bool,
    #[serde(default = "default_linktype")]
    pub default_linktype: String,
}

fn default_true() -> bool {
    true
}

fn default_linktype() -> String {
    "gs1:pip".to_string()
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            linktype_fallback: default_true(),
            default_linktype: default_linktype(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    pub path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: Some("resolver.sqlite3".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

/// Metrics are served inline on the resolver app (see `server::build_resolver_app`),
/// not on a separate listener; `enabled`/`path` gate and place that route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            global: Global {
                listen: "0.0.0.0:8080".to_string(),
                data_entry_listen: "0.0.0.0:8081".to_string(),
                auth: Auth {
                    mode: AuthMode::None,
                    keys: None,
                },
                fqdn: "id.example.com".to_string(),
            },
            toolkit: ToolkitConfig::default(),
            resolver: ResolverOptions::default(),
            store: StoreConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
        }
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
    let config = serde_json::from_str::<Config>(&content)
        .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &Config) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}
