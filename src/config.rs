use crate::secret_string::SecretString;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub webserver: Webserver,
    #[serde(default)]
    pub registries: Vec<Registry>,
    pub tenant_registry: TenantRegistry,
    #[serde(default)]
    pub public_registry: Option<PublicRegistry>,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    #[serde(default)]
    pub tls: Tls,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    pub hostname: String,
    pub username: Option<String>,
    pub token: SecretString,
    /// Tag tenant registry components are pulled with from this registry,
    /// overriding `tenantRegistry.defaultTag`.
    #[serde(default)]
    pub default_tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

/// Registry that serves component images when a component declares neither a
/// custom image, a custom version nor the public registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRegistry {
    pub registry: String,
    #[serde(default)]
    pub repository_prefix: Option<String>,
    #[serde(default = "default_tag")]
    pub default_tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicRegistry {
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSettings {
    #[serde(default = "default_interval_seconds")]
    pub default_interval_seconds: u64,
    #[serde(default = "error_interval_seconds")]
    pub error_interval_seconds: u64,
    #[serde(default = "registry_timeout_seconds")]
    pub registry_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    #[serde(default)]
    pub enable_jfrog_artifactory_fallback: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    #[serde(default)]
    pub ca_certificate_paths: Vec<PathBuf>,
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_interval_seconds() -> u64 {
    30 * 60
}

fn error_interval_seconds() -> u64 {
    60
}

fn registry_timeout_seconds() -> u64 {
    30
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            default_interval_seconds: default_interval_seconds(),
            error_interval_seconds: error_interval_seconds(),
            registry_timeout_seconds: registry_timeout_seconds(),
        }
    }
}

impl ReconcileSettings {
    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_seconds)
    }

    pub fn error_interval(&self) -> Duration {
        Duration::from_secs(self.error_interval_seconds)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_seconds)
    }
}

impl TenantRegistry {
    /// Repository of a component inside the tenant registry, e.g.
    /// `registry.example.com/tenant/agent`.
    pub fn repository_for(&self, component: &str) -> String {
        match self.repository_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => {
                format!("{}/{}/{}", self.registry, prefix, component)
            }
            _ => format!("{}/{}", self.registry, component),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variable values.
/// Fails listing every variable that is not set.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable: {}", missing.join(", "));
    }

    Ok(result.into_owned())
}
