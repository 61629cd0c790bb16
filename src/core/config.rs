//! Server configuration.
//!
//! The configuration file lists provider instances, public hosts, and query
//! resource limits. It is read once at startup (JSON, or YAML when the file
//! ends in `.yaml`/`.yml`) and turned into an
//! [`AppContext`](crate::core::context::AppContext).

use crate::core::error::{MotifStudioError, Result};
use crate::core::executor::ResourceLimits;
use crate::core::models::HostListing;
use crate::providers::filesystem::FilesystemOptions;
use crate::providers::opencypher::OpenCypherOptions;
use crate::providers::s3::S3Options;
use crate::providers::temporary::TemporaryOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "MOTIFSTUDIO_CONFIG";

/// Configuration file used when neither `--config` nor the env var is set.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const ORIGIN: &str = "config";

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub hosts: Vec<HostListing>,
    #[serde(default)]
    pub query_limits: QueryLimitsConfig,
}

/// One provider instance: `{ id, type, arguments }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A provider configuration with its arguments decoded.
#[derive(Debug, Clone)]
pub enum ProviderKind {
    Filesystem(FilesystemOptions),
    S3(S3Options),
    OpenCypher(OpenCypherOptions),
    Temporary(TemporaryOptions),
}

impl ProviderConfig {
    /// Decodes `type` and `arguments`. Both long class-style names and short
    /// aliases are accepted.
    pub fn kind(&self) -> Result<ProviderKind> {
        let arguments = match &self.arguments {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        let decode_error = |e: serde_json::Error| {
            MotifStudioError::config(
                "invalid_provider_arguments",
                format!("Invalid arguments for provider '{}': {e}", self.id),
                ORIGIN,
            )
            .with_context("provider_id", self.id.clone())
        };

        match self.provider_type.as_str() {
            "FilesystemGraphHostProvider" | "filesystem" => Ok(ProviderKind::Filesystem(
                serde_json::from_value(arguments).map_err(decode_error)?,
            )),
            "S3GraphMLHostProvider" | "s3" => Ok(ProviderKind::S3(
                serde_json::from_value(arguments).map_err(decode_error)?,
            )),
            "OpenCypherHostProvider" | "opencypher" => Ok(ProviderKind::OpenCypher(
                serde_json::from_value(arguments).map_err(decode_error)?,
            )),
            "TemporaryGraphHostProvider" | "temporary" => Ok(ProviderKind::Temporary(
                serde_json::from_value(arguments).map_err(decode_error)?,
            )),
            other => Err(MotifStudioError::config(
                "unknown_provider_type",
                format!("Unknown provider type '{other}'"),
                ORIGIN,
            )
            .with_context("provider_id", self.id.clone())
            .with_hint(
                "Use one of: filesystem, s3, opencypher, temporary (or their \
                 FilesystemGraphHostProvider-style class names)",
            )),
        }
    }
}

/// Per-query resource ceilings as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLimitsConfig {
    #[serde(default = "default_ram_pct")]
    pub max_ram_pct: f64,
    #[serde(default)]
    pub max_ram_bytes: Option<u64>,
    #[serde(default = "default_duration_seconds")]
    pub max_duration_seconds: Option<f64>,
}

fn default_ram_pct() -> f64 {
    0.5
}

#[allow(clippy::unnecessary_wraps)]
fn default_duration_seconds() -> Option<f64> {
    Some(120.0)
}

impl Default for QueryLimitsConfig {
    fn default() -> Self {
        Self {
            max_ram_pct: default_ram_pct(),
            max_ram_bytes: None,
            max_duration_seconds: default_duration_seconds(),
        }
    }
}

impl QueryLimitsConfig {
    /// Resolves concrete limits against the machine's total memory.
    pub fn resolve(&self) -> Result<ResourceLimits> {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        self.resolve_with_total_ram(system.total_memory())
    }

    /// Resolves concrete limits against a known total memory size.
    pub fn resolve_with_total_ram(&self, total_ram_bytes: u64) -> Result<ResourceLimits> {
        let mut limits = ResourceLimits::unbounded();

        if let Some(seconds) = self.max_duration_seconds {
            if !seconds.is_finite() || seconds <= 0.0 {
                return Err(MotifStudioError::config(
                    "invalid_query_limits",
                    format!("max_duration_seconds must be positive, got {seconds}"),
                    ORIGIN,
                ));
            }
            let duration = Duration::try_from_secs_f64(seconds).map_err(|e| {
                MotifStudioError::config(
                    "invalid_query_limits",
                    format!("max_duration_seconds {seconds} is out of range: {e}"),
                    ORIGIN,
                )
            })?;
            limits = limits.with_max_duration(duration);
        }

        let ram = match self.max_ram_bytes {
            Some(bytes) => bytes,
            None => {
                if !(self.max_ram_pct > 0.0 && self.max_ram_pct <= 1.0) {
                    return Err(MotifStudioError::config(
                        "invalid_query_limits",
                        format!("max_ram_pct must be in (0, 1], got {}", self.max_ram_pct),
                        ORIGIN,
                    ));
                }
                if total_ram_bytes == 0 {
                    return Err(MotifStudioError::config(
                        "total_ram_unavailable",
                        "Cannot determine total system memory to derive the query RAM limit",
                        ORIGIN,
                    )
                    .with_hint("Set query_limits.max_ram_bytes explicitly"));
                }
                fraction_of(total_ram_bytes, self.max_ram_pct)
            }
        };
        Ok(limits.with_max_ram_bytes(ram))
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn fraction_of(total: u64, fraction: f64) -> u64 {
    (total as f64 * fraction) as u64
}

impl ServerConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MotifStudioError::config(
                "config_read_failed",
                format!("Failed to read config {}: {e}", path.display()),
                ORIGIN,
            )
            .with_context("path", path.display().to_string())
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        let config = if is_yaml {
            Self::from_yaml_str(&raw)?
        } else {
            Self::from_json_str(&raw)?
        };
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| {
            MotifStudioError::config("config_parse_failed", format!("Invalid JSON config: {e}"), ORIGIN)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw).map_err(|e| {
            MotifStudioError::config("config_parse_failed", format!("Invalid YAML config: {e}"), ORIGIN)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks provider types and id uniqueness.
    pub fn validate(&self) -> Result<()> {
        let mut provider_ids = HashSet::new();
        for provider in &self.providers {
            if !provider_ids.insert(provider.id.as_str()) {
                return Err(MotifStudioError::config(
                    "duplicate_provider_id",
                    format!("Provider id '{}' appears more than once", provider.id),
                    ORIGIN,
                ));
            }
            provider.kind()?;
        }

        let mut host_ids = HashSet::new();
        for host in &self.hosts {
            if !host_ids.insert(host.id.as_str()) {
                return Err(MotifStudioError::config(
                    "duplicate_host_id",
                    format!("Host id '{}' appears more than once", host.id),
                    ORIGIN,
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "providers": [
            {"id": "fs", "type": "FilesystemGraphHostProvider", "arguments": {}},
            {"id": "tmp", "type": "temporary", "arguments": {"expiration_days": 3}}
        ],
        "hosts": [
            {"id": "H1", "uri": "file:///g.graphml", "name": "Graph"}
        ]
    }"#;

    #[test]
    fn parses_json_config_with_defaults() {
        let config = ServerConfig::from_json_str(CONFIG).expect("parse");
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.hosts[0].id, "H1");
        assert_eq!(config.query_limits, QueryLimitsConfig::default());
        assert!(matches!(
            config.providers[1].kind().expect("kind"),
            ProviderKind::Temporary(TemporaryOptions {
                expiration_days: 3,
                ..
            })
        ));
    }

    #[test]
    fn parses_yaml_config_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "providers:\n  - id: fs\n    type: filesystem\nhosts: []\nquery_limits:\n  max_ram_bytes: 1024\n",
        )
        .expect("write");
        let config = ServerConfig::load(&path).expect("load");
        assert_eq!(config.query_limits.max_ram_bytes, Some(1024));
        assert!(matches!(
            config.providers[0].kind().expect("kind"),
            ProviderKind::Filesystem(_)
        ));
    }

    #[test]
    fn rejects_unknown_provider_type() {
        let err = ServerConfig::from_json_str(
            r#"{"providers":[{"id":"x","type":"GexfHostProvider","arguments":{}}],"hosts":[]}"#,
        )
        .expect_err("unknown type");
        assert_eq!(err.code, "unknown_provider_type");
    }

    #[test]
    fn rejects_duplicate_host_ids() {
        let err = ServerConfig::from_json_str(
            r#"{"providers":[],"hosts":[
                {"id":"H1","uri":"file:///a.graphml","name":"A"},
                {"id":"H1","uri":"file:///b.graphml","name":"B"}]}"#,
        )
        .expect_err("duplicate");
        assert_eq!(err.code, "duplicate_host_id");
    }

    #[test]
    fn ram_limit_derives_from_fraction_of_total() {
        let limits = QueryLimitsConfig::default()
            .resolve_with_total_ram(8_000)
            .expect("resolve");
        assert_eq!(limits.max_ram_bytes, Some(4_000));
        assert_eq!(limits.max_duration, Some(Duration::from_secs(120)));
    }

    #[test]
    fn explicit_ram_limit_wins() {
        let config = QueryLimitsConfig {
            max_ram_bytes: Some(123),
            ..QueryLimitsConfig::default()
        };
        let limits = config.resolve_with_total_ram(0).expect("resolve");
        assert_eq!(limits.max_ram_bytes, Some(123));
    }

    #[test]
    fn unknown_total_ram_is_a_config_error() {
        let err = QueryLimitsConfig::default()
            .resolve_with_total_ram(0)
            .expect_err("no total");
        assert_eq!(err.code, "total_ram_unavailable");
    }

    #[test]
    fn ram_fraction_must_be_in_range() {
        let config = QueryLimitsConfig {
            max_ram_pct: 1.5,
            ..QueryLimitsConfig::default()
        };
        assert_eq!(
            config.resolve_with_total_ram(1_000).expect_err("range").code,
            "invalid_query_limits"
        );
    }

    #[test]
    fn oversized_duration_is_a_config_error() {
        let config = QueryLimitsConfig {
            max_duration_seconds: Some(1e30),
            max_ram_bytes: Some(1 << 20),
            ..QueryLimitsConfig::default()
        };
        let err = config.resolve_with_total_ram(1_000).expect_err("overflow");
        assert_eq!(err.code, "invalid_query_limits");
        assert!(err.message.contains("out of range"));
    }
}
