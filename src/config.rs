//! Configuration management for servrack.
//!
//! This module defines the structure of the `~/.servrack.toml` configuration file,
//! validates individual services and the file as a whole, and can write an example
//! configuration for first-time users.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::template;

/// Default file name, resolved against the user's home directory.
pub const DEFAULT_CONFIG_FILE: &str = ".servrack.toml";

/// Top-level configuration structure corresponding to `.servrack.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Services keyed by a user-chosen name. Iteration order is the key order.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Configuration for a single service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Shell command, may reference variables as `{{.name}}`.
    pub command: String,
    /// Environment label, appended to the service key to form the process name.
    #[serde(default)]
    pub environment: String,
    /// Disabled services are never started.
    #[serde(default)]
    pub enable: bool,
    /// Variable bindings for the command template.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<HashMap<String, String>>,
}

impl ServiceConfig {
    /// Returns the value of the first binding named `name` (case-insensitive).
    pub fn variable_value(&self, name: &str) -> Option<&str> {
        self.variables
            .iter()
            .flat_map(|bindings| bindings.iter())
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// True if the service is enabled and its bindings match the variables its
    /// command references, by count and by name.
    pub fn is_valid(&self) -> bool {
        if !self.enable {
            return false;
        }
        let Ok(referenced) = template::extract_variables(&self.command) else {
            return false;
        };
        let bound: Vec<String> = self
            .variables
            .iter()
            .flat_map(|bindings| bindings.keys())
            .map(|key| key.to_lowercase())
            .collect();
        if bound.len() != referenced.len() {
            return false;
        }
        let referenced: HashSet<&str> = referenced.iter().map(String::as_str).collect();
        bound.iter().all(|key| referenced.contains(key.as_str()))
    }

    /// The command with every placeholder replaced by its bound value.
    pub fn interpolated_command(&self) -> Result<String> {
        template::interpolate(&self.command, |name| self.variable_value(name))
    }
}

impl Config {
    /// Services declaring a `port` variable must not share a value.
    pub fn ports_unique(&self) -> bool {
        let mut seen = HashSet::new();
        self.services
            .values()
            .filter_map(|service| service.variable_value("port"))
            .all(|port| seen.insert(port))
    }

    /// Example configuration written by `servrack init`.
    pub fn example() -> Self {
        let mut services = BTreeMap::new();
        services.insert(
            "ping".to_string(),
            ServiceConfig {
                command: "ping google.com".to_string(),
                environment: "prod".to_string(),
                enable: true,
                variables: Vec::new(),
            },
        );
        Self { services }
    }
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        bail!(
            "configuration file {} doesn't exist. Use `servrack init` to create one or use --config to pass a path",
            path.display()
        );
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    if !config.ports_unique() {
        bail!("invalid configuration file, make sure ports are unique across services");
    }
    Ok(config)
}

/// Writes `config` to `path` unless a file already exists there.
///
/// Returns `true` if the file already existed and was left untouched.
pub fn create_config(path: &Path, config: &Config) -> Result<bool> {
    if path.exists() {
        return Ok(true);
    }
    let raw = toml::to_string_pretty(config).context("failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, raw)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(false)
}

/// `~/.servrack.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("failed to resolve home directory")?;
    Ok(home.join(DEFAULT_CONFIG_FILE))
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = dirs::home_dir().context("failed to resolve home directory")?;
    Ok(home.join(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(command: &str, enable: bool, vars: &[(&str, &str)]) -> ServiceConfig {
        ServiceConfig {
            command: command.to_string(),
            environment: "dev".to_string(),
            enable,
            variables: vars
                .iter()
                .map(|(k, v)| HashMap::from([(k.to_string(), v.to_string())]))
                .collect(),
        }
    }

    #[test]
    fn parses_services() {
        let raw = r#"
[services.api]
command = "python -m http.server {{.port}}"
environment = "dev"
enable = true
variables = [{ port = "8080" }]

[services.worker]
command = "sleep 100"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.services.len(), 2);
        let api = &config.services["api"];
        assert!(api.enable);
        assert_eq!(api.variable_value("port"), Some("8080"));
        let worker = &config.services["worker"];
        assert!(!worker.enable);
        assert_eq!(worker.environment, "");
    }

    #[test]
    fn disabled_service_is_invalid() {
        let s = service("something {{.port}}", false, &[("port", "1001")]);
        assert!(!s.is_valid());
    }

    #[test]
    fn variable_count_mismatch_is_invalid() {
        let s = service(
            "something {{.port}} and some other variable {{.testing}}",
            true,
            &[("port", "1001")],
        );
        assert!(!s.is_valid());
        assert!(!service("echo {{.port}}", true, &[]).is_valid());
    }

    #[test]
    fn variable_names_match_case_insensitively() {
        assert!(service("something {{.Port}}", true, &[("port", "1001")]).is_valid());
    }

    #[test]
    fn unknown_variable_name_is_invalid() {
        assert!(!service("something {{.trop}}", true, &[("port", "1001")]).is_valid());
    }

    #[test]
    fn malformed_template_is_invalid() {
        assert!(!service("something {trop}}", true, &[("port", "1001")]).is_valid());
    }

    #[test]
    fn interpolates_port() {
        let s = service("echo {{.port}}", true, &[("port", "8080")]);
        assert!(s.is_valid());
        assert_eq!(s.interpolated_command().unwrap(), "echo 8080");
    }

    #[test]
    fn plain_command_is_unchanged() {
        let s = service("ping google.com", true, &[]);
        assert!(s.is_valid());
        assert_eq!(s.interpolated_command().unwrap(), "ping google.com");
    }

    #[test]
    fn detects_duplicate_ports() {
        let mut config = Config::default();
        config
            .services
            .insert("a".into(), service("x {{.port}}", true, &[("port", "1234")]));
        config
            .services
            .insert("b".into(), service("y {{.port}}", true, &[("port", "5678")]));
        config
            .services
            .insert("c".into(), service("no port", true, &[]));
        config
            .services
            .insert("d".into(), service("also no port", true, &[]));
        assert!(config.ports_unique());

        config
            .services
            .insert("e".into(), service("z {{.port}}", true, &[("port", "1234")]));
        assert!(!config.ports_unique());
    }

    #[test]
    fn create_config_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_CONFIG_FILE);

        let existed = create_config(&path, &Config::example()).unwrap();
        assert!(!existed);
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.services["ping"].command, "ping google.com");

        std::fs::write(&path, "# edited\n").unwrap();
        let existed = create_config(&path, &Config::example()).unwrap();
        assert!(existed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited\n");
    }

    #[test]
    fn load_config_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("servrack init"));
    }

    #[test]
    fn load_config_rejects_duplicate_ports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.toml");
        std::fs::write(
            &path,
            r#"
[services.a]
command = "x {{.port}}"
enable = true
variables = [{ port = "1" }]

[services.b]
command = "y {{.port}}"
enable = true
variables = [{ port = "1" }]
"#,
        )
        .unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("ports are unique"));
    }

    #[test]
    fn expands_tilde_only_at_start() {
        let plain = expand_tilde(Path::new("/etc/servrack.toml")).unwrap();
        assert_eq!(plain, PathBuf::from("/etc/servrack.toml"));
        if let Some(home) = dirs::home_dir() {
            let expanded = expand_tilde(Path::new("~/cfg.toml")).unwrap();
            assert_eq!(expanded, home.join("cfg.toml"));
        }
    }
}
