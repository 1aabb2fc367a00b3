use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub kapua: KapuaConf,
    pub server: ServerConf,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KapuaConf {
    pub api_endpoint: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64, // connexion uniquement, pas de timeout global par appel
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConf {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid config file {path}: {source}")]
    Parse { path: String, source: serde_yaml::Error },
}

impl Default for KapuaConf {
    fn default() -> Self {
        Self {
            api_endpoint: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// le mot de passe ne doit jamais apparaître dans les logs
impl std::fmt::Debug for KapuaConf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KapuaConf")
            .field("api_endpoint", &self.api_endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ServerConf {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8000, api_key: None }
    }
}

impl KernelConfig {
    /// Applique les variables d'environnement par-dessus le fichier
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("KAPUA_API_ENDPOINT") {
            self.kapua.api_endpoint = v;
        }
        if let Some(v) = get("KAPUA_USER") {
            self.kapua.username = v;
        }
        if let Some(v) = get("KAPUA_PASSWORD") {
            self.kapua.password = v;
        }
        if let Some(v) = get("KAPUA_TIMEOUT") {
            self.kapua.timeout_secs = match v.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => return Err(ConfigError::Invalid { key: "KAPUA_TIMEOUT", value: v }),
            };
        }
        if let Some(v) = get("KAPUA_KERNEL_HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("KAPUA_KERNEL_PORT") {
            self.server.port = v
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "KAPUA_KERNEL_PORT", value: v })?;
        }
        if let Some(v) = get("KAPUA_KERNEL_API_KEY") {
            self.server.api_key = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kapua.api_endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("KAPUA_API_ENDPOINT"));
        }
        if self.kapua.username.is_empty() {
            return Err(ConfigError::Missing("KAPUA_USER"));
        }
        if self.kapua.password.is_empty() {
            return Err(ConfigError::Missing("KAPUA_PASSWORD"));
        }
        Ok(())
    }
}

/// Normalise l'endpoint: sans slash final, toujours suffixé par /v1
pub fn normalize_base_url(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

async fn read_config_file(path: &str) -> Result<KernelConfig, ConfigError> {
    if !Path::new(path).exists() {
        tracing::info!("no {path}, using environment and defaults");
        return Ok(KernelConfig::default());
    }
    let txt = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse { path: path.to_string(), source })
}

pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var("KAPUA_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = read_config_file(&path).await?;
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_env_overrides_and_validation() {
        let vars = env(&[
            ("KAPUA_API_ENDPOINT", "https://kapua.example.com/"),
            ("KAPUA_USER", "kapua-sys"),
            ("KAPUA_PASSWORD", "secret"),
            ("KAPUA_KERNEL_PORT", "9100"),
        ]);
        let mut cfg = KernelConfig::default();
        cfg.apply_env(|k| vars.get(k).cloned()).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.kapua.username, "kapua-sys");
        assert_eq!(cfg.kapua.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.api_key, None);
    }

    #[test]
    fn test_missing_required_field() {
        let vars = env(&[("KAPUA_API_ENDPOINT", "http://kapua.test"), ("KAPUA_USER", "u")]);
        let mut cfg = KernelConfig::default();
        cfg.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing("KAPUA_PASSWORD"))));
    }

    #[test]
    fn test_invalid_timeout_is_rejected() {
        let vars = env(&[("KAPUA_TIMEOUT", "0")]);
        let mut cfg = KernelConfig::default();
        let err = cfg.apply_env(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "KAPUA_TIMEOUT", .. }));
    }

    #[test]
    fn test_yaml_config_with_partial_fields() {
        let cfg: KernelConfig = serde_yaml::from_str("kapua:\n  api_endpoint: http://kapua.test\nserver:\n  port: 8100\n").unwrap();
        assert_eq!(cfg.kapua.api_endpoint, "http://kapua.test");
        assert_eq!(cfg.kapua.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8100);
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://kapua.test"), "http://kapua.test/v1");
        assert_eq!(normalize_base_url("http://kapua.test/"), "http://kapua.test/v1");
        assert_eq!(normalize_base_url("http://kapua.test/v1/"), "http://kapua.test/v1");
    }

    #[test]
    fn test_debug_redacts_password() {
        let conf = KapuaConf { password: "hunter2".into(), ..KapuaConf::default() };
        assert!(!format!("{conf:?}").contains("hunter2"));
    }
}
