use crate::artifact::DEFAULT_MODEL_PATH;
use crate::inference::ModelCache;
use crate::worldbank::DEFAULT_BASE_URL;
use std::path::PathBuf;

/// Server settings, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub model_path: PathBuf,
    pub model_cache: ModelCache,
    pub static_dir: PathBuf,
    /// Empty means any origin is accepted.
    pub cors_origins: Vec<String>,
    pub world_bank_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            workers: num_cpus::get(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            model_cache: ModelCache::Shared,
            static_dir: PathBuf::from("./static"),
            cors_origins: Vec::new(),
            world_bank_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port
                .parse()
                .map_err(|_| format!("PORT must be a port number, got '{port}'"))?;
        }
        // Unparseable worker counts fall back to the CPU count.
        if let Some(workers) = lookup("WORKERS") {
            config.workers = workers
                .parse()
                .ok()
                .filter(|&w| w > 0)
                .unwrap_or(config.workers);
        }
        if let Some(path) = lookup("MODEL_PATH") {
            config.model_path = PathBuf::from(path);
        }
        if let Some(mode) = lookup("MODEL_CACHE") {
            config.model_cache = mode.parse()?;
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }
        if let Some(origins) = lookup("CORS_ALLOWED_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(url) = lookup("WORLD_BANK_URL") {
            config.world_bank_url = url;
        }

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert_eq!(config.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(config.model_cache, ModelCache::Shared);
        assert!(config.cors_origins.is_empty());
        assert!(config.workers >= 1);
    }

    #[test]
    fn overrides_are_applied() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("WORKERS", "3"),
            ("MODEL_CACHE", "per-request"),
            ("CORS_ALLOWED_ORIGINS", "http://localhost:8080, ,http://127.0.0.1:8080"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.workers, 3);
        assert_eq!(config.model_cache, ModelCache::PerRequest);
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:8080", "http://127.0.0.1:8080"]
        );
    }

    #[test]
    fn bad_values() {
        assert!(ServerConfig::from_lookup(lookup(&[("PORT", "http")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("MODEL_CACHE", "never")])).is_err());

        let config = ServerConfig::from_lookup(lookup(&[("WORKERS", "zero")])).unwrap();
        assert_eq!(config.workers, num_cpus::get());
    }
}
