use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use crate::error::{EngineError, Result};

const DEFAULT_APP_NAME: &str = "minispark";
const DEFAULT_MAX_WORKERS: usize = 2;
const DEFAULT_PARTITIONS: usize = 4;
const DEFAULT_BROADCAST_MAX_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_JOIN_WARN_THRESHOLD: usize = 100_000;

/// Configuración del engine.
///
/// Orden de precedencia: valores por defecto, archivo JSON
/// (`from_json_file`) y por último variables de entorno (`from_env`,
/// `apply_env`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nombre lógico de la aplicación, aparece en los logs.
    pub app_name: String,

    /// Tareas de partición ejecutándose a la vez (slots del pool).
    pub max_workers: usize,

    /// Particiones que usan las fuentes y shuffles cuando no se indican.
    pub default_partitions: usize,

    /// Tamaño serializado máximo de un valor broadcast.
    pub broadcast_max_bytes: usize,

    /// |L_k| x |R_k| a partir del cual un join emite un aviso de cardinalidad.
    pub join_warn_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            default_partitions: DEFAULT_PARTITIONS,
            broadcast_max_bytes: DEFAULT_BROADCAST_MAX_BYTES,
            join_warn_threshold: DEFAULT_JOIN_WARN_THRESHOLD,
        }
    }
}

/// Lee una env var numérica; si no está o no parsea, usa el default.
fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Defaults sobreescritos por las variables MINISPARK_*.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Carga un JSON parcial (los campos ausentes toman el default).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let cfg: EngineConfig = serde_json::from_str(&content)?;
        Ok(cfg)
    }

    pub fn apply_env(mut self) -> Self {
        if let Ok(name) = env::var("MINISPARK_APP_NAME") {
            if !name.trim().is_empty() {
                self.app_name = name;
            }
        }
        self.max_workers = env_usize("MINISPARK_WORKERS", self.max_workers);
        self.default_partitions = env_usize("MINISPARK_PARTITIONS", self.default_partitions);
        self.broadcast_max_bytes =
            env_usize("MINISPARK_BROADCAST_MAX_BYTES", self.broadcast_max_bytes);
        self.join_warn_threshold =
            env_usize("MINISPARK_JOIN_WARN_THRESHOLD", self.join_warn_threshold);
        self
    }

    pub fn with_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_default_partitions(mut self, partitions: usize) -> Self {
        self.default_partitions = partitions;
        self
    }

    pub fn with_broadcast_max_bytes(mut self, bytes: usize) -> Self {
        self.broadcast_max_bytes = bytes;
        self
    }

    pub fn with_join_warn_threshold(mut self, threshold: usize) -> Self {
        self.join_warn_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(EngineError::InvalidConfig(
                "max_workers debe ser al menos 1".to_string(),
            ));
        }
        if self.default_partitions == 0 {
            return Err(EngineError::InvalidConfig(
                "default_partitions debe ser al menos 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn defaults_son_validos() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_workers, 2);
        assert_eq!(cfg.default_partitions, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn from_env_respeta_env_var() {
        env::set_var("MINISPARK_JOIN_WARN_THRESHOLD", "1234");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.join_warn_threshold, 1234);
        env::remove_var("MINISPARK_JOIN_WARN_THRESHOLD");
    }

    #[test]
    fn json_parcial_completa_con_defaults() {
        let dir = env::temp_dir().join("engine_tests").join("config_json");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.json");
        fs::write(&path, r#"{ "max_workers": 8, "app_name": "pagerank" }"#).unwrap();

        let cfg = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.app_name, "pagerank");
        assert_eq!(cfg.default_partitions, 4);
    }

    #[test]
    fn validate_rechaza_cero_workers() {
        let cfg = EngineConfig::default().with_workers(0);
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }
}
