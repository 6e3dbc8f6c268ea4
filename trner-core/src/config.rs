//! # Configuração
//!
//! Estruturas tipadas desserializadas de um arquivo JSON. Todo campo tem
//! valor padrão, então um arquivo parcial (ou nenhum arquivo) é válido.
//!
//! ```json
//! {
//!   "engine": "hybrid",
//!   "gazetteer_dir": "gazetteers",
//!   "bridge": { "program": "dotnet", "args": ["run", "--project", "nuve_wrapper"] },
//!   "crf": { "c1": 0.1, "c2": 0.1, "max_iterations": 100 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NerError, Result};

/// Qual(is) analisador(es) morfológico(s) o pré-processador usa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Analisador em processo, baseado em regras de sufixos.
    #[default]
    Rule,
    /// Serviço externo em lote (ver [`crate::bridge`]).
    Bridge,
    /// Os dois ao mesmo tempo, com visões separadas por token.
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NerConfig {
    pub engine: EngineKind,
    pub gazetteer_dir: PathBuf,
    /// Arquivo de vetores de sub-palavras; obrigatório se `features.use_embeddings`.
    pub embeddings_path: Option<PathBuf>,
    pub bridge: BridgeConfig,
    pub features: FeatureConfig,
    pub crf: CrfParams,
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            gazetteer_dir: PathBuf::from("gazetteers"),
            embeddings_path: None,
            bridge: BridgeConfig::default(),
            features: FeatureConfig::default(),
            crf: CrfParams::default(),
        }
    }
}

impl NerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| NerError::io(path, e))?;
        let config: NerConfig = serde_json::from_str(&raw)
            .map_err(|e| NerError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.crf.validate()?;
        if self.features.use_embeddings && self.embeddings_path.is_none() {
            return Err(NerError::Config(
                "use_embeddings exige embeddings_path".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parâmetros do cliente do processo externo de análise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_ms: u64,
    /// Tentativas adicionais após a primeira falha.
    pub max_retries: u32,
    pub cache_capacity: usize,
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "dotnet".to_string(),
            args: vec![
                "run".to_string(),
                "--project".to_string(),
                "nuve_wrapper".to_string(),
            ],
            timeout_ms: 60_000,
            max_retries: 1,
            cache_capacity: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub use_morphology: bool,
    pub use_gazetteers: bool,
    pub use_embeddings: bool,
    /// Quantas dimensões do embedding viram features escalares.
    pub embedding_dims: usize,
    pub embedding_cache_capacity: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            use_morphology: true,
            use_gazetteers: true,
            use_embeddings: false,
            embedding_dims: 16,
            embedding_cache_capacity: 1024,
        }
    }
}

/// Hiperparâmetros do treino do CRF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrfParams {
    /// Regularização L1 (esparsidade).
    pub c1: f64,
    /// Regularização L2 (pesos pequenos).
    pub c2: f64,
    pub max_iterations: usize,
    /// Critério de parada: `‖g‖ / max(1, ‖w‖) <= epsilon`.
    pub epsilon: f64,
    pub all_possible_transitions: bool,
}

impl Default for CrfParams {
    fn default() -> Self {
        Self {
            c1: 0.1,
            c2: 0.1,
            max_iterations: 100,
            epsilon: 1e-5,
            all_possible_transitions: true,
        }
    }
}

impl CrfParams {
    pub fn validate(&self) -> Result<()> {
        if self.c1 < 0.0 || self.c2 < 0.0 {
            return Err(NerError::Config(
                "c1 e c2 não podem ser negativos".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(NerError::Config("max_iterations deve ser > 0".to_string()));
        }
        if self.epsilon <= 0.0 {
            return Err(NerError::Config("epsilon deve ser > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: NerConfig =
            serde_json::from_str(r#"{"engine": "hybrid", "crf": {"c1": 0.5}}"#).unwrap();
        assert_eq!(config.engine, EngineKind::Hybrid);
        assert!((config.crf.c1 - 0.5).abs() < 1e-12);
        assert!((config.crf.c2 - 0.1).abs() < 1e-12);
        assert_eq!(config.features.embedding_dims, 16);
        assert_eq!(config.bridge.program, "dotnet");
    }

    #[test]
    fn test_embeddings_require_path() {
        let mut config = NerConfig::default();
        config.features.use_embeddings = true;
        assert!(matches!(config.validate(), Err(NerError::Config(_))));
    }

    #[test]
    fn test_crf_params_are_checked() {
        let mut config = NerConfig::default();
        config.crf.epsilon = 0.0;
        assert!(matches!(config.validate(), Err(NerError::Config(_))));

        config.crf = CrfParams {
            c1: -0.1,
            ..CrfParams::default()
        };
        assert!(matches!(config.validate(), Err(NerError::Config(_))));
    }

    #[test]
    fn test_missing_config_file_is_io_error() {
        let err = NerConfig::from_file("/nao/existe/trner.json").unwrap_err();
        assert!(matches!(err, NerError::Io { .. }));
    }
}
