//! # Erros do pipeline
//!
//! Apenas erros de configuração e de formato de dados chegam ao chamador.
//! Falhas do analisador morfológico nunca aparecem aqui: elas são recuperadas
//! localmente com a análise identidade (ver [`crate::morphology`]).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NerError {
    /// Diretório de gazetteers inexistente.
    #[error("diretório de gazetteers não encontrado: {0}")]
    GazetteerDirNotFound(PathBuf),

    /// Arquivo de modelo inexistente.
    #[error("nenhum modelo encontrado em {0}")]
    ModelNotFound(PathBuf),

    #[error("erro de E/S em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("falha de serialização: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuração inválida: {0}")]
    Config(String),

    /// Treino chamado sem nenhuma sentença.
    #[error("dados de treino vazios")]
    EmptyTrainingData,

    /// Comprimentos incompatíveis entre sequências paralelas.
    #[error("comprimentos incompatíveis ({what}): {left} != {right}")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },

    /// Falha interna do L-BFGS durante o treino.
    #[error("otimizador: {0}")]
    Optimizer(String),

    #[error("label desconhecida: {0:?}")]
    UnknownLabel(String),

    #[error("embeddings: {0}")]
    Embedding(String),
}

impl NerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NerError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, NerError>;
