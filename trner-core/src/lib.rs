//! # trner-core: Reconhecimento de Entidades Nomeadas para o Turco
//!
//! Pipeline de NER com CRF de cadeia linear: análise morfológica, extração
//! de features e um modelo de sequência treinável.
//!
//! ## Arquitetura do Sistema
//!
//! 1.  **Entrada**: texto bruto ou tokens já segmentados.
//! 2.  **Tokenização** ([`tokenizer`]): divide o texto preservando offsets.
//! 3.  **Morfologia** ([`morphology`], [`bridge`], [`preprocess`]): cada token
//!     vira lema + POS + morfemas, por regras em processo, por um serviço
//!     externo em lote ou pelos dois (modo híbrido).
//! 4.  **Features** ([`features`]): forma da palavra, morfologia, janelas de
//!     [`gazetteer`] e, opcionalmente, [`embeddings`].
//! 5.  **CRF** ([`crf`]): treino com L-BFGS/OWL-QN, decodificação exata
//!     com Viterbi ([`viterbi`]) e avaliação ([`metrics`]).
//! 6.  **Saída**: uma [`Label`] BIO por token e os [`EntitySpan`]s.
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use std::sync::Arc;
//! use trner_core::config::FeatureConfig;
//! use trner_core::features::FeatureExtractor;
//! use trner_core::gazetteer::{Gazetteer, GazetteerIndex};
//! use trner_core::morphology::RuleAnalyzer;
//! use trner_core::preprocess::Preprocessor;
//!
//! let mut gazetteers = GazetteerIndex::empty();
//! gazetteers.insert("kisiler", Gazetteer::from_entries(["Tarkan"]));
//!
//! let preprocessor = Preprocessor::single(Arc::new(RuleAnalyzer::new()));
//! let extractor = FeatureExtractor::new(FeatureConfig::default(), Arc::new(gazetteers));
//!
//! let words: Vec<String> = ["Tarkan", "sahneye", "çıktı"].map(String::from).to_vec();
//! let features = extractor.sentence_features(&preprocessor.process_sentence(&words));
//! assert!(features[0].is_true("in_kisiler_tokens"));
//! ```

pub mod bridge;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod crf;
pub mod embeddings;
pub mod error;
pub mod features;
pub mod gazetteer;
pub mod metrics;
pub mod morphology;
pub mod pipeline;
pub mod preprocess;
pub mod tagger;
pub mod tokenizer;
pub mod viterbi;

pub use config::NerConfig;
pub use error::{NerError, Result};
pub use pipeline::{NerOutput, NerPipeline};
pub use tagger::{EntitySpan, EntityType, Label, TaggedToken};
pub use tokenizer::Token;
