//! # Pipeline NER: Orquestrador
//!
//! Conecta os estágios na ordem:
//!
//! ```text
//! texto ──tokenize──▶ tokens ──Preprocessor──▶ AnnotatedToken
//!       ──FeatureExtractor──▶ FeatureSet ──CrfModel──▶ Label
//! ```
//!
//! O pipeline é dono dos três componentes. Para qualquer sequência não vazia
//! de tokens devolve exatamente uma label por token; entrada vazia gera saída
//! vazia.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NerConfig;
use crate::corpus::{all_tokens, LabeledSentence};
use crate::crf::{CrfModel, TrainingSummary};
use crate::embeddings::{EmbeddingService, StaticEncoder};
use crate::error::{NerError, Result};
use crate::features::{FeatureExtractor, FeatureSet};
use crate::gazetteer::GazetteerIndex;
use crate::metrics::ClassificationReport;
use crate::preprocess::Preprocessor;
use crate::tagger::{labels_to_spans, EntitySpan, Label, TaggedToken};
use crate::tokenizer::{tokenize, Token};

/// Resultado de [`NerPipeline::analyze`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NerOutput {
    pub tagged_tokens: Vec<TaggedToken>,
    pub entities: Vec<EntitySpan>,
}

/// O pipeline NER principal.
pub struct NerPipeline {
    preprocessor: Preprocessor,
    extractor: FeatureExtractor,
    model: CrfModel,
}

impl NerPipeline {
    pub fn new(preprocessor: Preprocessor, extractor: FeatureExtractor, model: CrfModel) -> Self {
        Self {
            preprocessor,
            extractor,
            model,
        }
    }

    /// Monta o pipeline a partir da configuração, com um modelo ainda não treinado.
    ///
    /// Falha se o diretório de gazetteers (quando habilitados) ou o arquivo
    /// de embeddings (quando habilitados) não puderem ser carregados.
    pub fn from_config(config: &NerConfig) -> Result<Self> {
        config.validate()?;

        let gazetteers = if config.features.use_gazetteers {
            let index = GazetteerIndex::load(&config.gazetteer_dir)?;
            if index.is_empty() {
                warn!(
                    "nenhum gazetteer em {}; features in_*_tokens ficarão sempre falsas",
                    config.gazetteer_dir.display()
                );
            }
            index
        } else {
            GazetteerIndex::empty()
        };
        let mut extractor = FeatureExtractor::new(config.features.clone(), Arc::new(gazetteers));

        if config.features.use_embeddings {
            let path = config.embeddings_path.as_ref().ok_or_else(|| {
                NerError::Config("use_embeddings exige embeddings_path".to_string())
            })?;
            let encoder = StaticEncoder::load(path)?;
            let service =
                EmbeddingService::new(Box::new(encoder), config.features.embedding_cache_capacity);
            if service.dims() < config.features.embedding_dims {
                warn!(
                    "embeddings com {} dimensões; embedding_dims pede {}",
                    service.dims(),
                    config.features.embedding_dims
                );
            }
            extractor = extractor.with_embeddings(Arc::new(service));
        }

        Ok(Self::new(
            Preprocessor::from_config(config),
            extractor,
            CrfModel::new(config.crf.clone()),
        ))
    }

    pub fn with_model(mut self, model: CrfModel) -> Self {
        self.model = model;
        self
    }

    pub fn model(&self) -> &CrfModel {
        &self.model
    }

    /// Features de uma sentença já tokenizada.
    pub fn featurize(&self, tokens: &[String]) -> Vec<FeatureSet> {
        let annotated = self.preprocessor.process_sentence(tokens);
        self.extractor.sentence_features(&annotated)
    }

    /// Features e labels de um corpus inteiro. Os tokens são analisados em
    /// lote antes, para que cada sentença só encontre cache.
    pub fn featurize_corpus(
        &self,
        sentences: &[LabeledSentence],
    ) -> (Vec<Vec<FeatureSet>>, Vec<Vec<Label>>) {
        let tokens = all_tokens(sentences);
        info!("pré-analisando {} tokens", tokens.len());
        self.preprocessor.warm_up(&tokens);

        let x: Vec<Vec<FeatureSet>> = sentences
            .par_iter()
            .map(|s| self.featurize(&s.tokens))
            .collect();
        let y = sentences.iter().map(|s| s.labels.clone()).collect();
        (x, y)
    }

    pub fn train(&mut self, sentences: &[LabeledSentence]) -> Result<TrainingSummary> {
        if sentences.is_empty() {
            return Err(NerError::EmptyTrainingData);
        }
        let (x, y) = self.featurize_corpus(sentences);
        self.model.train(&x, &y)
    }

    pub fn evaluate(&self, sentences: &[LabeledSentence]) -> Result<(f64, ClassificationReport)> {
        let (x, y) = self.featurize_corpus(sentences);
        self.model.evaluate(&x, &y)
    }

    /// Uma label por token.
    pub fn label_tokens(&self, tokens: &[String]) -> Vec<Label> {
        if tokens.is_empty() {
            return Vec::new();
        }
        self.model.predict_single(&self.featurize(tokens))
    }

    /// Tokeniza, rotula e agrupa as entidades de um texto bruto.
    pub fn analyze(&self, text: &str) -> NerOutput {
        let tokens: Vec<Token> = tokenize(text);
        let labels = if tokens.is_empty() {
            Vec::new()
        } else {
            let annotated = self.preprocessor.process_tokens(&tokens);
            self.model.predict_single(&self.extractor.sentence_features(&annotated))
        };

        let word_refs: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        let entities = labels_to_spans(&word_refs, &labels)
            .into_iter()
            .map(|mut span| {
                // texto original, com a pontuação e os espaços que havia
                let start = tokens[span.start_token].start;
                let end = tokens[span.end_token].end;
                span.text = text[start..end].to_string();
                span
            })
            .collect();

        let tagged_tokens = tokens
            .into_iter()
            .zip(labels)
            .map(|(token, label)| TaggedToken { token, label })
            .collect();

        NerOutput {
            tagged_tokens,
            entities,
        }
    }
}
