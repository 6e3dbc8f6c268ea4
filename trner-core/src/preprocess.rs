//! # Pré-processador de Sentenças
//!
//! Escolhe o(s) analisador(es) morfológico(s) e monta um [`AnnotatedToken`]
//! por token da sentença.
//!
//! | Modo     | Lema primário  | POS primária   | Visões por token |
//! |----------|----------------|----------------|------------------|
//! | `rule`   | regras         | regras         | 1                |
//! | `bridge` | processo       | `UNK`          | 1                |
//! | `hybrid` | processo       | regras         | 2                |
//!
//! Nenhum estado é mantido entre sentenças além dos caches dos próprios
//! analisadores.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bridge::BatchBridge;
use crate::config::{EngineKind, NerConfig};
use crate::morphology::{MorphAnalysis, MorphAnalyzer, RuleAnalyzer};
use crate::tokenizer::Token;

/// Uma análise marcada com o analisador que a produziu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedAnalysis {
    /// Nome do analisador (ex: "bridge", "rule"), usado como prefixo de features.
    pub source: String,
    pub analysis: MorphAnalysis,
}

/// Token com suas análises morfológicas. Vive só durante a extração de features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedToken {
    pub word: String,
    /// Lema primário.
    pub lemma: String,
    /// POS primária.
    pub pos: String,
    /// Uma visão (modo simples) ou duas (modo híbrido, a primária primeiro).
    pub analyses: Vec<SourcedAnalysis>,
}

impl AnnotatedToken {
    pub fn from_analysis(word: &str, source: &str, analysis: MorphAnalysis) -> Self {
        Self {
            word: word.to_string(),
            lemma: analysis.lemma.clone(),
            pos: analysis.pos.clone(),
            analyses: vec![SourcedAnalysis {
                source: source.to_string(),
                analysis,
            }],
        }
    }

    /// Token sem análise morfológica (lema = palavra, POS desconhecida).
    pub fn bare(word: &str) -> Self {
        Self::from_analysis(word, "identity", MorphAnalysis::identity(word))
    }

    pub fn is_hybrid(&self) -> bool {
        self.analyses.len() > 1
    }
}

/// Orquestra os analisadores para uma sentença inteira.
pub struct Preprocessor {
    engine: EngineKind,
    primary: Arc<dyn MorphAnalyzer>,
    /// Analisador em processo do modo híbrido.
    secondary: Option<Arc<dyn MorphAnalyzer>>,
}

impl Preprocessor {
    /// Um único analisador.
    pub fn single(analyzer: Arc<dyn MorphAnalyzer>) -> Self {
        let engine = if analyzer.prefers_batch() {
            EngineKind::Bridge
        } else {
            EngineKind::Rule
        };
        Self {
            engine,
            primary: analyzer,
            secondary: None,
        }
    }

    /// Modo híbrido: `batch` fornece o lema primário, `in_process` a POS primária.
    pub fn hybrid(batch: Arc<dyn MorphAnalyzer>, in_process: Arc<dyn MorphAnalyzer>) -> Self {
        Self {
            engine: EngineKind::Hybrid,
            primary: batch,
            secondary: Some(in_process),
        }
    }

    pub fn from_config(config: &NerConfig) -> Self {
        info!("pré-processador: motor {:?}", config.engine);
        match config.engine {
            EngineKind::Rule => Self::single(Arc::new(RuleAnalyzer::new())),
            EngineKind::Bridge => Self::single(Arc::new(BatchBridge::new(&config.bridge))),
            EngineKind::Hybrid => Self::hybrid(
                Arc::new(BatchBridge::new(&config.bridge)),
                Arc::new(RuleAnalyzer::new()),
            ),
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Aquece os caches dos analisadores em lote com todos os tokens de um corpus.
    pub fn warm_up(&self, tokens: &[String]) {
        self.primary.warm_up(tokens);
    }

    pub fn process_tokens(&self, tokens: &[Token]) -> Vec<AnnotatedToken> {
        let words: Vec<String> = tokens.iter().map(|t| t.text.clone()).collect();
        self.process_sentence(&words)
    }

    pub fn process_sentence(&self, tokens: &[String]) -> Vec<AnnotatedToken> {
        if tokens.is_empty() {
            return Vec::new();
        }

        let batch: Option<HashMap<String, MorphAnalysis>> = self
            .primary
            .prefers_batch()
            .then(|| self.primary.analyze_batch(tokens));
        let primary_for = |token: &String| -> MorphAnalysis {
            match &batch {
                Some(map) => map
                    .get(token)
                    .cloned()
                    .unwrap_or_else(|| MorphAnalysis::identity(token)),
                None => self.primary.analyze(token),
            }
        };

        tokens
            .iter()
            .map(|token| {
                let primary = primary_for(token);
                let Some(secondary) = &self.secondary else {
                    return AnnotatedToken::from_analysis(token, self.primary.name(), primary);
                };

                let in_process = secondary.analyze(token);
                AnnotatedToken {
                    word: token.clone(),
                    lemma: primary.lemma.clone(),
                    pos: in_process.pos.clone(),
                    analyses: vec![
                        SourcedAnalysis {
                            source: self.primary.name().to_string(),
                            analysis: primary,
                        },
                        SourcedAnalysis {
                            source: secondary.name().to_string(),
                            analysis: in_process,
                        },
                    ],
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::{Morpheme, MorphemeKind, UNKNOWN_POS};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Analisador em lote falso: lema em maiúsculas, conta chamadas em lote.
    #[derive(Default)]
    struct Upper {
        batches: AtomicUsize,
    }

    impl MorphAnalyzer for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn analyze(&self, token: &str) -> MorphAnalysis {
            let root = Morpheme {
                id: "Noun".into(),
                surface: token.into(),
                has_change: false,
                kind: MorphemeKind::Root,
                labels: vec![],
            };
            MorphAnalysis::new(token.to_uppercase(), UNKNOWN_POS, vec![root])
        }

        fn analyze_batch(&self, tokens: &[String]) -> HashMap<String, MorphAnalysis> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            tokens.iter().map(|t| (t.clone(), self.analyze(t))).collect()
        }

        fn prefers_batch(&self) -> bool {
            true
        }
    }

    fn words(ws: &[&str]) -> Vec<String> {
        ws.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_single_rule_engine() {
        let pre = Preprocessor::single(Arc::new(RuleAnalyzer::new()));
        let out = pre.process_sentence(&words(&["Ankara'da", "yaşıyor"]));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].lemma, "Ankara");
        assert_eq!(out[0].analyses[0].source, "rule");
        assert!(!out[0].is_hybrid());
        assert_eq!(pre.engine(), EngineKind::Rule);
    }

    #[test]
    fn test_batch_engine_uses_one_batch_call() {
        let upper = Arc::new(Upper::default());
        let pre = Preprocessor::single(upper.clone());
        let out = pre.process_sentence(&words(&["a", "b", "c"]));
        assert_eq!(upper.batches.load(Ordering::SeqCst), 1);
        assert_eq!(out[2].lemma, "C");
        assert_eq!(pre.engine(), EngineKind::Bridge);
    }

    #[test]
    fn test_hybrid_merges_both_views() {
        let upper = Arc::new(Upper::default());
        let pre = Preprocessor::hybrid(upper.clone(), Arc::new(RuleAnalyzer::new()));
        let out = pre.process_sentence(&words(&["Tarkan", "geliyor"]));

        assert_eq!(upper.batches.load(Ordering::SeqCst), 1);
        let t = &out[1];
        assert!(t.is_hybrid());
        // lema do analisador em lote, POS do analisador em processo
        assert_eq!(t.lemma, "GELIYOR");
        assert_eq!(t.pos, "Noun");
        assert_eq!(t.analyses[0].source, "upper");
        assert_eq!(t.analyses[1].source, "rule");
        assert_eq!(t.analyses[1].analysis.lemma, "gel");
    }

    #[test]
    fn test_empty_sentence() {
        let pre = Preprocessor::single(Arc::new(RuleAnalyzer::new()));
        assert!(pre.process_sentence(&[]).is_empty());
    }

    #[test]
    fn test_bare_token() {
        let t = AnnotatedToken::bare("Tarkan");
        assert_eq!(t.lemma, "Tarkan");
        assert_eq!(t.pos, UNKNOWN_POS);
        assert!(t.analyses[0].analysis.morphemes.is_empty());
    }
}
