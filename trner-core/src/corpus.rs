//! # Corpus Anotado no Formato BIO
//!
//! Leitura de sentenças rotuladas para treino e avaliação. Dois formatos:
//!
//! **CoNLL** (uma linha por token, linha em branco entre sentenças; a
//! primeira coluna é o token, a última a label; linhas iniciadas por `#` são
//! comentários, a menos que terminem numa label válida, como `#Ankara B-LOC`):
//!
//! ```text
//! Tarkan      B-PER
//! İstanbul'da B-LOC
//! konser      O
//!
//! Koç         B-COMPANY
//! ```
//!
//! **JSON** (lista de objetos `{"tokens": [...], "tags": [...]}`).
//!
//! A escolha é pela extensão do arquivo: `.json` ou qualquer outra (CoNLL).

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{NerError, Result};
use crate::tagger::Label;

/// O que fazer com labels fora do conjunto fechado (ex: `B-MISC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelPolicy {
    /// Erro [`NerError::UnknownLabel`].
    #[default]
    Strict,
    /// Vira `O`.
    Scrub,
}

/// Uma sentença com uma label por token.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSentence {
    pub tokens: Vec<String>,
    pub labels: Vec<Label>,
}

impl LabeledSentence {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Uma linha `#...` só é token se tiver duas colunas ou mais e a última for label.
fn is_comment(line: &str) -> bool {
    if !line.starts_with('#') {
        return false;
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    fields.len() < 2 || !fields.last().is_some_and(|l| l.parse::<Label>().is_ok())
}

fn parse_label(raw: &str, policy: LabelPolicy, scrubbed: &mut usize) -> Result<Label> {
    match (raw.parse::<Label>(), policy) {
        (Ok(label), _) => Ok(label),
        (Err(_), LabelPolicy::Scrub) => {
            *scrubbed += 1;
            Ok(Label::Outside)
        }
        (Err(e), LabelPolicy::Strict) => Err(e),
    }
}

/// Lê texto no formato CoNLL.
pub fn parse_conll(text: &str, policy: LabelPolicy) -> Result<Vec<LabeledSentence>> {
    let mut sentences = Vec::new();
    let mut current = LabeledSentence {
        tokens: Vec::new(),
        labels: Vec::new(),
    };
    let mut scrubbed = 0;

    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if is_comment(line) {
            continue;
        }
        if line.is_empty() {
            if !current.is_empty() {
                sentences.push(std::mem::replace(
                    &mut current,
                    LabeledSentence {
                        tokens: Vec::new(),
                        labels: Vec::new(),
                    },
                ));
            }
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let (Some(token), Some(tag), true) = (fields.first(), fields.last(), fields.len() >= 2)
        else {
            return Err(NerError::Config(format!(
                "linha {}: esperado \"token label\", encontrado {line:?}",
                n + 1
            )));
        };
        current.tokens.push(token.to_string());
        current.labels.push(parse_label(tag, policy, &mut scrubbed)?);
    }
    if !current.is_empty() {
        sentences.push(current);
    }

    if scrubbed > 0 {
        warn!("{scrubbed} labels desconhecidas substituídas por O");
    }
    Ok(sentences)
}

#[derive(Deserialize)]
struct JsonSentence {
    tokens: Vec<String>,
    tags: Vec<String>,
}

/// Lê a lista JSON `[{"tokens": [...], "tags": [...]}, ...]`.
pub fn parse_json(text: &str, policy: LabelPolicy) -> Result<Vec<LabeledSentence>> {
    let raw: Vec<JsonSentence> = serde_json::from_str(text)?;
    let mut scrubbed = 0;
    let mut sentences = Vec::with_capacity(raw.len());

    for item in raw {
        if item.tokens.len() != item.tags.len() {
            return Err(NerError::LengthMismatch {
                what: "tokens vs tags",
                left: item.tokens.len(),
                right: item.tags.len(),
            });
        }
        let labels = item
            .tags
            .iter()
            .map(|t| parse_label(t, policy, &mut scrubbed))
            .collect::<Result<Vec<_>>>()?;
        sentences.push(LabeledSentence {
            tokens: item.tokens,
            labels,
        });
    }

    if scrubbed > 0 {
        warn!("{scrubbed} labels desconhecidas substituídas por O");
    }
    Ok(sentences)
}

/// Carrega um corpus, escolhendo o formato pela extensão.
pub fn load_corpus(path: impl AsRef<Path>, policy: LabelPolicy) -> Result<Vec<LabeledSentence>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| NerError::io(path, e))?;
    let sentences = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_json(&text, policy)?,
        _ => parse_conll(&text, policy)?,
    };
    info!(
        "corpus {}: {} sentenças, {} tokens",
        path.display(),
        sentences.len(),
        sentences.iter().map(LabeledSentence::len).sum::<usize>()
    );
    Ok(sentences)
}

/// Todos os tokens do corpus, na ordem (para aquecer caches em lote).
pub fn all_tokens(sentences: &[LabeledSentence]) -> Vec<String> {
    sentences
        .iter()
        .flat_map(|s| s.tokens.iter().cloned())
        .collect()
}
