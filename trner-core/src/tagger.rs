//! # Esquema de Tags BIO e Tipos de Entidade
//!
//! Define o conjunto fechado de labels que o modelo pode emitir.
//!
//! | Tipo    | Significado           | Gazetteer de origem |
//! |---------|-----------------------|---------------------|
//! | PER     | Pessoa                | `kisiler`           |
//! | LOC     | Local                 | `yerler`            |
//! | ORG     | Instituição           | `kurumlar`          |
//! | COMPANY | Empresa               | `sirketler`         |
//! | GROUP   | Grupo / banda / time  | `topluluklar`       |
//! | MOVIE   | Filme / obra          | `film_muzik`        |
//!
//! ## Esquema BIO
//!
//! - `B-TAG`: primeiro token de uma entidade
//! - `I-TAG`: tokens seguintes da mesma entidade
//! - `O`: fora de entidade
//!
//! O CRF é treinado com todas as transições permitidas, então pode emitir
//! `I-X` logo após `O`. Quem consome a saída usa [`repair_bio`] ou
//! [`labels_to_spans`], que toleram essas sequências.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NerError;
use crate::tokenizer::Token;

/// Tipos de entidade reconhecidos. Conjunto fechado.
///
/// Em JSON é o nome curto (`"PER"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EntityType {
    Per,
    Loc,
    Org,
    Company,
    Group,
    Movie,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Per,
        EntityType::Loc,
        EntityType::Org,
        EntityType::Company,
        EntityType::Group,
        EntityType::Movie,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityType::Per => "PER",
            EntityType::Loc => "LOC",
            EntityType::Org => "ORG",
            EntityType::Company => "COMPANY",
            EntityType::Group => "GROUP",
            EntityType::Movie => "MOVIE",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        EntityType::ALL.into_iter().find(|t| t.name() == s)
    }
}

impl From<EntityType> for String {
    fn from(t: EntityType) -> Self {
        t.name().to_string()
    }
}

impl TryFrom<String> for EntityType {
    type Error = NerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        EntityType::from_name(&s).ok_or(NerError::UnknownLabel(s))
    }
}

/// Label BIO de um token. Em JSON é a string BIO (`"B-PER"`, `"O"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Label {
    Begin(EntityType),
    Inside(EntityType),
    Outside,
}

impl Label {
    /// Índice estável: `O` = 0, depois `B-X`, `I-X` na ordem de [`EntityType::ALL`].
    pub fn index(&self) -> usize {
        let type_index = |t: &EntityType| {
            EntityType::ALL
                .iter()
                .position(|x| x == t)
                .unwrap_or_default()
        };
        match self {
            Label::Outside => 0,
            Label::Begin(t) => 1 + 2 * type_index(t),
            Label::Inside(t) => 2 + 2 * type_index(t),
        }
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            Label::Begin(t) | Label::Inside(t) => Some(*t),
            Label::Outside => None,
        }
    }

    /// `I-X` só é válida depois de `B-X` ou `I-X`; o resto sempre é válido.
    pub fn is_valid_transition(prev: Option<&Label>, next: &Label) -> bool {
        match next {
            Label::Inside(t) => matches!(
                prev,
                Some(Label::Begin(p)) | Some(Label::Inside(p)) if p == t
            ),
            _ => true,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Begin(t) => write!(f, "B-{}", t.name()),
            Label::Inside(t) => write!(f, "I-{}", t.name()),
            Label::Outside => write!(f, "O"),
        }
    }
}

impl FromStr for Label {
    type Err = NerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "O" {
            return Ok(Label::Outside);
        }
        let unknown = || NerError::UnknownLabel(s.to_string());
        let (prefix, name) = s.split_once('-').ok_or_else(unknown)?;
        let t = EntityType::from_name(name).ok_or_else(unknown)?;
        match prefix {
            "B" => Ok(Label::Begin(t)),
            "I" => Ok(Label::Inside(t)),
            _ => Err(unknown()),
        }
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.to_string()
    }
}

impl TryFrom<String> for Label {
    type Error = NerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Um token com a label atribuída pelo modelo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedToken {
    pub token: Token,
    pub label: Label,
}

/// Uma entidade (span de tokens) reconstruída a partir de labels BIO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub text: String,
    pub entity_type: EntityType,
    /// Índice do primeiro token
    pub start_token: usize,
    /// Índice do último token (inclusivo)
    pub end_token: usize,
}

/// Corrige sequências inválidas: um `I-X` que não segue `B-X`/`I-X` vira `B-X`.
pub fn repair_bio(labels: &[Label]) -> Vec<Label> {
    let mut repaired: Vec<Label> = Vec::with_capacity(labels.len());
    for label in labels {
        let fixed = match label {
            Label::Inside(t) if !Label::is_valid_transition(repaired.last(), label) => {
                Label::Begin(*t)
            }
            other => *other,
        };
        repaired.push(fixed);
    }
    repaired
}

/// Agrupa labels BIO em spans de entidades.
///
/// Um `I-X` órfão abre uma entidade nova (mesma política de [`repair_bio`]),
/// então nenhum token marcado é descartado.
///
/// # Exemplo
/// `[B-PER, I-PER, O, I-LOC]` -> `[EntitySpan(PER, 0..=1), EntitySpan(LOC, 3..=3)]`
pub fn labels_to_spans(words: &[&str], labels: &[Label]) -> Vec<EntitySpan> {
    let repaired = repair_bio(labels);
    let mut spans = Vec::new();
    let mut i = 0;

    while i < repaired.len().min(words.len()) {
        if let Label::Begin(t) = repaired[i] {
            let mut j = i + 1;
            while j < repaired.len().min(words.len()) && repaired[j] == Label::Inside(t) {
                j += 1;
            }
            spans.push(EntitySpan {
                text: words[i..j].join(" "),
                entity_type: t,
                start_token: i,
                end_token: j - 1,
            });
            i = j;
        } else {
            i += 1;
        }
    }

    spans
}
