//! # Análise Morfológica: Interface Uniforme
//!
//! Todo analisador resolve um token em `(lema, POS, morfemas)` através do
//! trait [`MorphAnalyzer`]. Implementações:
//!
//! - [`RuleAnalyzer`]: em processo, remove o sufixo turco mais provável por regras;
//! - [`crate::bridge::BatchBridge`]: delega a um processo externo em lote.
//!
//! ## Política de falha
//!
//! `analyze` nunca falha. Se o analisador não consegue produzir nada, o
//! resultado é a análise identidade: lema = token, POS = `"UNK"`, sem morfemas
//! ([`MorphAnalysis::identity`]). Para o extrator de features isso é só uma
//! feature pouco informativa, nunca um erro.
//!
//! ## Morfemas
//!
//! ```text
//! Ankara'dan  →  [Root "Ankara"] [Suffix "'dan" (Abl)]
//! ```
//! O primeiro morfema, se existir, é sempre a raiz; os demais são sufixos na
//! ordem da superfície.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// POS usada quando o analisador não sabe.
pub const UNKNOWN_POS: &str = "UNK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MorphemeKind {
    Root,
    Suffix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Morpheme {
    /// Identificador do morfema (ex: "Noun", "Abl", "Plu").
    pub id: String,
    /// Realização na superfície (ex: "'dan").
    pub surface: String,
    /// A superfície difere da forma lexical (harmonia vocálica, etc.).
    pub has_change: bool,
    pub kind: MorphemeKind,
    /// Rótulos semânticos anexados ao morfema.
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphAnalysis {
    pub lemma: String,
    pub pos: String,
    pub morphemes: Vec<Morpheme>,
}

impl MorphAnalysis {
    /// Monta uma análise garantindo a invariante raiz-primeiro.
    pub fn new(lemma: impl Into<String>, pos: impl Into<String>, mut morphemes: Vec<Morpheme>) -> Self {
        for (i, m) in morphemes.iter_mut().enumerate() {
            m.kind = if i == 0 {
                MorphemeKind::Root
            } else {
                MorphemeKind::Suffix
            };
        }
        Self {
            lemma: lemma.into(),
            pos: pos.into(),
            morphemes,
        }
    }

    /// Análise degradada: o próprio token como lema.
    pub fn identity(token: &str) -> Self {
        Self {
            lemma: token.to_string(),
            pos: UNKNOWN_POS.to_string(),
            morphemes: Vec::new(),
        }
    }

    pub fn is_identity_of(&self, token: &str) -> bool {
        self.lemma == token && self.morphemes.is_empty()
    }
}

/// Interface comum a todos os analisadores morfológicos.
pub trait MorphAnalyzer: Send + Sync {
    /// Nome curto, usado em logs e como prefixo de features no modo híbrido.
    fn name(&self) -> &'static str;

    /// Analisa um token. Nunca falha (ver política de falha no módulo).
    fn analyze(&self, token: &str) -> MorphAnalysis;

    /// Analisa vários tokens de uma vez. Backends que amortizam custo por
    /// chamada (processo externo) sobrescrevem isto.
    fn analyze_batch(&self, tokens: &[String]) -> HashMap<String, MorphAnalysis> {
        tokens
            .iter()
            .map(|t| (t.clone(), self.analyze(t)))
            .collect()
    }

    /// `true` se `analyze_batch` é mais barato que N chamadas de `analyze`.
    fn prefers_batch(&self) -> bool {
        false
    }

    /// Prepara o analisador para um vocabulário conhecido de antemão.
    /// Só analisadores com estado (cache, processo externo) fazem algo aqui.
    fn warm_up(&self, _tokens: &[String]) {}
}

/// Sufixos turcos removidos pelo [`RuleAnalyzer`], na ordem em que são testados.
///
/// `(sufixo, id do morfema, rótulo)`. Variantes mais longas vêm antes das
/// mais curtas do mesmo grupo.
const SUFFIXES: &[(&str, &str, &str)] = &[
    ("'tan", "Abl", "case"),
    ("'ten", "Abl", "case"),
    ("'dan", "Abl", "case"),
    ("'den", "Abl", "case"),
    ("'nın", "Gen", "case"),
    ("'nin", "Gen", "case"),
    ("'nun", "Gen", "case"),
    ("'nün", "Gen", "case"),
    ("'ta", "Loc", "case"),
    ("'te", "Loc", "case"),
    ("'da", "Loc", "case"),
    ("'de", "Loc", "case"),
    ("'ın", "Gen", "case"),
    ("'in", "Gen", "case"),
    ("'un", "Gen", "case"),
    ("'ün", "Gen", "case"),
    ("'ya", "Dat", "case"),
    ("'ye", "Dat", "case"),
    ("'yı", "Acc", "case"),
    ("'yi", "Acc", "case"),
    ("'a", "Dat", "case"),
    ("'e", "Dat", "case"),
    ("'ı", "Acc", "case"),
    ("'i", "Acc", "case"),
    ("'u", "Acc", "case"),
    ("'ü", "Acc", "case"),
    ("lar", "Plu", "number"),
    ("ler", "Plu", "number"),
    ("dır", "Cop", "verbal"),
    ("dir", "Cop", "verbal"),
    ("dur", "Cop", "verbal"),
    ("dür", "Cop", "verbal"),
    ("mış", "Narr", "verbal"),
    ("miş", "Narr", "verbal"),
    ("muş", "Narr", "verbal"),
    ("müş", "Narr", "verbal"),
    ("ıyor", "Prog", "verbal"),
    ("iyor", "Prog", "verbal"),
    ("uyor", "Prog", "verbal"),
    ("üyor", "Prog", "verbal"),
    ("yor", "Prog", "verbal"),
];

const ADJ_ENDINGS: &[&str] = &["lı", "li", "lu", "lü", "sız", "siz"];

/// Analisador em processo baseado em regras de sufixo.
///
/// Remove no máximo um sufixo e estima a POS por padrões simples. É o
/// analisador padrão e o par "em processo" do modo híbrido.
#[derive(Debug, Clone, Default)]
pub struct RuleAnalyzer;

impl RuleAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn guess_pos(word: &str) -> &'static str {
        let lower = word.to_lowercase();
        if word.chars().next().is_some_and(char::is_uppercase) {
            "Noun"
        } else if lower.ends_with("mak") || lower.ends_with("mek") {
            "Verb"
        } else if ADJ_ENDINGS.iter().any(|s| lower.ends_with(s)) {
            "Adj"
        } else {
            "Noun"
        }
    }
}

impl MorphAnalyzer for RuleAnalyzer {
    fn name(&self) -> &'static str {
        "rule"
    }

    fn analyze(&self, token: &str) -> MorphAnalysis {
        if token.trim().is_empty() {
            return MorphAnalysis::identity(token);
        }

        let pos = Self::guess_pos(token);
        // Apóstrofo tipográfico conta como o ASCII; ambos têm um único char.
        let normalized: String = token
            .to_lowercase()
            .chars()
            .map(|c| if c == '\u{2019}' { '\'' } else { c })
            .collect();

        let matched = SUFFIXES
            .iter()
            .find(|(suffix, _, _)| normalized.ends_with(suffix));

        let token_chars: Vec<char> = token.chars().collect();
        if let Some((suffix, id, label)) = matched {
            let suffix_len = suffix.chars().count();
            // O lowercase pode mudar a contagem de chars ("İ" → "i̇"); nesse caso
            // o corte por posição não é confiável.
            if suffix_len < token_chars.len()
                && normalized.chars().count() == token_chars.len()
            {
                let cut = token_chars.len() - suffix_len;
                let lemma: String = token_chars[..cut].iter().collect();
                let surface: String = token_chars[cut..].iter().collect();
                let morphemes = vec![
                    Morpheme {
                        id: pos.to_string(),
                        surface: lemma.clone(),
                        has_change: false,
                        kind: MorphemeKind::Root,
                        labels: Vec::new(),
                    },
                    Morpheme {
                        id: (*id).to_string(),
                        surface,
                        has_change: false,
                        kind: MorphemeKind::Suffix,
                        labels: vec![(*label).to_string()],
                    },
                ];
                return MorphAnalysis::new(lemma, pos, morphemes);
            }
        }

        let root = Morpheme {
            id: pos.to_string(),
            surface: token.to_string(),
            has_change: false,
            kind: MorphemeKind::Root,
            labels: Vec::new(),
        };
        MorphAnalysis::new(token, pos, vec![root])
    }
}
