//! # Engenharia de Features para NER
//!
//! Para cada token anotado, produz um [`FeatureSet`]: mapa esparso
//! `nome → valor` com três tipos de valor ([`FeatureValue`]).
//!
//! ## Features Implementadas
//!
//! ### Token atual
//! - `bias` (sempre 1.0), `word.lower()`
//! - `word.isupper()`, `word.istitle()`, `word.isdigit()`, `word.has_apostrophe`
//!
//! ### Morfologia (`use_morphology`)
//! - `lemma`, `pos`
//! - `{p}count`, `{p}last_suffix_id`, `{p}has_change`, `{p}suffix_seq`, `{p}label_{X}`
//!
//! O prefixo `{p}` é `morph.` com um analisador. No modo híbrido cada visão
//! usa o nome do seu analisador (`bridge.`, `rule.`); a visão secundária
//! contribui só `count`, `last_suffix_id` e `suffix_seq`.
//!
//! ### Gazetteers (`use_gazetteers`)
//! Para cada categoria `g` em [`CATEGORIES`]:
//! - `in_{g}_tokens`: token atual no conjunto de tokens
//! - `start_bigram_{g}` / `start_trigram_{g}`: o token abre uma entrada de 2/3 palavras
//! - `inside_bigram_{g}`: anterior + atual é uma entrada
//!
//! Mais palavras-chave (`kw_*`) e sufixos institucionais (`suffix_group`, `suffix_org`).
//!
//! ### Contexto (janela de 1 token)
//! - `-1:word.lower()`, `-1:word.istitle()`, `-1:word.isupper()`, `-1:lemma` (idem `+1:`)
//! - `BOS` / `EOS` nas bordas
//!
//! ### Embeddings (`use_embeddings`)
//! - `emb_0` … `emb_15`: primeiras dimensões do embedding do token

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::embeddings::EmbeddingService;
use crate::gazetteer::{GazetteerIndex, CATEGORIES};
use crate::morphology::{MorphAnalysis, MorphemeKind};
use crate::preprocess::AnnotatedToken;

static GROUP_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Derneği|Kulübü|Topluluğu)$").unwrap());
static ORG_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Vakfı|Birliği|Fonu)$").unwrap());

/// Palavras-chave procuradas como substring do token em minúsculas.
const KEYWORDS: &[(&str, &[&str])] = &[
    ("kw_holding", &["holding"]),
    ("kw_bank", &["banka"]),
    ("kw_company_suffix", &["a.ş", "ltd", "şirketi"]),
    ("kw_group_suffix", &["grubu", "kulübü", "derneği", "partisi"]),
    ("kw_org_suffix", &["vakfı", "üniversitesi", "belediyesi"]),
];

/// Valor de uma feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<bool> for FeatureValue {
    fn from(b: bool) -> Self {
        FeatureValue::Bool(b)
    }
}

impl From<f64> for FeatureValue {
    fn from(x: f64) -> Self {
        FeatureValue::Number(x)
    }
}

impl From<usize> for FeatureValue {
    fn from(n: usize) -> Self {
        FeatureValue::Number(n as f64)
    }
}

impl From<String> for FeatureValue {
    fn from(s: String) -> Self {
        FeatureValue::Text(s)
    }
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> Self {
        FeatureValue::Text(s.to_string())
    }
}

/// Features de um token. Construído uma vez e só lido depois.
///
/// `BTreeMap` para que a ordem de iteração (e a serialização) seja estável.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet {
    features: BTreeMap<String, FeatureValue>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FeatureValue>) {
        self.features.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FeatureValue> {
        self.features.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.features.contains_key(key)
    }

    /// `true` apenas se a feature existe e é `Bool(true)`.
    pub fn is_true(&self, key: &str) -> bool {
        matches!(self.get(key), Some(FeatureValue::Bool(true)))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Atributos numéricos vistos pelo CRF:
    ///
    /// | Valor        | Atributo        | Peso  |
    /// |--------------|-----------------|-------|
    /// | `Bool(b)`    | `nome`          | 1 / 0 |
    /// | `Number(x)`  | `nome`          | x     |
    /// | `Text(s)`    | `nome=s`        | 1     |
    ///
    /// Atributos com peso zero são omitidos: não contribuem para nenhum score.
    pub fn attributes(&self) -> Vec<(String, f64)> {
        self.features
            .iter()
            .filter_map(|(name, value)| match value {
                FeatureValue::Bool(true) => Some((name.clone(), 1.0)),
                FeatureValue::Bool(false) => None,
                FeatureValue::Number(x) if *x == 0.0 || !x.is_finite() => None,
                FeatureValue::Number(x) => Some((name.clone(), *x)),
                FeatureValue::Text(s) => Some((format!("{name}={s}"), 1.0)),
            })
            .collect()
    }
}

impl FromIterator<(String, FeatureValue)> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = (String, FeatureValue)>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

/// Ao menos uma letra e todas as letras maiúsculas.
fn is_upper(word: &str) -> bool {
    let mut cased = word.chars().filter(|c| c.is_lowercase() || c.is_uppercase());
    let mut any = false;
    let all = cased.all(|c| {
        any = true;
        c.is_uppercase()
    });
    any && all
}

/// Cada sequência de letras começa com maiúscula e segue em minúsculas
/// ("Tarkan", "A.Ş.", "Ankara'da" não: o "da" após o apóstrofo conta como
/// nova sequência e está em minúsculas).
fn is_title(word: &str) -> bool {
    let mut previous_cased = false;
    let mut any = false;
    for c in word.chars() {
        if c.is_uppercase() {
            if previous_cased {
                return false;
            }
            previous_cased = true;
            any = true;
        } else if c.is_lowercase() {
            if !previous_cased {
                return false;
            }
            previous_cased = true;
            any = true;
        } else {
            previous_cased = false;
        }
    }
    any
}

fn is_digit(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| c.is_ascii_digit())
}

fn has_apostrophe(word: &str) -> bool {
    word.contains('\'') || word.contains('\u{2019}')
}

/// Extrator de features, configurado uma vez e reutilizado.
pub struct FeatureExtractor {
    config: FeatureConfig,
    gazetteers: Arc<GazetteerIndex>,
    embeddings: Option<Arc<EmbeddingService>>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig, gazetteers: Arc<GazetteerIndex>) -> Self {
        Self {
            config,
            gazetteers,
            embeddings: None,
        }
    }

    /// Liga as features de embedding a um serviço já construído.
    pub fn with_embeddings(mut self, service: Arc<EmbeddingService>) -> Self {
        self.embeddings = Some(service);
        self
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Gera um [`FeatureSet`] por token, na ordem da sentença.
    ///
    /// O serviço de embeddings é chamado uma única vez por sentença.
    pub fn sentence_features(&self, sentence: &[AnnotatedToken]) -> Vec<FeatureSet> {
        let mut features: Vec<FeatureSet> = (0..sentence.len())
            .map(|i| self.token_features(sentence, i))
            .collect();

        if let (true, Some(service)) = (self.config.use_embeddings, &self.embeddings) {
            if !sentence.is_empty() {
                let words: Vec<String> = sentence.iter().map(|t| t.word.clone()).collect();
                let vectors = service.sentence_embeddings(&words);
                for (fs, vector) in features.iter_mut().zip(vectors.iter()) {
                    for (j, x) in vector.iter().take(self.config.embedding_dims).enumerate() {
                        fs.insert(format!("emb_{j}"), f64::from(*x));
                    }
                }
            }
        }

        features
    }

    /// Features do token `i` no contexto da sentença (sem embeddings).
    pub fn token_features(&self, sentence: &[AnnotatedToken], i: usize) -> FeatureSet {
        let mut fs = FeatureSet::new();
        let token = &sentence[i];
        let word = token.word.as_str();

        fs.insert("bias", 1.0);
        fs.insert("word.lower()", word.to_lowercase());
        fs.insert("word.isupper()", is_upper(word));
        fs.insert("word.istitle()", is_title(word));
        fs.insert("word.isdigit()", is_digit(word));
        fs.insert("word.has_apostrophe", has_apostrophe(word));

        if self.config.use_morphology {
            self.morphology_features(&mut fs, token);
        }

        if self.config.use_gazetteers {
            self.gazetteer_features(&mut fs, sentence, i);
        }

        // === Contexto ===
        if i > 0 {
            let prev = &sentence[i - 1];
            fs.insert("-1:word.lower()", prev.word.to_lowercase());
            fs.insert("-1:word.istitle()", is_title(&prev.word));
            fs.insert("-1:word.isupper()", is_upper(&prev.word));
            if self.config.use_morphology {
                fs.insert("-1:lemma", prev.lemma.as_str());
            }
        } else {
            fs.insert("BOS", true);
        }

        if let Some(next) = sentence.get(i + 1) {
            fs.insert("+1:word.lower()", next.word.to_lowercase());
            fs.insert("+1:word.istitle()", is_title(&next.word));
            fs.insert("+1:word.isupper()", is_upper(&next.word));
            if self.config.use_morphology {
                fs.insert("+1:lemma", next.lemma.as_str());
            }
        } else {
            fs.insert("EOS", true);
        }

        fs
    }

    fn morphology_features(&self, fs: &mut FeatureSet, token: &AnnotatedToken) {
        fs.insert("lemma", token.lemma.as_str());
        fs.insert("pos", token.pos.as_str());

        let mut views = token.analyses.iter();
        if let Some(primary) = views.next() {
            let prefix = if token.is_hybrid() {
                format!("{}.", primary.source)
            } else {
                "morph.".to_string()
            };
            morpheme_features(fs, &prefix, &primary.analysis, true);
        }
        for secondary in views {
            let prefix = format!("{}.", secondary.source);
            morpheme_features(fs, &prefix, &secondary.analysis, false);
        }
    }

    fn gazetteer_features(&self, fs: &mut FeatureSet, sentence: &[AnnotatedToken], i: usize) {
        let word = sentence[i].word.as_str();
        let next = sentence.get(i + 1).map(|t| t.word.as_str());
        let after_next = sentence.get(i + 2).map(|t| t.word.as_str());
        let prev = i.checked_sub(1).map(|p| sentence[p].word.as_str());

        for g in CATEGORIES {
            fs.insert(
                format!("in_{g}_tokens"),
                self.gazetteers.contains(word, g, true),
            );

            if let Some(next) = next {
                if self.gazetteers.contains(&format!("{word} {next}"), g, false) {
                    fs.insert(format!("start_bigram_{g}"), true);
                }
                if let Some(after) = after_next {
                    let trigram = format!("{word} {next} {after}");
                    if self.gazetteers.contains(&trigram, g, false) {
                        fs.insert(format!("start_trigram_{g}"), true);
                    }
                }
            }

            if let Some(prev) = prev {
                if self.gazetteers.contains(&format!("{prev} {word}"), g, false) {
                    fs.insert(format!("inside_bigram_{g}"), true);
                }
            }
        }

        let lower = word.to_lowercase();
        for (name, needles) in KEYWORDS {
            fs.insert(*name, needles.iter().any(|n| lower.contains(n)));
        }

        if GROUP_SUFFIX.is_match(word) {
            fs.insert("suffix_group", true);
        }
        if ORG_SUFFIX.is_match(word) {
            fs.insert("suffix_org", true);
        }
    }
}

/// Features de uma visão morfológica. Análises sem morfemas não geram nada.
fn morpheme_features(fs: &mut FeatureSet, prefix: &str, analysis: &MorphAnalysis, full: bool) {
    let morphemes = &analysis.morphemes;
    let Some(last) = morphemes.last() else {
        return;
    };

    fs.insert(format!("{prefix}count"), morphemes.len());
    fs.insert(format!("{prefix}last_suffix_id"), last.id.as_str());

    let suffix_seq = morphemes
        .iter()
        .filter(|m| m.kind != MorphemeKind::Root)
        .map(|m| m.id.as_str())
        .collect::<Vec<_>>()
        .join("-");
    if !suffix_seq.is_empty() {
        fs.insert(format!("{prefix}suffix_seq"), suffix_seq);
    }

    if full {
        fs.insert(
            format!("{prefix}has_change"),
            morphemes.iter().any(|m| m.has_change),
        );
        for label in morphemes.iter().flat_map(|m| &m.labels) {
            fs.insert(format!("{prefix}label_{label}"), true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gazetteer::Gazetteer;
    use crate::morphology::{MorphAnalyzer, RuleAnalyzer};
    use crate::preprocess::Preprocessor;

    fn index() -> Arc<GazetteerIndex> {
        let mut index = GazetteerIndex::empty();
        index.insert("kisiler", Gazetteer::from_entries(["Tarkan", "Sezen Aksu"]));
        index.insert("sirketler", Gazetteer::from_entries(["Koç Holding A.Ş."]));
        Arc::new(index)
    }

    fn annotate(words: &[&str]) -> Vec<AnnotatedToken> {
        let words: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        Preprocessor::single(Arc::new(RuleAnalyzer::new())).process_sentence(&words)
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(FeatureConfig::default(), index())
    }

    #[test]
    fn test_casing_helpers() {
        assert!(is_upper("TBMM"));
        assert!(!is_upper("123"));
        assert!(is_title("Tarkan"));
        assert!(is_title("A.Ş."));
        assert!(!is_title("Ankara'da"));
        assert!(!is_title("iPhone"));
        assert!(is_digit("2024"));
        assert!(!is_digit(""));
        assert!(has_apostrophe("Tarkan’ın"));
    }

    #[test]
    fn test_every_token_has_bias() {
        let sentence = annotate(&["Tarkan", "sahneye", "çıktı"]);
        let features = extractor().sentence_features(&sentence);
        assert_eq!(features.len(), 3);
        for fs in &features {
            assert_eq!(fs.get("bias"), Some(&FeatureValue::Number(1.0)));
        }
    }

    #[test]
    fn test_single_token_has_bos_and_eos() {
        let features = extractor().sentence_features(&annotate(&["Tarkan"]));
        assert!(features[0].is_true("BOS"));
        assert!(features[0].is_true("EOS"));
    }

    #[test]
    fn test_gazetteer_token_membership() {
        let features = extractor().sentence_features(&annotate(&["Tarkan", "sahneye", "çıktı"]));
        assert!(features[0].is_true("in_kisiler_tokens"));
        assert!(!features[1].is_true("in_kisiler_tokens"));
        assert!(!features[2].is_true("in_kisiler_tokens"));
        assert_eq!(
            features[1].get("in_kisiler_tokens"),
            Some(&FeatureValue::Bool(false))
        );
    }

    #[test]
    fn test_gazetteer_windows() {
        let sentence = annotate(&["Dün", "Sezen", "Aksu", "ve", "Koç", "Holding", "A.Ş."]);
        let features = extractor().sentence_features(&sentence);
        assert!(features[1].is_true("start_bigram_kisiler"));
        assert!(features[2].is_true("inside_bigram_kisiler"));
        assert!(features[4].is_true("start_trigram_sirketler"));
        assert!(features[5].is_true("kw_holding"));
        assert!(features[6].is_true("kw_company_suffix"));
        assert!(!features[0].contains("start_bigram_kisiler"));
    }

    #[test]
    fn test_suffix_regexes() {
        let sentence = annotate(&["Türk", "Hava", "Kurumu", "Vakfı", "Derneği"]);
        let features = extractor().sentence_features(&sentence);
        assert!(features[3].is_true("suffix_org"));
        assert!(features[4].is_true("suffix_group"));
        assert!(features[4].is_true("kw_group_suffix"));
    }

    #[test]
    fn test_morphology_features() {
        let features = extractor().sentence_features(&annotate(&["Ankara'dan", "geldi"]));
        let fs = &features[0];
        assert_eq!(fs.get("lemma"), Some(&FeatureValue::Text("Ankara".into())));
        assert_eq!(fs.get("morph.count"), Some(&FeatureValue::Number(2.0)));
        assert_eq!(fs.get("morph.suffix_seq"), Some(&FeatureValue::Text("Abl".into())));
        assert!(fs.is_true("morph.label_case"));
        assert_eq!(
            features[1].get("-1:lemma"),
            Some(&FeatureValue::Text("Ankara".into()))
        );
    }

    #[test]
    fn test_hybrid_views_are_namespaced() {
        let rule = RuleAnalyzer::new();
        let mut token = AnnotatedToken::from_analysis("evler", "bridge", rule.analyze("evler"));
        token.analyses.push(crate::preprocess::SourcedAnalysis {
            source: "rule".to_string(),
            analysis: rule.analyze("evler"),
        });

        let fs = extractor().token_features(&[token], 0);
        assert!(fs.contains("bridge.count"));
        assert!(fs.contains("bridge.has_change"));
        assert!(fs.contains("rule.suffix_seq"));
        assert!(!fs.contains("rule.has_change"));
        assert!(!fs.contains("morph.count"));
    }

    #[test]
    fn test_disabled_groups() {
        let config = FeatureConfig {
            use_morphology: false,
            use_gazetteers: false,
            ..FeatureConfig::default()
        };
        let fs = FeatureExtractor::new(config, index()).token_features(&annotate(&["Tarkan"]), 0);
        assert!(!fs.contains("lemma"));
        assert!(!fs.contains("in_kisiler_tokens"));
        assert!(fs.contains("word.lower()"));
    }

    #[test]
    fn test_attributes() {
        let mut fs = FeatureSet::new();
        fs.insert("bias", 1.0);
        fs.insert("BOS", true);
        fs.insert("EOS", false);
        fs.insert("word.lower()", "tarkan");
        let attrs = fs.attributes();
        assert!(attrs.contains(&("bias".to_string(), 1.0)));
        assert!(attrs.contains(&("BOS".to_string(), 1.0)));
        assert!(attrs.contains(&("word.lower()=tarkan".to_string(), 1.0)));
        assert_eq!(attrs.len(), 3);
    }
}
