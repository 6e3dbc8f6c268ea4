//! # Tokenizador
//!
//! Divide texto bruto em tokens (palavras e pontuação) usando as fronteiras
//! de palavra do Unicode (UAX #29). Cada token guarda seu offset de byte no
//! texto original.
//!
//! Duas propriedades importam para o turco:
//! - sufixos ligados por apóstrofo ficam no mesmo token
//!   ("Ankara'da", "Tarkan’ın"), porque o apóstrofo entre letras não é
//!   fronteira de palavra;
//! - abreviações comuns ("Dr.", "Prof.", "A.Ş.", "Ltd.") mantêm o ponto.
//!
//! ```rust
//! use trner_core::tokenizer::tokenize;
//!
//! let tokens = tokenize("Koç Holding A.Ş. İstanbul'da.");
//! let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
//! assert_eq!(texts, ["Koç", "Holding", "A.Ş.", "İstanbul'da", "."]);
//! ```

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Um token extraído do texto original. Imutável depois de criado.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    /// O texto do token (ex: "Tarkan", ",", "sahneye").
    pub text: String,
    /// Índice de byte inicial no texto original (inclusive).
    pub start: usize,
    /// Índice de byte final no texto original (exclusivo).
    pub end: usize,
    /// Posição do token na sentença (0, 1, 2...).
    pub index: usize,
}

/// Abreviações (sem o ponto final, em minúsculas) que absorvem o ponto seguinte.
const ABBREVIATIONS: &[&str] = &[
    "dr", "prof", "doç", "av", "alb", "yrd", "sn", "st", "ltd", "şti", "a.ş", "vb", "vs", "bkz",
    "no", "mah", "cad", "sok",
];

/// Tokeniza um texto.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();

    for (start, segment) in text.split_word_bound_indices() {
        if segment.chars().all(char::is_whitespace) {
            continue;
        }

        // "Dr" + "." → "Dr." quando os dois segmentos são contíguos
        if segment == "." {
            if let Some(last) = tokens.last_mut() {
                let lower = last.text.to_lowercase();
                if last.end == start && ABBREVIATIONS.contains(&lower.as_str()) {
                    last.text.push('.');
                    last.end = start + 1;
                    continue;
                }
            }
        }

        tokens.push(Token {
            text: segment.to_string(),
            start,
            end: start + segment.len(),
            index: tokens.len(),
        });
    }

    tokens
}
