//! # Embeddings de Sub-palavras
//!
//! Vetores densos por token, obtidos em duas etapas:
//!
//! 1. um [`SubwordEncoder`] quebra as palavras da sentença em peças e devolve
//!    um vetor por peça, junto com o índice da palavra de origem;
//! 2. o [`EmbeddingService`] faz a média das peças de cada palavra
//!    (mean pooling) e completa com zeros as palavras sem peça.
//!
//! ```text
//! ["İstanbul'da", "yaşıyor"]
//!   → peças:  İstanbul  ##'  ##da  yaşı  ##yor
//!   → ids:    0         0    0     1     1
//!   → saída:  [média(0), média(1)]
//! ```
//!
//! O serviço é construído explicitamente e passado por referência ao
//! extrator de features. O resultado de cada sentença fica num cache LRU
//! indexado pela sentença unida por espaços.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::cache::LruCache;
use crate::error::{NerError, Result};

/// Peça usada quando uma palavra não pode ser segmentada.
pub const UNKNOWN_PIECE: &str = "[UNK]";

/// Saída de um encoder: um vetor por peça e a palavra de cada peça.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Encoding {
    pub vectors: Vec<Vec<f32>>,
    pub word_ids: Vec<usize>,
}

/// Codifica uma sentença já tokenizada em vetores por sub-palavra.
pub trait SubwordEncoder: Send + Sync {
    fn dims(&self) -> usize;

    fn encode(&self, words: &[String]) -> Result<Encoding>;
}

/// Encoder estático: tabela de vetores por peça + segmentação WordPiece.
///
/// Formato do arquivo (texto, uma peça por linha):
///
/// ```text
/// 4 3              ← cabeçalho opcional "n_peças dims"
/// İstanbul 0.1 0.2 0.3
/// ##da 0.0 0.5 0.1
/// [UNK] 0.0 0.0 0.0
/// ```
#[derive(Debug, Clone)]
pub struct StaticEncoder {
    vectors: HashMap<String, Vec<f32>>,
    dims: usize,
    /// Limite de peças por sentença; peças além dele são descartadas.
    max_pieces: usize,
}

impl StaticEncoder {
    pub const DEFAULT_MAX_PIECES: usize = 512;

    pub fn from_vectors(vectors: HashMap<String, Vec<f32>>) -> Result<Self> {
        let dims = vectors.values().next().map(Vec::len).unwrap_or(0);
        if dims == 0 {
            return Err(NerError::Embedding("tabela de vetores vazia".to_string()));
        }
        if let Some((piece, v)) = vectors.iter().find(|(_, v)| v.len() != dims) {
            return Err(NerError::Embedding(format!(
                "peça {piece:?} tem {} dimensões, esperado {dims}",
                v.len()
            )));
        }
        Ok(Self {
            vectors,
            dims,
            max_pieces: Self::DEFAULT_MAX_PIECES,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| NerError::io(path, e))?;

        let mut vectors = HashMap::new();
        for (n, line) in raw.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let Some(piece) = fields.next() else {
                continue;
            };
            let values: std::result::Result<Vec<f32>, _> = fields.map(str::parse).collect();
            let values = values.map_err(|e| {
                NerError::Embedding(format!("{}:{}: {e}", path.display(), n + 1))
            })?;
            // cabeçalho estilo word2vec: "contagem dims"
            if n == 0 && values.len() == 1 && piece.parse::<usize>().is_ok() {
                continue;
            }
            vectors.insert(piece.to_string(), values);
        }

        let encoder = Self::from_vectors(vectors)?;
        info!(
            "{} vetores de {} dimensões carregados de {}",
            encoder.vectors.len(),
            encoder.dims,
            path.display()
        );
        Ok(encoder)
    }

    pub fn with_max_pieces(mut self, max_pieces: usize) -> Self {
        self.max_pieces = max_pieces;
        self
    }

    /// Segmentação gulosa pelo prefixo mais longo; continuações levam `##`.
    /// Se algum trecho não casa, a palavra inteira vira [`UNKNOWN_PIECE`]
    /// (ou nenhuma peça, se a tabela não tiver essa entrada).
    pub fn word_pieces(&self, word: &str) -> Vec<String> {
        let chars: Vec<char> = word.chars().collect();
        let mut pieces = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let found = (start + 1..=chars.len()).rev().find_map(|end| {
                let body: String = chars[start..end].iter().collect();
                let piece = if start == 0 { body } else { format!("##{body}") };
                self.vectors.contains_key(&piece).then_some((piece, end))
            });
            match found {
                Some((piece, end)) => {
                    pieces.push(piece);
                    start = end;
                }
                None => {
                    return if self.vectors.contains_key(UNKNOWN_PIECE) {
                        vec![UNKNOWN_PIECE.to_string()]
                    } else {
                        Vec::new()
                    };
                }
            }
        }
        pieces
    }
}

impl SubwordEncoder for StaticEncoder {
    fn dims(&self) -> usize {
        self.dims
    }

    fn encode(&self, words: &[String]) -> Result<Encoding> {
        let mut encoding = Encoding::default();
        'words: for (word_id, word) in words.iter().enumerate() {
            for piece in self.word_pieces(word) {
                if encoding.vectors.len() >= self.max_pieces {
                    break 'words;
                }
                if let Some(v) = self.vectors.get(&piece) {
                    encoding.vectors.push(v.clone());
                    encoding.word_ids.push(word_id);
                }
            }
        }
        Ok(encoding)
    }
}

/// Média das peças de cada palavra. Sempre devolve `n_words` vetores de
/// `dims` posições; palavras sem peça ficam com zeros.
pub fn pool_by_word(encoding: &Encoding, n_words: usize, dims: usize) -> Vec<Vec<f32>> {
    let mut sums = vec![vec![0.0f32; dims]; n_words];
    let mut counts = vec![0usize; n_words];

    for (vector, &word_id) in encoding.vectors.iter().zip(&encoding.word_ids) {
        if word_id >= n_words {
            continue;
        }
        for (acc, x) in sums[word_id].iter_mut().zip(vector) {
            *acc += x;
        }
        counts[word_id] += 1;
    }

    for (sum, &count) in sums.iter_mut().zip(&counts) {
        if count > 1 {
            let n = count as f32;
            sum.iter_mut().for_each(|x| *x /= n);
        }
    }
    sums
}

/// Serviço de embeddings por token com cache por sentença.
pub struct EmbeddingService {
    encoder: Box<dyn SubwordEncoder>,
    cache: Mutex<LruCache<String, Arc<Vec<Vec<f32>>>>>,
}

impl EmbeddingService {
    pub fn new(encoder: Box<dyn SubwordEncoder>, cache_capacity: usize) -> Self {
        Self {
            encoder,
            cache: Mutex::new(LruCache::new(cache_capacity)),
        }
    }

    pub fn dims(&self) -> usize {
        self.encoder.dims()
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> MutexGuard<'_, LruCache<String, Arc<Vec<Vec<f32>>>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Um vetor por palavra. Falha do encoder vira zeros (e não é cacheada).
    pub fn sentence_embeddings(&self, words: &[String]) -> Arc<Vec<Vec<f32>>> {
        let key = words.join(" ");
        if let Some(hit) = self.lock_cache().get(&key) {
            debug!("embeddings: cache hit ({} palavras)", words.len());
            return hit;
        }

        let dims = self.encoder.dims();
        let pooled = match self.encoder.encode(words) {
            Ok(encoding) => Arc::new(pool_by_word(&encoding, words.len(), dims)),
            Err(e) => {
                warn!("encoder falhou, usando zeros: {e}");
                return Arc::new(vec![vec![0.0; dims]; words.len()]);
            }
        };

        self.lock_cache().insert(key, Arc::clone(&pooled));
        pooled
    }
}
