//! # Gazetteers
//!
//! Listas de entidades conhecidas, uma categoria por arquivo:
//!
//! ```text
//! gazetteers/
//! ├── kisiler.txt       "Tarkan", "Sezen Aksu", ...
//! ├── yerler.txt        "İstanbul", "Ankara", ...
//! └── sirketler.txt     "Koç Holding", ...
//! ```
//!
//! Cada categoria guarda dois conjuntos: as entradas completas (em minúsculas)
//! e os tokens que as compõem. Assim `"aksu"` é membro por token de `kisiler`
//! mesmo sem ser uma entrada completa. Depois de carregado o índice é
//! imutável e pode ser compartilhado entre threads.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{NerError, Result};

/// Categorias consultadas pelo extrator de features, nesta ordem.
pub const CATEGORIES: [&str; 6] = [
    "kisiler",
    "yerler",
    "sirketler",
    "kurumlar",
    "film_muzik",
    "topluluklar",
];

/// Uma categoria carregada.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gazetteer {
    entries: HashSet<String>,
    tokens: HashSet<String>,
}

impl Gazetteer {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut gazetteer = Self::default();
        for entry in entries {
            gazetteer.add(entry.as_ref());
        }
        gazetteer
    }

    fn add(&mut self, raw: &str) {
        let entry = raw.trim_start_matches('\u{feff}').trim().to_lowercase();
        if entry.is_empty() {
            return;
        }
        for token in entry.split_whitespace() {
            self.tokens.insert(token.to_string());
        }
        self.entries.insert(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Índice de todas as categorias carregadas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GazetteerIndex {
    categories: BTreeMap<String, Gazetteer>,
}

impl GazetteerIndex {
    /// Índice vazio: toda consulta retorna `false`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Carrega todos os arquivos `*.txt` de `dir`. O nome da categoria é o
    /// nome do arquivo sem extensão.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(NerError::GazetteerDirNotFound(dir.to_path_buf()));
        }

        let mut index = Self::default();
        let listing = fs::read_dir(dir).map_err(|e| NerError::io(dir, e))?;
        for entry in listing {
            let path = entry.map_err(|e| NerError::io(dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let content = fs::read_to_string(&path).map_err(|e| NerError::io(&path, e))?;
            let gazetteer = Gazetteer::from_entries(content.lines());
            debug!("gazetteer {name}: {} entradas", gazetteer.len());
            index.categories.insert(name.to_string(), gazetteer);
        }

        info!(
            "{} gazetteers carregados de {}",
            index.categories.len(),
            dir.display()
        );
        let unconsulted = index.unconsulted();
        if !unconsulted.is_empty() {
            warn!(
                "gazetteers sem feature correspondente (ignorados): {}",
                unconsulted.join(", ")
            );
        }
        Ok(index)
    }

    /// Adiciona (ou substitui) uma categoria.
    pub fn insert(&mut self, name: impl Into<String>, gazetteer: Gazetteer) {
        self.categories.insert(name.into(), gazetteer);
    }

    /// Pertinência sem distinção de maiúsculas. `as_single_token` consulta o
    /// conjunto de tokens; caso contrário, o de entradas completas.
    /// Categoria desconhecida retorna `false`.
    pub fn contains(&self, text: &str, category: &str, as_single_token: bool) -> bool {
        let Some(gazetteer) = self.categories.get(category) else {
            return false;
        };
        let key = text.to_lowercase();
        if as_single_token {
            gazetteer.tokens.contains(&key)
        } else {
            gazetteer.entries.contains(&key)
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Categorias carregadas que o extrator nunca consulta (fora de [`CATEGORIES`]).
    pub fn unconsulted(&self) -> Vec<&str> {
        self.categories()
            .filter(|name| !CATEGORIES.contains(name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("kisiler.txt"), "Tarkan\nSezen Aksu\n\n").unwrap();
        fs::write(dir.path().join("yerler.txt"), "İstanbul\nAnkara\n").unwrap();
        fs::write(dir.path().join("notlar.md"), "ignorado\n").unwrap();
        dir
    }

    #[test]
    fn test_load_and_lookup() {
        let dir = write_dir();
        let index = GazetteerIndex::load(dir.path()).unwrap();

        assert_eq!(index.categories().collect::<Vec<_>>(), ["kisiler", "yerler"]);
        assert!(index.contains("TARKAN", "kisiler", true));
        assert!(index.contains("sezen aksu", "kisiler", false));
        assert!(index.contains("Aksu", "kisiler", true));
        assert!(!index.contains("Aksu", "kisiler", false));
        assert!(index.contains("İstanbul", "yerler", false));
        assert!(index.unconsulted().is_empty());
    }

    #[test]
    fn test_unconsulted_categories_are_reported() {
        let dir = write_dir();
        fs::write(dir.path().join("sporcular.txt"), "Hakan Şükür\n").unwrap();
        let index = GazetteerIndex::load(dir.path()).unwrap();

        assert_eq!(index.unconsulted(), ["sporcular"]);
        assert!(index.contains("hakan", "sporcular", true));
    }

    #[test]
    fn test_unknown_category_is_false() {
        let dir = write_dir();
        let index = GazetteerIndex::load(dir.path()).unwrap();
        assert!(!index.contains("Tarkan", "film_muzik", true));
        assert!(!GazetteerIndex::empty().contains("Tarkan", "kisiler", true));
    }

    #[test]
    fn test_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("yok");
        assert!(matches!(
            GazetteerIndex::load(&missing),
            Err(NerError::GazetteerDirNotFound(p)) if p == missing
        ));
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = write_dir();
        let a = GazetteerIndex::load(dir.path()).unwrap();
        let b = GazetteerIndex::load(dir.path()).unwrap();
        assert_eq!(a, b);
        for word in ["tarkan", "aksu", "ankara", "yok"] {
            assert_eq!(
                a.contains(word, "kisiler", true),
                b.contains(word, "kisiler", true)
            );
        }
    }
}
