//! Source loading and parsing.
//!
//! Every file is read once: units are cached by canonicalized path, so a file
//! reached through two different dotted names shares one parse.

use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::{debug, warn};
use ruff_python_ast::ModModule;
use sha2::{Digest, Sha256};

use crate::util::{line_column, normalize_line_endings};

/// An immutable parsed source file.
#[derive(Debug)]
pub struct SourceUnit {
    /// Canonicalized path the unit was loaded from. Synthetic units keep the
    /// directory path they stand in for.
    pub path: PathBuf,
    /// Source text with normalized line endings; empty for synthetic units.
    pub source: String,
    pub ast: ModModule,
    /// Hex-encoded SHA-256 of `source`; feeds synthetic module naming.
    pub content_hash: String,
}

#[derive(Debug)]
pub enum LoadError {
    Io(String),
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
}

#[derive(Debug, Default)]
pub struct SourceLoader {
    units: IndexMap<PathBuf, SourceUnit>,
}

fn canonicalize_or_keep(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(err) => {
            warn!("Failed to canonicalize {}: {err}", path.display());
            path.to_path_buf()
        }
    }
}

fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl SourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse a file, reusing the cached unit on repeat loads.
    pub fn load(&mut self, path: &Path) -> Result<&SourceUnit, LoadError> {
        let canonical = canonicalize_or_keep(path);
        if self.units.contains_key(&canonical) {
            return Ok(&self.units[&canonical]);
        }

        let raw = fs::read_to_string(&canonical)
            .map_err(|err| LoadError::Io(format!("{}: {err}", canonical.display())))?;
        let source = normalize_line_endings(raw);

        let parsed = ruff_python_parser::parse_module(&source).map_err(|err| {
            let (line, column) = line_column(&source, err.location.start().to_usize());
            LoadError::Parse {
                line,
                column,
                message: err.error.to_string(),
            }
        })?;

        debug!("Parsed {}", canonical.display());
        let unit = SourceUnit {
            path: canonical.clone(),
            content_hash: hash_source(&source),
            ast: parsed.into_syntax(),
            source,
        };
        Ok(self.units.entry(canonical).or_insert(unit))
    }

    /// Produce an empty unit standing in for a namespace package directory.
    pub fn load_synthetic(&mut self, dir: &Path) -> &SourceUnit {
        let canonical = canonicalize_or_keep(dir);
        if self.units.contains_key(&canonical) {
            return &self.units[&canonical];
        }

        let parsed = ruff_python_parser::parse_module("").expect("empty module must parse");
        let unit = SourceUnit {
            path: canonical.clone(),
            content_hash: hash_source(""),
            ast: parsed.into_syntax(),
            source: String::new(),
        };
        self.units.entry(canonical).or_insert(unit)
    }

    pub fn get(&self, path: &Path) -> Option<&SourceUnit> {
        self.units.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_by_canonical_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("mod.py");
        fs::write(&file, "x = 1\n").unwrap();

        let mut loader = SourceLoader::new();
        let first_hash = loader.load(&file).unwrap().content_hash.clone();

        // Reaching the same file through a dotted lexical path hits the cache.
        let indirect = dir.path().join(".").join("mod.py");
        let second_hash = loader.load(&indirect).unwrap().content_hash.clone();
        assert_eq!(first_hash, second_hash);
    }

    #[test]
    fn reports_parse_position() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("broken.py");
        fs::write(&file, "def f(:\n    pass\n").unwrap();

        let mut loader = SourceLoader::new();
        match loader.load(&file) {
            Err(LoadError::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn synthetic_unit_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut loader = SourceLoader::new();
        let unit = loader.load_synthetic(dir.path());
        assert!(unit.ast.body.is_empty());
        assert!(unit.source.is_empty());
    }
}
