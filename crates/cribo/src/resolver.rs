//! Import classification and resolution.
//!
//! Maps dotted import names to concrete files under the configured first-party
//! roots, and decides first-party / third-party / stdlib for every import the
//! discovery phase encounters.

use std::path::{Path, PathBuf};

use anyhow::Result;
use indexmap::{IndexMap, IndexSet};
use log::debug;
use ruff_python_stdlib::sys as stdlib_sys;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportCategory {
    FirstParty,
    ThirdParty,
    Stdlib,
}

/// A dotted name resolved to something on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    /// `pkg/__init__.py`, `mod.py`, or the bare directory for a namespace
    /// package.
    pub path: PathBuf,
    pub is_package: bool,
    /// Directory without `__init__.py`; gets a synthetic empty unit.
    pub is_namespace: bool,
}

#[derive(Debug)]
pub struct ModuleResolver {
    config: Config,
    python_version: u8,
    /// Entry script's directory; always the first search root.
    entry_dir: Option<PathBuf>,
    /// Replaces the `PYTHONPATH` environment variable in tests.
    pythonpath_override: Option<String>,
    resolution_cache: IndexMap<String, Option<ResolvedModule>>,
    category_cache: IndexMap<String, ImportCategory>,
}

impl ModuleResolver {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_pythonpath(config, None)
    }

    /// Construct with an explicit `PYTHONPATH` value so tests never touch
    /// process-global environment state.
    pub fn with_pythonpath(config: Config, pythonpath: Option<&str>) -> Result<Self> {
        let python_version = config.python_version()?;
        Ok(Self {
            config,
            python_version,
            entry_dir: None,
            pythonpath_override: pythonpath.map(str::to_owned),
            resolution_cache: IndexMap::new(),
            category_cache: IndexMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Establish the entry script; its directory becomes the primary search
    /// root. Invalidates caches built against the old root set.
    pub fn set_entry_file(&mut self, entry_path: &Path) {
        if let Some(parent) = entry_path.parent() {
            self.entry_dir = Some(parent.to_path_buf());
            self.resolution_cache.clear();
            self.category_cache.clear();
            debug!("Entry directory: {}", parent.display());
        }
    }

    /// All directories searched for first-party modules, in priority order:
    /// entry directory, `PYTHONPATH` entries, configured roots.
    pub fn search_roots(&self) -> Vec<PathBuf> {
        let mut roots: IndexSet<PathBuf> = IndexSet::new();

        if let Some(entry_dir) = &self.entry_dir {
            roots.insert(canonical_or_keep(entry_dir));
        }

        let pythonpath = self
            .pythonpath_override
            .clone()
            .or_else(|| std::env::var("PYTHONPATH").ok());
        if let Some(pythonpath) = pythonpath {
            let separator = if cfg!(windows) { ';' } else { ':' };
            for entry in pythonpath.split(separator).filter(|s| !s.is_empty()) {
                let path = PathBuf::from(entry);
                if path.is_dir() {
                    roots.insert(canonical_or_keep(&path));
                }
            }
        }

        for root in &self.config.src {
            roots.insert(canonical_or_keep(root));
        }

        roots.into_iter().collect()
    }

    /// Resolve an absolute dotted name against the search roots. The first
    /// root containing the module wins.
    pub fn resolve(&mut self, dotted: &str) -> Option<ResolvedModule> {
        if let Some(cached) = self.resolution_cache.get(dotted) {
            return cached.clone();
        }

        let parts: Vec<&str> = dotted.split('.').filter(|s| !s.is_empty()).collect();
        let mut resolved = None;
        if !parts.is_empty() {
            for root in self.search_roots() {
                if let Some(found) = lookup_in_root(&root, &parts) {
                    debug!("Resolved '{dotted}' to {}", found.path.display());
                    resolved = Some(found);
                    break;
                }
            }
        }

        self.resolution_cache
            .insert(dotted.to_owned(), resolved.clone());
        resolved
    }

    /// Convert a relative import to its absolute dotted form.
    ///
    /// `importer` is the importing module's dotted name; packages import
    /// relative to themselves, plain modules relative to their parent
    /// package. Returns `None` when the ascent leaves the package tree.
    pub fn absolute_name_for_relative(
        importer: &str,
        importer_is_package: bool,
        level: u32,
        remainder: Option<&str>,
    ) -> Option<String> {
        let mut base: Vec<&str> = importer.split('.').collect();
        if !importer_is_package {
            base.pop();
        }
        if base.is_empty() {
            // A top-level module has no package to be relative to.
            return None;
        }
        // One dot targets the current package, each extra dot one level up.
        for _ in 1..level {
            base.pop();
            if base.is_empty() {
                return None;
            }
        }

        if let Some(rest) = remainder {
            base.extend(rest.split('.'));
        }
        Some(base.join("."))
    }

    /// Decide first-party / third-party / stdlib for a dotted name.
    pub fn classify(&mut self, dotted: &str) -> ImportCategory {
        if let Some(cached) = self.category_cache.get(dotted) {
            return *cached;
        }

        let category = self.classify_uncached(dotted);
        self.category_cache.insert(dotted.to_owned(), category);
        category
    }

    fn classify_uncached(&mut self, dotted: &str) -> ImportCategory {
        let top = dotted.split('.').next().unwrap_or(dotted);

        if self.config.known_first_party.contains(top) {
            return ImportCategory::FirstParty;
        }
        if self.config.known_third_party.contains(top) {
            return ImportCategory::ThirdParty;
        }
        if self.is_stdlib(top) {
            return ImportCategory::Stdlib;
        }
        if self.resolve(dotted).is_some() {
            return ImportCategory::FirstParty;
        }
        // A child of a first-party package is first-party even when the child
        // itself does not resolve (e.g. an attribute mistaken for a module).
        if top != dotted && self.resolve(top).is_some() {
            return ImportCategory::FirstParty;
        }
        ImportCategory::ThirdParty
    }

    fn is_stdlib(&self, top_level: &str) -> bool {
        top_level == "__future__"
            || stdlib_sys::is_known_standard_library(self.python_version, top_level)
    }
}

fn canonical_or_keep(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Walk a dotted name below one root. Intermediate segments must be package
/// directories; the final segment prefers a package over a module file over a
/// namespace directory, matching the interpreter's order.
fn lookup_in_root(root: &Path, parts: &[&str]) -> Option<ResolvedModule> {
    let mut dir = root.to_path_buf();
    for segment in &parts[..parts.len() - 1] {
        let candidate = dir.join(segment);
        if !candidate.is_dir() {
            return None;
        }
        dir = candidate;
    }

    let last = parts[parts.len() - 1];
    let package_init = dir.join(last).join("__init__.py");
    if package_init.is_file() {
        return Some(ResolvedModule {
            path: canonical_or_keep(&package_init),
            is_package: true,
            is_namespace: false,
        });
    }

    let module_file = dir.join(format!("{last}.py"));
    if module_file.is_file() {
        return Some(ResolvedModule {
            path: canonical_or_keep(&module_file),
            is_package: false,
            is_namespace: false,
        });
    }

    let namespace_dir = dir.join(last);
    if namespace_dir.is_dir() {
        return Some(ResolvedModule {
            path: canonical_or_keep(&namespace_dir),
            is_package: true,
            is_namespace: true,
        });
    }

    None
}
