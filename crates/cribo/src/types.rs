//! Shared collection type aliases.
//!
//! The pipeline needs insertion-ordered maps and sets for deterministic
//! output; the hot lookup paths (symbol tables, rename rows, module ids)
//! additionally want the fast FxHasher.

use std::hash::BuildHasherDefault;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

pub type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;
