//! Conflict planning.
//!
//! Computes the global rename plan: one emitted name for every top-level
//! binding of every inlined module. Entry bindings are pinned to their
//! original names; a name bound by more than one module gets a deterministic
//! `<name>_<module_slug>` suffix, with a growing hash fallback for the
//! pathological repeat-collision case.

use cow_utils::CowUtils;
use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

use crate::{
    cycles::Disposition,
    graph::ModuleId,
    symbols::SymbolTable,
    types::{FxIndexMap, FxIndexSet},
};

/// Per-module input to the planner.
#[derive(Debug)]
pub struct PlanModule<'a> {
    pub id: ModuleId,
    /// Dotted module name.
    pub name: &'a str,
    pub table: &'a SymbolTable,
    pub disposition: Disposition,
    /// Import bindings that dissolve into direct references to another
    /// module's binding; they never claim a name in the output.
    pub alias_only: IndexSet<String>,
}

/// Total mapping `(module, original_name) -> emitted_name` over all inlined
/// modules. Identity rows mean "no rename".
#[derive(Debug, Default)]
pub struct RenamePlan {
    map: FxIndexMap<(ModuleId, String), String>,
    taken: FxIndexSet<String>,
}

impl RenamePlan {
    pub fn emitted_name(&self, module: ModuleId, original: &str) -> Option<&str> {
        self.map
            .get(&(module, original.to_owned()))
            .map(String::as_str)
    }

    /// The emitted name, falling back to the original for names the plan does
    /// not cover (builtins, locals).
    pub fn emitted_or_original<'a>(&'a self, module: ModuleId, original: &'a str) -> &'a str {
        self.emitted_name(module, original).unwrap_or(original)
    }

    /// Reserve an identifier outside any module's symbol table (module
    /// handles, namespace roots).
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_owned());
    }

    /// Allocate a fresh helper identifier as close to `preferred` as
    /// possible.
    pub fn allocate_helper(&mut self, preferred: &str, discriminator: &str) -> String {
        let name = self.fresh_name(preferred, discriminator);
        self.taken.insert(name.clone());
        name
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(ModuleId, String), &str)> {
        self.map.iter().map(|(key, value)| (key, value.as_str()))
    }

    fn fresh_name(&self, preferred: &str, discriminator: &str) -> String {
        if !self.taken.contains(preferred) {
            return preferred.to_owned();
        }
        let digest = path_digest(discriminator);
        let mut width = 6;
        loop {
            let candidate = format!("{preferred}_{}", &digest[..width.min(digest.len())]);
            if !self.taken.contains(&candidate) {
                return candidate;
            }
            width += 2;
            assert!(
                width <= digest.len(),
                "exhausted hash digits while renaming '{preferred}'"
            );
        }
    }

    fn claim(&mut self, module: ModuleId, original: &str, emitted: String) {
        self.taken.insert(emitted.clone());
        self.map.insert((module, original.to_owned()), emitted);
    }
}

/// Map a dotted module path to an identifier fragment.
pub fn sanitize_module_name(dotted: &str) -> String {
    let dots = dotted.cow_replace('.', "_");
    dots.cow_replace('-', "_").into_owned()
}

/// Synthetic identity of a wrapped module: content-hashed so repeated runs
/// over identical inputs emit identical ids.
pub fn synthetic_module_name(dotted: &str, content_hash: &str) -> String {
    let short_hash = &content_hash[..content_hash.len().min(6)];
    format!("__cribo_{short_hash}_{}", sanitize_module_name(dotted))
}

/// Init function name for a wrapped module's synthetic id.
pub fn init_function_name(synthetic: &str) -> String {
    format!("__cribo_init_{synthetic}")
}

fn path_digest(dotted: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dotted.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build the plan.
///
/// `modules` is indexed by `ModuleId`; `order` is the emission order (leaves
/// first). The entry module's names are processed first and never renamed; a
/// name bound by several modules is suffixed in *every* non-entry module that
/// binds it, so colliding definitions are distinguishable by their origin.
pub fn build_plan(modules: &[PlanModule<'_>], order: &[ModuleId]) -> RenamePlan {
    let mut plan = RenamePlan::default();

    // Count how many inlined modules genuinely bind each name.
    let mut bind_count: FxHashMap<&str, usize> = FxHashMap::default();
    for module in modules {
        if module.disposition != Disposition::Inline {
            continue;
        }
        for name in module.table.symbols.keys() {
            if !module.alias_only.contains(name.as_str()) {
                *bind_count.entry(name.as_str()).or_default() += 1;
            }
        }
    }

    // Entry names are pinned: the output must still run as an entry script.
    let entry = &modules[ModuleId::ENTRY.index()];
    for name in entry.table.symbols.keys() {
        if !entry.alias_only.contains(name.as_str()) {
            plan.claim(entry.id, name, name.clone());
        }
    }

    for &id in order {
        if id == ModuleId::ENTRY {
            continue;
        }
        let module = &modules[id.index()];
        if module.disposition != Disposition::Inline {
            continue;
        }
        let slug = sanitize_module_name(module.name);
        for name in module.table.symbols.keys() {
            if module.alias_only.contains(name.as_str()) {
                continue;
            }
            let contested =
                bind_count.get(name.as_str()).copied().unwrap_or(0) > 1 || plan.taken.contains(name);
            let emitted = if contested {
                plan.fresh_name(&format!("{name}_{slug}"), module.name)
            } else {
                name.clone()
            };
            plan.claim(id, name, emitted);
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use ruff_python_parser::parse_module;

    use super::*;
    use crate::symbols::collect_symbols;

    fn table_of(source: &str) -> SymbolTable {
        collect_symbols(&parse_module(source).unwrap().into_syntax())
    }

    fn plan_with_aliases(
        tables: &[(&str, &SymbolTable)],
        alias_only: &[(usize, &[&str])],
    ) -> RenamePlan {
        let modules: Vec<PlanModule<'_>> = tables
            .iter()
            .enumerate()
            .map(|(index, (name, table))| PlanModule {
                id: ModuleId::new(index as u32),
                name,
                table,
                disposition: Disposition::Inline,
                alias_only: alias_only
                    .iter()
                    .find(|(i, _)| *i == index)
                    .map(|(_, names)| names.iter().map(|n| (*n).to_owned()).collect())
                    .unwrap_or_default(),
            })
            .collect();
        // Leaves-first order with the entry last.
        let order: Vec<ModuleId> = (0..tables.len() as u32)
            .rev()
            .map(ModuleId::new)
            .collect();
        build_plan(&modules, &order)
    }

    fn plan_for(tables: &[(&str, &SymbolTable)]) -> RenamePlan {
        plan_with_aliases(tables, &[])
    }

    #[test]
    fn no_collision_means_identity() {
        let entry = table_of("from utils import helper\nresult = helper()\n");
        let utils = table_of("def helper():\n    return 1\n");
        // The entry's `helper` binding is an alias of utils.helper.
        let plan = plan_with_aliases(
            &[("main", &entry), ("utils", &utils)],
            &[(0, &["helper"])],
        );
        assert_eq!(
            plan.emitted_name(ModuleId::new(1), "helper"),
            Some("helper")
        );
        // The alias binding itself gets no row.
        assert_eq!(plan.emitted_name(ModuleId::ENTRY, "helper"), None);
    }

    #[test]
    fn colliding_classes_are_suffixed_per_module() {
        let entry = table_of(
            "from models import User as ModelUser\nfrom entities import User as EntityUser\n",
        );
        let models = table_of("class User:\n    pass\nclass Product:\n    pass\n");
        let entities = table_of("class User:\n    pass\nclass Product:\n    pass\n");
        let plan = plan_with_aliases(
            &[("main", &entry), ("models", &models), ("entities", &entities)],
            &[(0, &["ModelUser", "EntityUser"])],
        );

        assert_eq!(
            plan.emitted_name(ModuleId::new(1), "User"),
            Some("User_models")
        );
        assert_eq!(
            plan.emitted_name(ModuleId::new(2), "User"),
            Some("User_entities")
        );
        assert_eq!(
            plan.emitted_name(ModuleId::new(1), "Product"),
            Some("Product_models")
        );
        assert_eq!(
            plan.emitted_name(ModuleId::new(2), "Product"),
            Some("Product_entities")
        );
    }

    #[test]
    fn entry_names_always_win() {
        let entry = table_of("value = 1\n");
        let other = table_of("value = 2\n");
        let plan = plan_for(&[("main", &entry), ("lib", &other)]);
        assert_eq!(plan.emitted_name(ModuleId::ENTRY, "value"), Some("value"));
        assert_eq!(
            plan.emitted_name(ModuleId::new(1), "value"),
            Some("value_lib")
        );
    }

    #[test]
    fn emitted_names_are_injective() {
        let entry = table_of("x = 1\n");
        let a = table_of("x = 1\ny = 2\n");
        let b = table_of("x = 1\ny = 2\n");
        let plan = plan_for(&[("main", &entry), ("pkg.a", &a), ("pkg.b", &b)]);

        let mut seen = IndexSet::new();
        for (_, emitted) in plan.iter() {
            assert!(seen.insert(emitted.to_owned()), "duplicate emitted name {emitted}");
        }
    }

    #[test]
    fn dotted_names_make_flat_slugs() {
        assert_eq!(sanitize_module_name("utils.helpers"), "utils_helpers");
        assert_eq!(sanitize_module_name("my-pkg.mod"), "my_pkg_mod");
    }

    #[test]
    fn helper_allocation_avoids_collisions() {
        let entry = table_of("utils = 1\n");
        let lib = table_of("");
        let mut plan = plan_for(&[("main", &entry), ("lib", &lib)]);
        let helper = plan.allocate_helper("utils", "utils");
        assert_ne!(helper, "utils");
        assert!(helper.starts_with("utils_"));
        // A second allocation with the same preference stays unique.
        let again = plan.allocate_helper("utils", "utils");
        assert_ne!(again, helper);
    }

    #[test]
    fn deterministic_across_runs() {
        let entry = table_of("x = 1\n");
        let a = table_of("x = 1\n");
        let first = plan_for(&[("main", &entry), ("mod", &a)]);
        let second = plan_for(&[("main", &entry), ("mod", &a)]);
        let left: Vec<_> = first.iter().map(|(k, v)| (k.clone(), v.to_owned())).collect();
        let right: Vec<_> = second.iter().map(|(k, v)| (k.clone(), v.to_owned())).collect();
        assert_eq!(left, right);
    }
}
