//! End-to-end bundling scenarios over the fixture projects.
//!
//! Each test drives the full pipeline through the public API and asserts
//! structural properties of the emitted source.

use std::path::{Path, PathBuf};

use cribo::{config::Config, orchestrator::BundleOrchestrator};
use pretty_assertions::assert_eq;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn bundle(name: &str) -> String {
    try_bundle(name).expect("bundling should succeed")
}

fn try_bundle(name: &str) -> anyhow::Result<String> {
    let root = fixture(name);
    let config = Config {
        src: vec![root.clone()],
        ..Config::default()
    };
    let mut orchestrator = BundleOrchestrator::new(config);
    orchestrator.bundle_to_string_with_pythonpath(&root.join("main.py"), Some(""))
}

#[test]
fn happy_path_inlines_everything() {
    let output = bundle("happy_path");

    assert!(output.starts_with("#!/usr/bin/env python3"));
    assert!(output.contains("def format_message"));
    assert!(output.contains("class User"));
    // First-party imports are gone.
    assert!(!output.contains("from utils.helpers import"));
    assert!(!output.contains("from models.user import"));
    // Definitions precede the entry body.
    let def_pos = output.find("def format_message").unwrap();
    let class_pos = output.find("class User").unwrap();
    let entry_pos = output.find("print(format_message(").unwrap();
    assert!(def_pos < entry_pos);
    assert!(class_pos < entry_pos);
    // No wrapping machinery for an acyclic project.
    assert!(!output.contains("__cribo_init_"));
}

#[test]
fn bundling_is_deterministic() {
    assert_eq!(bundle("happy_path"), bundle("happy_path"));
    assert_eq!(bundle("wrapped_mutual_import"), bundle("wrapped_mutual_import"));
}

#[test]
fn class_name_collisions_are_suffixed() {
    let output = bundle("class_name_collision");

    assert!(output.contains("class User_models"));
    assert!(output.contains("class User_entities"));
    assert!(output.contains("class Product_models"));
    assert!(output.contains("class Product_entities"));
    // The entry body references the renamed classes directly.
    assert!(output.contains("model_user = User_models("));
    assert!(output.contains("entity_user = User_entities("));
    // The plain name survives only inside string literals.
    assert!(!output.contains("class User:"));
}

#[test]
fn function_level_cycle_is_inlined() {
    let output = bundle("function_level_cycle");

    assert!(!output.contains("__cribo_init_"));
    assert!(output.contains("def process_data"));
    assert!(output.contains("def transform"));
    assert!(output.contains("def utility_function"));
    // The lazy imports dissolved into direct references.
    assert!(!output.contains("from helper_module import"));
    assert!(!output.contains("from function_module import"));
}

#[test]
fn constants_cycle_refuses_to_bundle() {
    let err = try_bundle("unresolvable_cycle").expect_err("cycle must be rejected");
    let rendered = format!("{err}");
    assert!(rendered.contains("unresolvable cycle"), "got: {rendered}");
    assert!(rendered.contains("temporal paradox"), "got: {rendered}");
    assert!(rendered.contains("constants_a"), "got: {rendered}");
}

#[test]
fn mutual_module_imports_are_wrapped() {
    let output = bundle("wrapped_mutual_import");

    // One init function per wrapped module, defined before the registry.
    assert_eq!(output.matches("def __cribo_init_").count(), 2);
    assert!(output.contains("__cribo_modules"));
    assert!(output.contains("__cribo_init_functions"));
    assert!(output.contains("class CriboBundledFinder"));
    assert!(output.contains("sys.meta_path.insert(0, CriboBundledFinder"));
    assert!(output.contains("types.ModuleType"));

    // The entry initializes lazily through the init function.
    assert!(output.contains("get_config = __cribo_init_"));
    // Init functions are idempotent through the runtime module table.
    assert!(output.contains("in sys.modules:"));

    let finder_pos = output.find("class CriboBundledFinder").unwrap();
    let entry_pos = output.find("get_config = __cribo_init_").unwrap();
    assert!(finder_pos < entry_pos);
}

#[test]
fn star_import_honors_all() {
    let output = bundle("all_export_filtering");

    // The star import is expanded away.
    assert!(!output.contains("import *"));
    // Private helpers are still inlined, just never bound in the entry.
    assert!(output.contains("def public_func"));
    assert!(output.contains("def _private_func"));
    assert!(output.contains("CONSTANT = 42"));
    assert!(output.contains("print(public_func())"));
    assert!(output.contains("print(CONSTANT)"));
}

#[test]
fn future_imports_lead_the_bundle() {
    let output = bundle("future_imports");

    let future_pos = output.find("from __future__ import annotations").unwrap();
    let textwrap_pos = output.find("import textwrap").unwrap();
    let def_pos = output.find("def greet").unwrap();
    assert!(future_pos < textwrap_pos);
    assert!(textwrap_pos < def_pos);
    // Exactly one merged future import.
    assert_eq!(output.matches("from __future__").count(), 1);
}

#[test]
fn global_statements_follow_renames() {
    let output = bundle("global_statements");

    // The colliding module global is renamed everywhere, declaration
    // included; the entry's own binding keeps its name.
    assert!(output.contains("count_counter = 0"));
    assert!(output.contains("global count_counter"));
    assert!(output.contains("count_counter += 1"));
    assert!(output.contains("return count_counter"));
    assert!(output.contains("count = 'entry'") || output.contains("count = \"entry\""));
}

#[test]
fn bare_import_builds_namespace_objects() {
    let output = bundle("bare_import");

    assert!(output.contains("import types"));
    assert!(output.contains("utils = types.SimpleNamespace()"));
    assert!(output.contains("utils.helpers = types.SimpleNamespace()"));
    assert!(output.contains("utils.helpers.fmt = fmt"));
    // Namespaces exist before the entry uses them.
    let ns_pos = output.find("utils.helpers.fmt = fmt").unwrap();
    let use_pos = output.find("print(utils.helpers.fmt(").unwrap();
    assert!(ns_pos < use_pos);
}

#[test]
fn package_reexports_resolve_to_origin() {
    let output = bundle("package_reexports");

    assert!(output.contains("def get_config"));
    assert!(!output.contains("from mypackage import"));
    assert!(!output.contains("from mypackage.config import"));
    assert!(output.contains("print(get_config())"));
}

#[test]
fn third_party_imports_survive_and_feed_requirements() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("main.py"),
        "import requests\nimport requests.auth\nfrom helper import go\n\nprint(go())\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("helper.py"),
        "import attrs\n\n\ndef go():\n    return attrs.__name__\n",
    )
    .unwrap();

    let config = Config {
        src: vec![dir.path().to_path_buf()],
        ..Config::default()
    };
    let mut orchestrator = BundleOrchestrator::new(config);
    let output = orchestrator
        .bundle_to_string_with_pythonpath(&dir.path().join("main.py"), Some(""))
        .unwrap();

    // External imports hoist to the prelude, deduplicated.
    assert!(output.contains("import requests"));
    assert!(output.contains("import attrs"));
    assert_eq!(output.matches("import attrs").count(), 1);
    let attrs_pos = output.find("import attrs").unwrap();
    let def_pos = output.find("def go").unwrap();
    assert!(attrs_pos < def_pos);

    assert_eq!(orchestrator.requirements(), "attrs\nrequests\n");
}
