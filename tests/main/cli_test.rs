//! CLI contract tests.

use std::fs;
use std::path::PathBuf;

fn main_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/main.rs");
    match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => panic!("main source should load from {}: {err}", path.display()),
    }
}

#[test]
fn main_defines_primary_subcommands() {
    let source = main_source();
    assert!(source.contains("Serve"));
    assert!(source.contains("Fetch"));
    assert!(source.contains("Check"));
}

#[test]
fn serve_closes_issuance_on_shutdown() {
    let source = main_source();
    assert!(source.contains("ctrl_c"));
    assert!(source.contains("issuance.close()"));
}

#[test]
fn serve_refuses_unsupported_platforms() {
    let source = main_source();
    assert!(source.contains("CredentialExtractor::for_platform"));
}
