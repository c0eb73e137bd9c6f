//! Selector parsing and selector-set semantics.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use latchkey::identity::{Selector, SelectorError, SelectorSet};

fn selector(raw: &str) -> Selector {
    match Selector::parse(raw) {
        Ok(selector) => selector,
        Err(err) => panic!("{raw} should parse: {err}"),
    }
}

#[test]
fn parses_namespaced_selector() {
    let parsed = selector("unix:uid:1000");
    assert_eq!(parsed.namespace(), "unix");
    assert_eq!(parsed.as_str(), "unix:uid:1000");
    assert_eq!(parsed.to_string(), "unix:uid:1000");
}

#[test]
fn rejects_malformed_selectors() {
    assert_eq!(Selector::parse(""), Err(SelectorError::Empty));
    assert!(matches!(
        Selector::parse("role"),
        Err(SelectorError::InvalidNamespace(_))
    ));
    assert!(matches!(
        Selector::parse("role:"),
        Err(SelectorError::MissingValue(_))
    ));
    assert!(matches!(
        Selector::parse("Role:web"),
        Err(SelectorError::InvalidNamespace(_))
    ));
    assert!(matches!(
        Selector::parse(":web"),
        Err(SelectorError::InvalidNamespace(_))
    ));
    assert!(matches!(
        Selector::parse("role:we\nb"),
        Err(SelectorError::IllegalCharacter(_))
    ));
}

#[test]
fn unix_constructors_use_fixed_prefixes() {
    assert_eq!(Selector::unix_uid(42).as_str(), "unix:uid:42");
    assert_eq!(Selector::unix_gid(7).as_str(), "unix:gid:7");
    assert_eq!(
        Selector::unix_path(Path::new("/usr/bin/app")).as_str(),
        "unix:path:/usr/bin/app"
    );
}

#[test]
fn non_utf8_paths_stay_distinct() {
    let a = Selector::unix_path(Path::new(OsStr::from_bytes(b"/opt/a\xff")));
    let b = Selector::unix_path(Path::new(OsStr::from_bytes(b"/opt/a\xfe")));
    assert_ne!(a, b);
    assert_eq!(a.as_str(), "unix:path_hex:2f6f70742f61ff");
    assert_eq!(b.as_str(), "unix:path_hex:2f6f70742f61fe");
    assert_eq!(a.namespace(), "unix");

    // UTF-8 paths keep the plain prefix.
    let spoof = Selector::unix_path(Path::new("/opt/a"));
    assert_eq!(spoof.as_str(), "unix:path:/opt/a");
    assert_ne!(spoof, a);
}

#[test]
fn set_ignores_duplicates_and_orders_members() {
    let mut set = SelectorSet::new();
    assert!(set.insert(selector("role:web")));
    assert!(set.insert(selector("env:prod")));
    assert!(!set.insert(selector("role:web")));

    assert_eq!(set.len(), 2);
    assert!(set.contains(&selector("env:prod")));
    assert_eq!(set.to_string(), "[env:prod, role:web]");
}

#[test]
fn subset_is_per_selector() {
    let required: SelectorSet = [selector("role:web"), Selector::unix_uid(1000)]
        .into_iter()
        .collect();
    let mut attested = required.clone();
    attested.extend([Selector::unix_gid(1000), selector("env:prod")]);

    assert!(required.is_subset(&attested));
    assert!(!attested.is_subset(&required));
    assert!(SelectorSet::new().is_subset(&required));
}

#[test]
fn selector_serde_goes_through_parse() {
    let ok: Result<Selector, _> = serde_json::from_str("\"role:web\"");
    assert!(ok.is_ok());
    let bad: Result<Selector, _> = serde_json::from_str("\"no-namespace\"");
    assert!(bad.is_err());
}
