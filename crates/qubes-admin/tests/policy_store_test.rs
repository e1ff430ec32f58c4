#![allow(clippy::unwrap_used)]
// Integration tests for `DirPolicyStore` on a real directory.

use tempfile::TempDir;

use qubes_admin::policy::content_token;
use qubes_admin::{DirPolicyStore, Error, PolicyStore, TOKEN_ANY, TOKEN_NEW};

fn store() -> (TempDir, DirPolicyStore) {
    let dir = TempDir::new().unwrap();
    let store = DirPolicyStore::new(dir.path());
    (dir, store)
}

#[test]
fn test_missing_policy_is_not_found() {
    let (_dir, store) = store();
    let err = store.policy_get("50-config-clipboard").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_create_with_new_token_then_read_back() {
    let (dir, store) = store();
    let text = "qubes.ClipboardPaste * @anyvm @anyvm ask\n";

    store
        .policy_replace("50-config-clipboard", text, TOKEN_NEW)
        .unwrap();

    assert!(dir.path().join("50-config-clipboard.policy").is_file());
    let (content, token) = store.policy_get("50-config-clipboard").unwrap();
    assert_eq!(content, text);
    assert_eq!(token, content_token(text));
    assert_eq!(token.len(), 64);
}

#[test]
fn test_new_token_on_existing_file_conflicts() {
    let (_dir, store) = store();
    store.policy_replace("a", "x\n", TOKEN_NEW).unwrap();

    let err = store.policy_replace("a", "y\n", TOKEN_NEW).unwrap_err();
    assert!(matches!(err, Error::PolicyExists { .. }));
}

#[test]
fn test_stale_token_leaves_file_untouched() {
    let (_dir, store) = store();
    store.policy_replace("a", "one\n", TOKEN_NEW).unwrap();
    let (_, stale) = store.policy_get("a").unwrap();
    store.policy_replace("a", "two\n", &stale).unwrap();

    let err = store.policy_replace("a", "three\n", &stale).unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(store.policy_get("a").unwrap().0, "two\n");
}

#[test]
fn test_any_token_overwrites_unconditionally() {
    let (_dir, store) = store();
    store.policy_replace("a", "one\n", TOKEN_NEW).unwrap();
    store.policy_replace("a", "two\n", TOKEN_ANY).unwrap();
    assert_eq!(store.policy_get("a").unwrap().0, "two\n");
}

#[test]
fn test_listing_separates_policies_and_includes() {
    let (dir, store) = store();
    store.policy_replace("50-config-filecopy", "", TOKEN_NEW).unwrap();
    store.policy_replace("30-user", "", TOKEN_NEW).unwrap();
    store
        .policy_include_replace("config-splitgpg", "", TOKEN_NEW)
        .unwrap();
    std::fs::write(dir.path().join("README"), "ignored").unwrap();

    assert_eq!(
        store.policy_list().unwrap(),
        vec!["30-user", "50-config-filecopy"]
    );
    assert_eq!(store.policy_include_list().unwrap(), vec!["config-splitgpg"]);
}

#[test]
fn test_path_traversal_rejected() {
    let (_dir, store) = store();
    for name in ["", "../x", ".hidden", "a/b"] {
        let err = store.policy_replace(name, "x", TOKEN_ANY).unwrap_err();
        assert!(
            matches!(err, Error::InvalidPolicyName { .. }),
            "expected InvalidPolicyName for {name:?}, got: {err:?}"
        );
    }
}
