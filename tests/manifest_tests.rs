#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests for Arena Client.
//!
//! These tests verify that `Cargo.toml` keeps the lint table, feature layout
//! and demo registrations the project relies on. If any test fails, the
//! manifest has drifted from the agreed-upon standards.
//!
//! All checks are synchronous filesystem reads; no network access or async
//! runtime needed.

use std::path::PathBuf;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Parses `Cargo.toml` into a TOML table.
fn manifest() -> toml::Table {
    let path = project_root().join("Cargo.toml");
    let contents = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read '{}': {e}", path.display()));
    contents
        .parse::<toml::Table>()
        .unwrap_or_else(|e| panic!("Cargo.toml is not valid TOML: {e}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: panic_policy
// ─────────────────────────────────────────────────────────────────────────────

mod panic_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn cargo_toml_has_all_panic_free_lints() {
        let manifest = manifest();
        let clippy = manifest["lints"]["clippy"]
            .as_table()
            .expect("Cargo.toml is missing a [lints.clippy] table");

        for lint in REQUIRED_DENY_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(toml::Value::as_str),
                Some("deny"),
                "Cargo.toml must set `{lint} = \"deny\"` in [lints.clippy] to \
                 enforce the panic-free policy in library code."
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: feature_policy
// ─────────────────────────────────────────────────────────────────────────────

mod feature_policy {
    use super::*;

    #[test]
    fn websocket_transport_is_a_default_feature() {
        let manifest = manifest();
        let default: Vec<&str> = manifest["features"]["default"]
            .as_array()
            .expect("features.default must be an array")
            .iter()
            .filter_map(toml::Value::as_str)
            .collect();
        assert_eq!(default, vec!["transport-websocket"]);
    }

    #[test]
    fn websocket_dependencies_are_optional() {
        let manifest = manifest();
        let dependencies = &manifest["dependencies"];
        for name in ["tokio-tungstenite", "futures-util"] {
            assert_eq!(
                dependencies[name]
                    .get("optional")
                    .and_then(toml::Value::as_bool),
                Some(true),
                "`{name}` must stay optional behind the transport-websocket feature"
            );
        }
    }

    #[test]
    fn reqwest_uses_rustls_without_default_features() {
        let manifest = manifest();
        let reqwest = &manifest["dependencies"]["reqwest"];
        assert_eq!(
            reqwest.get("default-features").and_then(toml::Value::as_bool),
            Some(false)
        );
        let features: Vec<&str> = reqwest["features"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(toml::Value::as_str)
            .collect();
        assert!(features.contains(&"rustls-tls"), "{features:?}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: demo_registration
// ─────────────────────────────────────────────────────────────────────────────

mod demo_registration {
    use super::*;

    #[test]
    fn every_registered_demo_exists() {
        let manifest = manifest();
        let examples = manifest["example"]
            .as_array()
            .expect("demos must be registered as [[example]] entries");
        assert!(!examples.is_empty());

        for example in examples {
            let path = example["path"].as_str().expect("example entry without path");
            assert!(
                project_root().join(path).is_file(),
                "registered demo '{path}' is missing"
            );
        }
    }
}
