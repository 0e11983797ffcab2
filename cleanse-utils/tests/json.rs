use cleanse_utils::{compress_obj, decompress_obj, dejsonify, jsonify, run_seed, u8s_from_str};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Report {
    label: usize,
    mask_norm: f64,
    converged: bool,
}

#[test]
fn test_jsonify_sorts_keys() {
    let mut map = HashMap::new();
    map.insert("zeta".to_string(), 1);
    map.insert("alpha".to_string(), 2);
    map.insert("mid".to_string(), 3);
    assert_eq!(jsonify(&map), r#"{"alpha":2,"mid":3,"zeta":1}"#);
}

#[test]
fn test_jsonify_roundtrip() {
    let report = Report {
        label: 2,
        mask_norm: 14.5,
        converged: true,
    };
    let json = jsonify(&report);
    let parsed: Report = dejsonify(&json).unwrap();
    assert_eq!(parsed, report);
}

#[test]
fn test_compress_roundtrip() {
    let report = Report {
        label: 7,
        mask_norm: 0.0,
        converged: false,
    };
    let compressed = compress_obj(&report);
    let parsed: Report = decompress_obj(&compressed).unwrap();
    assert_eq!(parsed, report);
}

#[test]
fn test_seed_derivation_is_stable() {
    let scan_seed = u8s_from_str("scan");
    assert_eq!(run_seed(&scan_seed, 3), run_seed(&scan_seed, 3));
    assert_ne!(run_seed(&scan_seed, 3), run_seed(&scan_seed, 4));
    assert_ne!(run_seed(&u8s_from_str("other"), 3), run_seed(&scan_seed, 3));
}
