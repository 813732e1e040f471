use std::path::PathBuf;

use mverse_curve::{load_config, load_dataset, read_dataset, MultiverseConfig, RawConfig};
use serde_json::json;

fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join(relative)
}

fn config() -> MultiverseConfig {
    let raw: RawConfig = serde_json::from_value(json!({
        "title": "ingest",
        "k_min": 1,
        "n_boot_iter": 1,
        "colmap": { "key_c": "study", "key_c_id": "study_id", "key_e_id": "es_id" },
        "which": {
            "n": 1, "keys": ["sex"], "keys_labels": ["Sex"],
            "values": [["M", "F"]], "values_labels": [["m", "f"]], "add_all_values": [false]
        },
        "how": {
            "n": 1, "keys": ["ma_method"], "keys_labels": ["Method"],
            "values": [["FE"]], "values_labels": [["fixed"]]
        }
    }))
    .expect("raw config");
    raw.validate().expect("valid config")
}

#[test]
fn fixture_dataset_loads() {
    let config = load_config(fixture_path("fixtures/config.json")).expect("config");
    let dataset = load_dataset(fixture_path("fixtures/data.csv"), &config).expect("dataset");
    assert_eq!(dataset.len(), 12);
    assert_eq!(dataset.cluster_ids().to_string(), "1,2,3,4");
    assert!(dataset.cluster_sizes().values().all(|size| *size == 3));
    let row = dataset.row(4).expect("row 4");
    assert_eq!(row.cluster, "Baker 2005");
    assert_eq!(row.n, Some(60));
    assert_eq!(row.category("sex"), Some("M"));
    assert!((row.effect.r - 0.44).abs() < 1e-6);
    assert!((row.null_se() - 1.0 / 60f64.sqrt()).abs() < 1e-12);
}

#[test]
fn identifiers_are_generated_when_absent() {
    let csv = "study,r,r_se,sex\nB,0.1,0.05,M\nA,0.2,0.05,F\nB,0.3,0.05,F\n";
    let dataset = read_dataset(csv.as_bytes(), &config()).expect("dataset");
    // B appears first and gets cluster 1; rows are regrouped by cluster
    let rows = dataset.rows();
    assert_eq!(rows.iter().map(|r| r.cluster_id).collect::<Vec<_>>(), vec![1, 1, 2]);
    assert_eq!(rows.iter().map(|r| r.row_id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(rows[2].cluster, "A");
    assert!((rows[0].effect.z - 0.1f64.atanh()).abs() < 1e-12);
    assert!((rows[0].effect.z_se - 0.05 / 0.99).abs() < 1e-12);
    assert_eq!(rows[0].n, None);
    assert_eq!(rows[0].null_se(), rows[0].effect.z_se);
}

#[test]
fn missing_columns_are_rejected() {
    let no_factor = "study,z,z_se\nA,0.1,0.1\n";
    let err = read_dataset(no_factor.as_bytes(), &config()).expect_err("missing sex");
    assert_eq!(err.info().code, "missing_column");
    assert_eq!(err.info().context.get("column").map(String::as_str), Some("sex"));

    let no_effect = "study,sex\nA,M\n";
    let err = read_dataset(no_effect.as_bytes(), &config()).expect_err("missing effect");
    assert_eq!(err.info().code, "missing_effect");
}

#[test]
fn bad_values_are_rejected() {
    let dup = "study,es_id,z,z_se,sex\nA,1,0.1,0.1,M\nA,1,0.2,0.1,F\n";
    let err = read_dataset(dup.as_bytes(), &config()).expect_err("duplicate ids");
    assert_eq!(err.info().code, "duplicate_row_id");

    let text = "study,z,z_se,sex\nA,abc,0.1,M\n";
    let err = read_dataset(text.as_bytes(), &config()).expect_err("bad number");
    assert_eq!(err.info().code, "invalid_number");

    let empty = "study,z,z_se,sex\n";
    let err = read_dataset(empty.as_bytes(), &config()).expect_err("empty");
    assert_eq!(err.info().code, "dataset_empty");
}
