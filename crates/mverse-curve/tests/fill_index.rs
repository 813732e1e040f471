mod common;

use common::{fixture, fixture_table, region_config, region_dataset};
use mverse_curve::{
    build_spec_table, describe, BuildOpts, CancelToken, FillMatrices, MetaEstimator,
};

#[test]
fn spec_fill_marks_used_values_with_k() {
    let (config, dataset) = fixture();
    let table = fixture_table();
    let fills = FillMatrices::build(&config, &table, &dataset).expect("fills");

    assert_eq!(
        fills.spec_fill.labels,
        vec![
            "Method: random effects (DL)",
            "Method: fixed effect",
            "Sex: either",
            "Sex: female",
            "Sex: male",
        ]
    );
    assert_eq!(fills.spec_fill.rows.len(), table.len());
    for spec in table.iter() {
        let row = fills.spec_row(spec.rank).expect("spec fill row");
        assert!(row.iter().all(|v| *v == 0 || *v == spec.k));
        assert_eq!(row.iter().filter(|v| **v == spec.k).count(), 2);
        let expected_method_slot = if spec.factors[1] == "FE" { 1 } else { 0 };
        assert_eq!(row[expected_method_slot], spec.k);
    }
}

#[test]
fn cluster_fill_reports_included_share() {
    let (config, dataset) = fixture();
    let table = fixture_table();
    let fills = FillMatrices::build(&config, &table, &dataset).expect("fills");

    assert_eq!(fills.cluster_fill.cluster_ids, vec![1, 2, 3, 4]);
    assert_eq!(
        fills.cluster_fill.labels,
        vec!["Adams 2001", "Baker 2005", "Chen 2010", "Diaz 2014"]
    );
    for spec in table.iter() {
        let row = fills.cluster_row(spec.rank).expect("cluster fill row");
        assert!(row.iter().all(|v| (0.0..=100.0).contains(v)));
        let expected: Vec<f64> = match spec.factors[0].as_str() {
            "M" => vec![0.0, 0.0, 100.0, 100.0],
            "F" => vec![100.0, 100.0, 0.0, 0.0],
            _ => vec![100.0; 4],
        };
        assert_eq!(row, expected.as_slice());
    }
}

#[test]
fn partial_clusters_get_fractional_fill() {
    let config = region_config(&["EU", "US"], &["FE"], 2);
    let dataset = region_dataset(&config);
    let table = build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::new(config.methods.clone()),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("build")
    .table;
    let fills = FillMatrices::build(&config, &table, &dataset).expect("fills");
    for spec in table.iter() {
        let row = fills.cluster_row(spec.rank).expect("row");
        match spec.factors[0].as_str() {
            "US" => assert_eq!(row, [0.0, 50.0]),
            "EU" => assert_eq!(row, [100.0, 50.0]),
            _ => assert_eq!(row, [100.0, 100.0]),
        }
        assert_eq!(fills.cluster_percent(spec.rank, 1), Some(row[1]));
    }
}

#[test]
fn restrict_keeps_only_requested_ranks() {
    let (config, dataset) = fixture();
    let table = fixture_table();
    let fills = FillMatrices::build(&config, &table, &dataset).expect("fills");
    let view = fills.restrict(&[2, 5, 42]);
    assert_eq!(view.spec_fill.labels, fills.spec_fill.labels);
    assert_eq!(
        view.spec_fill.rows.keys().cloned().collect::<Vec<_>>(),
        vec!["2", "5"]
    );
    assert_eq!(view.cluster_fill.rows.len(), 2);
    assert_eq!(view.cluster_row(5), fills.cluster_row(5));
    assert!(view.spec_row(1).is_none());
}

#[test]
fn mismatched_table_is_rejected() {
    let (config, dataset) = fixture();
    let mut table = fixture_table();
    table.how = vec!["other".to_string()];
    let err = FillMatrices::build(&config, &table, &dataset).expect_err("mismatch");
    assert_eq!(err.info().code, "table_config_mismatch");
}

#[test]
fn describe_lists_clusters_and_rows() {
    let (config, dataset) = fixture();
    let table = fixture_table();
    let fills = FillMatrices::build(&config, &table, &dataset).expect("fills");
    let spec = table
        .iter()
        .find(|spec| spec.factors == ["M", "FE"])
        .expect("M/FE spec");

    let detail = describe(&config, &table, &fills, &dataset, spec.rank).expect("detail");
    assert_eq!(detail.rank, spec.rank);
    assert_eq!(detail.k, 6);
    assert_eq!(detail.factors[0].label, "Sex: male");
    assert_eq!(detail.factors[1].label, "Method: fixed effect");
    assert_eq!(detail.clusters.len(), 2);
    assert_eq!(detail.clusters[0].label, "Adams 2001");
    assert_eq!(detail.clusters[0].row_ids, vec![1, 2, 3]);
    assert_eq!(detail.clusters[1].row_ids, vec![4, 5, 6]);
    assert!(detail.clusters.iter().all(|c| c.percent == 100.0));

    let err = describe(&config, &table, &fills, &dataset, 99).expect_err("unknown rank");
    assert_eq!(err.info().code, "unknown_rank");
}
