mod common;

use common::{
    fixture, fixture_table, region_config, region_dataset, ConstEstimator, DegenerateEstimator,
    StubbornEstimator,
};
use mverse_curve::{build_spec_table, BuildOpts, CancelToken, MetaEstimator, ModelLevel};

#[test]
fn sex_by_method_example_keeps_six_specifications() {
    let (config, dataset) = fixture();
    let outcome = build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::new(config.methods.clone()),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("build");
    let table = &outcome.table;

    assert_eq!(outcome.summary.enumerated, 6);
    assert_eq!(outcome.summary.retained, 6);
    assert_eq!(outcome.summary.below_k_min, 0);
    assert_eq!(table.which, vec!["sex"]);
    assert_eq!(table.how, vec!["ma_method"]);
    assert_eq!(table.ranks(), vec![1, 2, 3, 4, 5, 6]);

    for spec in table.iter() {
        let sex = table.factor_value(spec, "sex").expect("sex value");
        assert!(spec.k >= config.k_min);
        assert_eq!(spec.ci, spec.ub - spec.lb);
        assert!(spec.ci >= 0.0);
        assert!(spec.lb <= spec.mean && spec.mean <= spec.ub);
        match sex {
            "M" => {
                assert_eq!(spec.set.to_string(), "1,2");
                assert_eq!(spec.set_es.to_string(), "1,2,3,4,5,6");
                assert!(!spec.full_set);
            }
            "F" => {
                assert_eq!(spec.set.to_string(), "3,4");
                assert_eq!(spec.k, 6);
                assert_eq!(spec.kc, 2);
                assert!(!spec.full_set);
            }
            "all_sex" => {
                assert_eq!(spec.k, 12);
                assert_eq!(spec.kc, 4);
                assert!(spec.full_set);
            }
            other => panic!("unexpected sex value {other}"),
        }
    }
    let means = table.observed_curve();
    assert!(means.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn k_min_drops_sparse_combinations() {
    let (mut config, dataset) = fixture();
    config.k_min = 7;
    let outcome = build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::new(config.methods.clone()),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("build");
    assert_eq!(outcome.summary.below_k_min, 4);
    assert_eq!(outcome.table.len(), 2);
    assert!(outcome.table.iter().all(|spec| spec.full_set && spec.k == 12));

    config.k_min = 13;
    let outcome = build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::new(config.methods.clone()),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("sparse build is not an error");
    assert!(outcome.table.is_empty());
}

#[test]
fn ties_keep_enumeration_order() {
    let (config, dataset) = fixture();
    let outcome = build_spec_table(
        &config,
        &dataset,
        &ConstEstimator(0.1),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("build");
    let order: Vec<Vec<String>> = outcome.table.iter().map(|s| s.factors.clone()).collect();
    let expected = [
        ["M", "FE"],
        ["M", "RE_DL"],
        ["F", "FE"],
        ["F", "RE_DL"],
        ["all_sex", "FE"],
        ["all_sex", "RE_DL"],
    ];
    assert_eq!(order.len(), expected.len());
    for (got, want) in order.iter().zip(expected.iter()) {
        assert_eq!(got, want);
    }
}

#[test]
fn identical_wildcard_results_are_collapsed() {
    let config = region_config(&["EU", "US"], &["FE", "RE_DL"], 2);
    let dataset = region_dataset(&config);
    // rows 3 and 4 are the only US rows; a copy where every row is EU makes
    // the wildcard and the EU value select the same rows
    let eu_only = region_config(&["EU"], &["FE", "RE_DL"], 2);
    let rows = dataset
        .rows()
        .iter()
        .cloned()
        .map(|mut row| {
            row.categories.insert("region".to_string(), "EU".to_string());
            row
        })
        .collect();
    let uniform = mverse_core::RowDataset::new(rows).expect("dataset");

    let outcome = build_spec_table(
        &eu_only,
        &uniform,
        &ConstEstimator(0.2),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("build");
    assert_eq!(outcome.summary.enumerated, 4);
    assert_eq!(outcome.summary.duplicates, 2);
    assert_eq!(outcome.table.len(), 2);
    // the first enumerated duplicate survives
    assert!(outcome.table.iter().all(|spec| spec.factors[0] == "EU"));

    // the key compares cluster sets, so EU and the wildcard collapse even
    // though the wildcard also picks up the US rows of cluster 1
    let outcome = build_spec_table(
        &config,
        &dataset,
        &ConstEstimator(0.2),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("build");
    assert_eq!(outcome.summary.duplicates, 2);
    assert_eq!(outcome.table.len(), 4);

    let outcome = build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::new(config.methods.clone()),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("build");
    assert_eq!(outcome.summary.duplicates, 0);
    assert_eq!(outcome.table.len(), 6);
}

#[test]
fn unsupported_method_is_fatal() {
    let config = region_config(&["EU", "US"], &["FE", "bayes"], 2);
    let dataset = region_dataset(&config);
    let err = build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::new(config.methods.clone()),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect_err("unsupported method");
    assert_eq!(err.info().code, "unsupported_method");
}

#[test]
fn estimator_failures_are_dropped_until_all_fail() {
    let (config, dataset) = fixture();
    let err = build_spec_table(
        &config,
        &dataset,
        &DegenerateEstimator,
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect_err("every fit failed");
    assert_eq!(err.info().code, "all_specifications_failed");
    assert_eq!(err.info().context.get("failed").map(String::as_str), Some("6"));
}

#[test]
fn non_convergence_is_retried_with_relaxed_controls() {
    let (config, dataset) = fixture();
    // 2000 -> 4000 -> 8000 iterations
    let stubborn = StubbornEstimator { needed: 8000 };
    let outcome = build_spec_table(
        &config,
        &dataset,
        &stubborn,
        &BuildOpts {
            concurrency: 2,
            max_retries: 2,
        },
        &CancelToken::new(),
    )
    .expect("retries succeed");
    assert_eq!(outcome.table.len(), 6);
    assert_eq!(outcome.summary.failed, 0);

    let err = build_spec_table(
        &config,
        &dataset,
        &stubborn,
        &BuildOpts {
            concurrency: 1,
            max_retries: 1,
        },
        &CancelToken::new(),
    )
    .expect_err("not enough retries");
    assert_eq!(err.info().code, "all_specifications_failed");
}

#[test]
fn cancelled_build_publishes_nothing() {
    let (config, dataset) = fixture();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::new(config.methods.clone()),
        &BuildOpts::default(),
        &cancel,
    )
    .expect_err("cancelled");
    assert!(err.is_cancelled());
}

#[test]
fn thread_count_does_not_change_the_table() {
    let (config, dataset) = fixture();
    let estimator = MetaEstimator::new(config.methods.clone());
    let parallel = build_spec_table(
        &config,
        &dataset,
        &estimator,
        &BuildOpts {
            concurrency: 4,
            max_retries: 2,
        },
        &CancelToken::new(),
    )
    .expect("parallel build");
    assert_eq!(parallel.table, fixture_table());
}

#[test]
fn three_level_configs_fit_nested_rows() {
    let mut config = region_config(&["EU", "US"], &["REML", "ML"], 2);
    config.level = ModelLevel::Three;
    let dataset = region_dataset(&config);
    let outcome = build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::from_config(&config),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("three-level build");
    assert_eq!(outcome.summary.failed, 0);
    assert_eq!(outcome.summary.enumerated, 6);
    assert!(!outcome.table.is_empty());
    for spec in outcome.table.iter() {
        assert!(spec.lb <= spec.mean && spec.mean <= spec.ub);
        assert!(spec.p >= 0.0 && spec.p <= 1.0);
    }
}

#[test]
fn three_level_configs_reject_moment_estimators() {
    let mut config = region_config(&["EU", "US"], &["FE"], 2);
    config.level = ModelLevel::Three;
    let dataset = region_dataset(&config);
    let err = build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::from_config(&config),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect_err("FE has no three-level form");
    assert_eq!(err.info().code, "unsupported_method");
}
