use std::collections::BTreeSet;
use std::path::Path;

use mverse_core::errors::{ErrorInfo, MverseError};
use serde::{Deserialize, Serialize};

use crate::codec::{load_structured, stable_hash_string};

fn config_error(code: &str, message: impl Into<String>) -> ErrorInfo {
    ErrorInfo::new(code, message)
}

/// Column names under which the dataset stores the canonical row fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    /// Cluster display label column.
    pub key_c: String,
    /// Cluster identifier column (generated when absent from the data).
    pub key_c_id: String,
    /// Row (effect) identifier column (generated when absent from the data).
    pub key_e_id: String,
    /// Sample size column.
    #[serde(default = "ColumnMap::default_n")]
    pub key_n: String,
    /// Fisher z effect column.
    #[serde(default = "ColumnMap::default_z")]
    pub key_z: String,
    /// Fisher z standard error column.
    #[serde(default = "ColumnMap::default_z_se")]
    pub key_z_se: String,
    /// Correlation effect column.
    #[serde(default = "ColumnMap::default_r")]
    pub key_r: String,
    /// Correlation standard error column.
    #[serde(default = "ColumnMap::default_r_se")]
    pub key_r_se: String,
}

impl ColumnMap {
    fn default_n() -> String {
        "N".to_string()
    }
    fn default_z() -> String {
        "z".to_string()
    }
    fn default_z_se() -> String {
        "z_se".to_string()
    }
    fn default_r() -> String {
        "r".to_string()
    }
    fn default_r_se() -> String {
        "r_se".to_string()
    }
}

/// Maps estimator roles onto how-factor names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRoles {
    /// How-factor selecting the effect scale (`z` or `r`).
    #[serde(default = "MethodRoles::default_effect")]
    pub effect: String,
    /// How-factor selecting the pooling method.
    #[serde(default = "MethodRoles::default_method")]
    pub method: String,
    /// How-factor selecting the significance test.
    #[serde(default = "MethodRoles::default_test")]
    pub test: String,
}

impl MethodRoles {
    fn default_effect() -> String {
        "effect".to_string()
    }
    fn default_method() -> String {
        "ma_method".to_string()
    }
    fn default_test() -> String {
        "test".to_string()
    }
}

impl Default for MethodRoles {
    fn default() -> Self {
        Self {
            effect: Self::default_effect(),
            method: Self::default_method(),
            test: Self::default_test(),
        }
    }
}

/// Which-factor block of the configuration file, as written by users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhichSection {
    /// Declared number of which-factors.
    pub n: usize,
    /// Factor names (dataset column names).
    pub keys: Vec<String>,
    /// Display labels of the factors.
    pub keys_labels: Vec<String>,
    /// Category values per factor.
    pub values: Vec<Vec<String>>,
    /// Display labels of the category values per factor.
    pub values_labels: Vec<Vec<String>>,
    /// Whether to append the `all_<key>` wildcard per factor.
    pub add_all_values: Vec<bool>,
    /// Display label for wildcard values.
    #[serde(default = "WhichSection::default_all_label")]
    pub all_label: String,
}

impl WhichSection {
    fn default_all_label() -> String {
        "either".to_string()
    }
}

/// How-factor block of the configuration file, as written by users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HowSection {
    /// Declared number of how-factors.
    pub n: usize,
    /// Factor names.
    pub keys: Vec<String>,
    /// Display labels of the factors.
    pub keys_labels: Vec<String>,
    /// Method choices per factor.
    pub values: Vec<Vec<String>>,
    /// Display labels of the choices per factor.
    pub values_labels: Vec<Vec<String>>,
}

/// Unvalidated configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawConfig {
    /// Analysis title.
    pub title: String,
    /// Meta-analysis level, 2 or 3.
    #[serde(default = "RawConfig::default_level")]
    pub level: u32,
    /// Minimum number of rows for a specification to be retained.
    pub k_min: usize,
    /// Number of null bootstrap iterations.
    pub n_boot_iter: usize,
    /// Dataset column mapping.
    pub colmap: ColumnMap,
    /// Which-factors.
    pub which: WhichSection,
    /// How-factors.
    pub how: HowSection,
    /// Estimator role mapping.
    #[serde(default)]
    pub methods: MethodRoles,
    /// Significance level used in filter summaries.
    #[serde(default = "RawConfig::default_alpha")]
    pub alpha: f64,
}

impl RawConfig {
    fn default_level() -> u32 {
        2
    }

    fn default_alpha() -> f64 {
        0.05
    }

    /// Validates the document into a [`MultiverseConfig`].
    pub fn validate(self) -> Result<MultiverseConfig, MverseError> {
        let level = match self.level {
            2 => ModelLevel::Two,
            3 => ModelLevel::Three,
            other => {
                return Err(MverseError::Config(
                    config_error("unsupported_level", "meta-analysis level must be 2 or 3")
                        .with_context("level", other)
                        .with_hint("set `level` to 2 or 3"),
                ));
            }
        };
        if self.k_min == 0 {
            return Err(MverseError::Config(
                config_error("k_min", "k_min must be at least 1").with_context("k_min", 0),
            ));
        }
        if self.n_boot_iter == 0 {
            return Err(MverseError::config(
                "n_boot_iter",
                "n_boot_iter must be at least 1",
            ));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(MverseError::Config(
                config_error("alpha", "alpha must lie strictly between 0 and 1")
                    .with_context("alpha", self.alpha),
            ));
        }

        let which = &self.which;
        check_lengths(
            "which",
            which.n,
            &[
                ("keys", which.keys.len()),
                ("keys_labels", which.keys_labels.len()),
                ("values", which.values.len()),
                ("values_labels", which.values_labels.len()),
                ("add_all_values", which.add_all_values.len()),
            ],
        )?;
        let how = &self.how;
        check_lengths(
            "how",
            how.n,
            &[
                ("keys", how.keys.len()),
                ("keys_labels", how.keys_labels.len()),
                ("values", how.values.len()),
                ("values_labels", how.values_labels.len()),
            ],
        )?;

        let mut which_factors = Vec::with_capacity(which.n);
        for idx in 0..which.n {
            let mut factor = Factor::new(
                FactorKind::Which,
                &which.keys[idx],
                &which.keys_labels[idx],
                &which.values[idx],
                &which.values_labels[idx],
            )?;
            if which.add_all_values[idx] {
                factor.add_wildcard(&which.all_label)?;
            }
            which_factors.push(factor);
        }
        let mut how_factors = Vec::with_capacity(how.n);
        for idx in 0..how.n {
            how_factors.push(Factor::new(
                FactorKind::How,
                &how.keys[idx],
                &how.keys_labels[idx],
                &how.values[idx],
                &how.values_labels[idx],
            )?);
        }

        let mut seen = BTreeSet::new();
        for factor in which_factors.iter().chain(how_factors.iter()) {
            if !seen.insert(factor.name.as_str()) {
                return Err(MverseError::Config(
                    config_error("duplicate_factor", "factor names must be unique")
                        .with_context("factor", &factor.name),
                ));
            }
        }

        Ok(MultiverseConfig {
            title: self.title,
            level,
            k_min: self.k_min,
            n_boot_iter: self.n_boot_iter,
            colmap: self.colmap,
            which: which_factors,
            how: how_factors,
            methods: self.methods,
            alpha: self.alpha,
        })
    }
}

fn check_lengths(section: &str, n: usize, lists: &[(&str, usize)]) -> Result<(), MverseError> {
    for (name, len) in lists {
        if *len != n {
            return Err(MverseError::Config(
                config_error(
                    &format!("{section}_length_mismatch"),
                    format!("configuration of {section}-factors is incorrect"),
                )
                .with_context("list", name)
                .with_context("expected", n)
                .with_context("found", len),
            ));
        }
    }
    Ok(())
}

/// Role of a factor within the specification space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactorKind {
    /// Restricts which dataset rows are included.
    Which,
    /// Selects how the included rows are analysed.
    How,
}

/// One category value of a factor with its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorValue {
    /// Raw value as stored in the dataset or passed to the estimator.
    pub value: String,
    /// Display label (`"<factor label>: <value label>"`).
    pub label: String,
}

/// A validated factor dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Factor {
    /// Factor name.
    pub name: String,
    /// Factor display label.
    pub label: String,
    /// Which or how.
    pub kind: FactorKind,
    /// Ordered values, wildcard last when present.
    pub values: Vec<FactorValue>,
    /// Wildcard sentinel meaning "do not filter on this factor".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<String>,
}

impl Factor {
    fn new(
        kind: FactorKind,
        name: &str,
        label: &str,
        values: &[String],
        values_labels: &[String],
    ) -> Result<Self, MverseError> {
        if values.is_empty() {
            return Err(MverseError::Config(
                config_error("empty_factor", "factor must list at least one value")
                    .with_context("factor", name),
            ));
        }
        if values.len() != values_labels.len() {
            return Err(MverseError::Config(
                config_error("value_labels_mismatch", "values and values_labels differ in length")
                    .with_context("factor", name)
                    .with_context("values", values.len())
                    .with_context("labels", values_labels.len()),
            ));
        }
        let mut factor = Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            values: Vec::with_capacity(values.len() + 1),
            wildcard: None,
        };
        for (value, value_label) in values.iter().zip(values_labels) {
            factor.push_value(value, value_label)?;
        }
        Ok(factor)
    }

    fn push_value(&mut self, value: &str, value_label: &str) -> Result<(), MverseError> {
        if self.values.iter().any(|existing| existing.value == value) {
            return Err(MverseError::Config(
                config_error("duplicate_value", "factor values must be unique")
                    .with_context("factor", &self.name)
                    .with_context("value", value),
            ));
        }
        self.values.push(FactorValue {
            value: value.to_string(),
            label: format!("{}: {}", self.label, value_label),
        });
        Ok(())
    }

    fn add_wildcard(&mut self, all_label: &str) -> Result<(), MverseError> {
        let sentinel = format!("all_{}", self.name);
        self.push_value(&sentinel, all_label)?;
        self.wildcard = Some(sentinel);
        Ok(())
    }

    /// Returns true when `value` is this factor's wildcard sentinel.
    pub fn is_wildcard(&self, value: &str) -> bool {
        self.wildcard.as_deref() == Some(value)
    }

    /// Raw values in configured order.
    pub fn value_strings(&self) -> Vec<String> {
        self.values.iter().map(|v| v.value.clone()).collect()
    }
}

/// Random-effects structure of the meta-analytic model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLevel {
    /// Effects are independent given the summary effect.
    #[default]
    Two,
    /// Effects are nested in clusters, with a between-cluster and a
    /// within-cluster variance component.
    Three,
}

/// Validated multiverse configuration consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiverseConfig {
    /// Analysis title.
    pub title: String,
    /// Model level passed to the estimator.
    pub level: ModelLevel,
    /// Minimum number of rows for a specification to be retained.
    pub k_min: usize,
    /// Number of null bootstrap iterations.
    pub n_boot_iter: usize,
    /// Dataset column mapping.
    pub colmap: ColumnMap,
    /// Which-factors in configured order.
    pub which: Vec<Factor>,
    /// How-factors in configured order.
    pub how: Vec<Factor>,
    /// Estimator role mapping.
    pub methods: MethodRoles,
    /// Significance level used in filter summaries.
    pub alpha: f64,
}

impl MultiverseConfig {
    /// All factors, which-factors first.
    pub fn factors(&self) -> impl Iterator<Item = &Factor> {
        self.which.iter().chain(self.how.iter())
    }

    /// Factor names in table column order.
    pub fn factor_names(&self) -> Vec<String> {
        self.factors().map(|f| f.name.clone()).collect()
    }

    /// Looks up a factor by name.
    pub fn factor(&self, name: &str) -> Option<&Factor> {
        self.factors().find(|f| f.name == name)
    }

    /// Display labels of every factor value, which-factors first.
    pub fn labels(&self) -> Vec<String> {
        self.factors()
            .flat_map(|f| f.values.iter().map(|v| v.label.clone()))
            .collect()
    }

    /// Stable hash of the validated configuration.
    pub fn config_hash(&self) -> Result<String, MverseError> {
        stable_hash_string(self)
    }
}

/// Loads and validates a configuration file (JSON, or YAML by extension).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MultiverseConfig, MverseError> {
    let raw: RawConfig = load_structured(path.as_ref())?;
    raw.validate()
}
