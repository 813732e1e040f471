use serde::{Deserialize, Serialize};

use crate::config::MultiverseConfig;

/// Ordered factor dimensions, which-factors first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorSpace {
    names: Vec<String>,
    lists: Vec<Vec<String>>,
    n_which: usize,
}

/// One element of the cartesian product, values aligned with
/// [`FactorSpace::names`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combination {
    /// Position in enumeration order.
    pub index: usize,
    /// Factor values, which-factors then how-factors.
    pub values: Vec<String>,
}

impl Combination {
    /// Values of the which-factors.
    pub fn which_values(&self, space: &FactorSpace) -> &[String] {
        &self.values[..space.n_which]
    }

    /// Values of the how-factors.
    pub fn how_values(&self, space: &FactorSpace) -> &[String] {
        &self.values[space.n_which..]
    }
}

impl FactorSpace {
    /// Builds the space from explicit `(name, values)` lists.
    pub fn new(which: Vec<(String, Vec<String>)>, how: Vec<(String, Vec<String>)>) -> Self {
        let n_which = which.len();
        let (names, lists) = which.into_iter().chain(how).unzip();
        Self {
            names,
            lists,
            n_which,
        }
    }

    /// Builds the space from a validated configuration.
    pub fn from_config(config: &MultiverseConfig) -> Self {
        let to_lists = |factors: &[crate::config::Factor]| {
            factors
                .iter()
                .map(|f| (f.name.clone(), f.value_strings()))
                .collect::<Vec<_>>()
        };
        Self::new(to_lists(&config.which), to_lists(&config.how))
    }

    /// Factor names in column order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of which-factors (the column split point).
    pub fn n_which(&self) -> usize {
        self.n_which
    }

    /// Number of combinations, the product of all list lengths.
    pub fn size(&self) -> usize {
        self.lists.iter().map(Vec::len).product()
    }

    /// Enumerates the full cartesian product; the last factor varies fastest.
    pub fn combinations(&self) -> Vec<Combination> {
        let mut outputs = Vec::with_capacity(self.size());
        expand(
            &self.lists,
            0,
            &mut Vec::with_capacity(self.lists.len()),
            &mut outputs,
        );
        outputs
    }
}

fn expand(
    lists: &[Vec<String>],
    idx: usize,
    current: &mut Vec<String>,
    outputs: &mut Vec<Combination>,
) {
    if idx == lists.len() {
        outputs.push(Combination {
            index: outputs.len(),
            values: current.clone(),
        });
        return;
    }
    for value in &lists[idx] {
        current.push(value.clone());
        expand(lists, idx + 1, current, outputs);
        current.pop();
    }
}
