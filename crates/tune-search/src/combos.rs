//! Cartesian sweep over environment variable candidates.

use tune_core::{EnvCombination, EnvVarCandidates, Error, Result};

/// Every combination of candidate values, first variable varying slowest.
///
/// No variables yields a single empty combination. Empty candidate values
/// stand for "unset" and are left out of the produced combination.
pub fn combinations(candidates: &[EnvVarCandidates]) -> Result<Vec<EnvCombination>> {
    if let Some(var) = candidates.iter().find(|v| v.values.is_empty()) {
        return Err(Error::Config(format!(
            "Environment variable {} has no candidate values",
            var.name
        )));
    }

    let products = candidates.iter().fold(vec![Vec::new()], |acc, var| {
        acc.iter()
            .flat_map(|prefix: &Vec<(&str, &str)>| {
                var.values.iter().map(move |value| {
                    let mut pairs = prefix.clone();
                    pairs.push((var.name.as_str(), value.as_str()));
                    pairs
                })
            })
            .collect()
    });

    Ok(products.into_iter().map(EnvCombination::from_pairs).collect())
}
