// =============================================================================
// Market State Identifier
// =============================================================================
//
// standardize -> PCA(2) -> k-means -> per-state characteristics.
//
// The whole feature matrix is standardized and projected at once, so state
// ids are only comparable within one run. Re-running on the same matrix with
// the same seed reproduces the same assignment.
// =============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, AnalysisResult};
use crate::features::{FeatureMatrix, FeatureVector};
use crate::types::StateFeature;

use super::description::describe_state;
use super::kmeans::KMeans;
use super::pca::{Pca, Standardizer};

pub const N_COMPONENTS: usize = 2;

/// Mean feature values and PCA coordinates of the bars assigned to a state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateCharacteristics {
    pub volatility: f64,
    pub trend_strength: f64,
    pub volume_ratio: f64,
    pub return_dispersion: f64,
    pub component_1: f64,
    pub component_2: f64,
    pub bars: usize,
}

impl StateCharacteristics {
    pub fn feature(&self, feature: StateFeature) -> f64 {
        match feature {
            StateFeature::Volatility => self.volatility,
            StateFeature::TrendStrength => self.trend_strength,
            StateFeature::VolumeRatio => self.volume_ratio,
            StateFeature::ReturnDispersion => self.return_dispersion,
        }
    }

    pub fn features(&self) -> FeatureVector {
        FeatureVector {
            volatility: self.volatility,
            trend_strength: self.trend_strength,
            volume_ratio: self.volume_ratio,
            return_dispersion: self.return_dispersion,
        }
    }
}

/// First-component loading of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureLoading {
    pub feature: StateFeature,
    pub loading: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateAnalysis {
    pub requested_states: usize,
    /// Clusters actually formed; lower than requested on degenerate input.
    pub effective_states: usize,
    /// State id per bar.
    pub assignments: Vec<usize>,
    /// Only states with at least one bar appear.
    pub characteristics: BTreeMap<usize, StateCharacteristics>,
    pub descriptions: BTreeMap<usize, String>,
    pub current_state: usize,
    pub current_characteristics: StateCharacteristics,
    /// PCA coordinates per bar.
    pub projection: Vec<[f64; N_COMPONENTS]>,
    pub explained_variance_ratio: [f64; N_COMPONENTS],
    /// Sorted by absolute loading, largest first.
    pub feature_importance: Vec<FeatureLoading>,
    /// Bar indices whose state differs from the previous bar.
    pub transitions: Vec<usize>,
}

impl StateAnalysis {
    pub fn description(&self, state: usize) -> Option<&str> {
        self.descriptions.get(&state).map(String::as_str)
    }

    pub fn current_description(&self) -> Option<&str> {
        self.description(self.current_state)
    }
}

/// Cluster the bars of `features` into at most `n_states` states.
pub fn identify_market_states(
    symbol: &str,
    features: &FeatureMatrix,
    n_states: usize,
    seed: u64,
) -> AnalysisResult<StateAnalysis> {
    if n_states == 0 {
        return Err(AnalysisError::invalid_config("n_states must be >= 1"));
    }
    let n = features.len();
    if n < 2 {
        return Err(AnalysisError::no_data(
            symbol,
            format!("state identification needs at least 2 bars, got {n}"),
        ));
    }

    let raw = features.to_array();
    let (_, scaled) = Standardizer::fit_transform(&raw);
    let pca = Pca::fit(&scaled, N_COMPONENTS);
    let projected = pca.transform(&scaled);

    let fit = KMeans::new(n_states, seed).fit(&projected);
    debug!(
        symbol,
        eigenvalues = ?pca.explained_variance.to_vec(),
        iterations = fit.iterations,
        inertia = format!("{:.4}", fit.inertia),
        "k-means converged"
    );
    if fit.n_clusters < n_states {
        warn!(
            symbol,
            requested = n_states,
            effective = fit.n_clusters,
            "fewer non-empty clusters than states; reducing state count"
        );
    }

    let projection: Vec<[f64; N_COMPONENTS]> = projected
        .rows()
        .into_iter()
        .map(|r| [r[0], r.get(1).copied().unwrap_or(0.0)])
        .collect();

    let characteristics = characterize(features.rows(), &projection, &fit.labels);
    let overall = overall_means(features.rows());
    let descriptions = characteristics
        .iter()
        .map(|(state, ch)| (*state, describe_state(ch, &overall)))
        .collect();

    let assignments = fit.labels;
    let current_state = assignments.last().copied().unwrap_or(0);
    let effective_states = characteristics.len();
    let current_characteristics = characteristics
        .get(&current_state)
        .copied()
        .ok_or_else(|| AnalysisError::no_data(symbol, "current state has no bars"))?;

    let transitions = assignments
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] != w[1])
        .map(|(i, _)| i + 1)
        .collect();

    let mut feature_importance: Vec<FeatureLoading> = StateFeature::ALL
        .iter()
        .map(|&feature| FeatureLoading {
            feature,
            loading: pca.components[[0, feature.index()]],
        })
        .collect();
    feature_importance.sort_by(|a, b| {
        b.loading
            .abs()
            .partial_cmp(&a.loading.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut explained_variance_ratio = [0.0; N_COMPONENTS];
    for (slot, v) in explained_variance_ratio
        .iter_mut()
        .zip(pca.explained_variance_ratio.iter())
    {
        *slot = *v;
    }

    info!(
        symbol,
        bars = n,
        states = effective_states,
        current_state,
        current_trend = format!("{:.4}", current_characteristics.trend_strength),
        explained_variance = format!("{:.3}", explained_variance_ratio.iter().sum::<f64>()),
        "market states identified"
    );

    Ok(StateAnalysis {
        requested_states: n_states,
        effective_states,
        assignments,
        characteristics,
        descriptions,
        current_state,
        current_characteristics,
        projection,
        explained_variance_ratio,
        feature_importance,
        transitions,
    })
}

fn characterize(
    rows: &[FeatureVector],
    projection: &[[f64; N_COMPONENTS]],
    labels: &[usize],
) -> BTreeMap<usize, StateCharacteristics> {
    let mut acc: BTreeMap<usize, StateCharacteristics> = BTreeMap::new();
    for ((row, coords), &label) in rows.iter().zip(projection).zip(labels) {
        let entry = acc.entry(label).or_insert(StateCharacteristics {
            volatility: 0.0,
            trend_strength: 0.0,
            volume_ratio: 0.0,
            return_dispersion: 0.0,
            component_1: 0.0,
            component_2: 0.0,
            bars: 0,
        });
        entry.volatility += row.volatility;
        entry.trend_strength += row.trend_strength;
        entry.volume_ratio += row.volume_ratio;
        entry.return_dispersion += row.return_dispersion;
        entry.component_1 += coords[0];
        entry.component_2 += coords[1];
        entry.bars += 1;
    }

    for ch in acc.values_mut() {
        let n = ch.bars as f64;
        ch.volatility /= n;
        ch.trend_strength /= n;
        ch.volume_ratio /= n;
        ch.return_dispersion /= n;
        ch.component_1 /= n;
        ch.component_2 /= n;
    }
    acc
}

fn overall_means(rows: &[FeatureVector]) -> FeatureVector {
    let n = rows.len().max(1) as f64;
    let mut out = FeatureVector::default();
    for r in rows {
        out.volatility += r.volatility;
        out.trend_strength += r.trend_strength;
        out.volume_ratio += r.volume_ratio;
        out.return_dispersion += r.return_dispersion;
    }
    out.volatility /= n;
    out.trend_strength /= n;
    out.volume_ratio /= n;
    out.return_dispersion /= n;
    out
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::extract_features;
    use crate::market_data::series::fixtures;

    #[test]
    fn labels_cover_every_bar_and_stay_in_range() {
        let features = extract_features(&fixtures::wave(200));
        for n_states in 2..=5 {
            let analysis = identify_market_states("TEST", &features, n_states, 42).unwrap();
            assert_eq!(analysis.assignments.len(), 200);
            assert_eq!(analysis.effective_states, n_states);
            assert!(analysis.assignments.iter().all(|s| *s < n_states));
            let total: usize = analysis.characteristics.values().map(|c| c.bars).sum();
            assert_eq!(total, 200);
        }
    }

    #[test]
    fn identical_inputs_give_identical_assignments() {
        let features = extract_features(&fixtures::wave(180));
        let a = identify_market_states("TEST", &features, 3, 42).unwrap();
        let b = identify_market_states("TEST", &features, 3, 42).unwrap();
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.characteristics, b.characteristics);
        assert_eq!(a.effective_states, a.characteristics.len());
        let ids: Vec<usize> = a.characteristics.keys().copied().collect();
        assert_eq!(ids, (0..a.effective_states).collect::<Vec<_>>());
    }

    #[test]
    fn flat_series_degrades_without_error() {
        // Flat closes: only volume_ratio varies (0 during warm-up, 1 after).
        let features = extract_features(&fixtures::flat(150));
        let analysis = identify_market_states("FLAT", &features, 4, 42).unwrap();
        assert_eq!(analysis.requested_states, 4);
        assert_eq!(analysis.effective_states, 2);
        assert_eq!(analysis.characteristics.len(), 2);
        assert!(analysis.assignments.iter().all(|s| *s < 2));
        assert_eq!(analysis.transitions.len(), 1);
        assert_eq!(analysis.transitions[0], 49);
    }

    #[test]
    fn current_state_follows_last_bar() {
        let features = extract_features(&fixtures::uptrend(200));
        let analysis = identify_market_states("UP", &features, 3, 42).unwrap();
        let last = *analysis.assignments.last().unwrap();
        assert_eq!(analysis.current_state, last);
        assert_eq!(analysis.current_characteristics, analysis.characteristics[&last]);
        assert!(analysis.current_characteristics.trend_strength > 0.0);
        assert!(analysis.current_description().is_some());
    }

    #[test]
    fn zero_states_is_invalid() {
        let features = extract_features(&fixtures::wave(60));
        let err = identify_market_states("TEST", &features, 0, 42).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfiguration(_)));
    }

    #[test]
    fn single_bar_is_no_data() {
        let features = FeatureMatrix::from_rows(vec![FeatureVector::default()]);
        let err = identify_market_states("ONE", &features, 2, 42).unwrap_err();
        assert!(matches!(err, AnalysisError::NoDataAvailable { .. }));
    }

    #[test]
    fn importance_is_sorted_and_variance_ratios_bounded() {
        let features = extract_features(&fixtures::wave(200));
        let analysis = identify_market_states("TEST", &features, 3, 42).unwrap();
        assert_eq!(analysis.feature_importance.len(), 4);
        for pair in analysis.feature_importance.windows(2) {
            assert!(pair[0].loading.abs() >= pair[1].loading.abs());
        }
        let total: f64 = analysis.explained_variance_ratio.iter().sum();
        assert!(total > 0.0 && total <= 1.0 + 1e-9);
        assert!(analysis.explained_variance_ratio[0] >= analysis.explained_variance_ratio[1]);
    }
}
