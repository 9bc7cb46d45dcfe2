// =============================================================================
// Market State Identification Module
// =============================================================================
//
// Unsupervised classification of bars into latent market states:
// - Standardization + PCA (2 components)
// - K-means with k-means++ seeding (deterministic per seed)
// - Per-state characteristics and readable descriptions

pub mod description;
pub mod identifier;
pub mod kmeans;
pub mod pca;

pub use identifier::{identify_market_states, FeatureLoading, StateAnalysis, StateCharacteristics};
