//! Matching thresholds, iteration caps, and their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{RemapError, RemapResult};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_MIN_SIMILARITY: f64 = 0.3;
pub const DEFAULT_FIELD_TOP_K: usize = 10;
pub const DEFAULT_FIELD_ASSIGN_THRESHOLD: f64 = 0.25;
pub const DEFAULT_TIE_MARGIN: f64 = 1e-9;

// Names whose simple form is at most this long are treated as obfuscated.
pub const MAX_OBFUSCATED_NAME_LEN: usize = 2;

// Self field references above this mark a constant/enum-like class.
pub const CONSTANT_CLASS_SELF_REFS: u32 = 50;

// Iteration caps
pub const PROPAGATION_ROUNDS: usize = 5;
pub const REFINEMENT_ROUNDS: usize = 2;
pub const VALIDATION_ROUNDS: usize = 5;

// Acceptance margins over `min_similarity`
pub const ANCHOR_FLOOR: f64 = 0.75;
pub const ANCHOR_MARGIN: f64 = 0.25;
pub const PROPAGATION_MARGIN: f64 = 0.1;
pub const REFINEMENT_MARGIN: f64 = 0.2;

// Refinement and audit limits
pub const LOW_CONFIDENCE: f64 = 0.3;
pub const CONSTANT_CORRECTION_FLOOR: f64 = 0.7;
pub const HEAVY_USE_USERS: usize = 5;
pub const HEAVY_USE_MIN_FIELDS: usize = 3;
pub const SUSPICIOUS_AGREEMENT: f64 = 0.4;

pub const DEFAULT_PLATFORM_PACKAGES: &[&str] = &[
    "java/", "javax/", "sun/", "com/sun/", "jdk/", "org/w3c/", "org/xml/", "org/omg/",
];

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// MatcherConfig
// ---------------------------------------------------------------------------

/// Every tunable used by one matching run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub min_similarity: f64,
    pub field_top_k: usize,
    pub field_assign_threshold: f64,
    pub tie_margin: f64,
    pub max_obfuscated_name_len: usize,
    pub constant_self_refs: u32,
    pub propagation_rounds: usize,
    pub refinement_rounds: usize,
    pub validation_rounds: usize,
    /// Worker threads for extraction and scoring. Zero lets rayon decide.
    pub workers: usize,
    pub platform_packages: Vec<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_similarity: DEFAULT_MIN_SIMILARITY,
            field_top_k: DEFAULT_FIELD_TOP_K,
            field_assign_threshold: DEFAULT_FIELD_ASSIGN_THRESHOLD,
            tie_margin: DEFAULT_TIE_MARGIN,
            max_obfuscated_name_len: MAX_OBFUSCATED_NAME_LEN,
            constant_self_refs: CONSTANT_CLASS_SELF_REFS,
            propagation_rounds: PROPAGATION_ROUNDS,
            refinement_rounds: REFINEMENT_ROUNDS,
            validation_rounds: VALIDATION_ROUNDS,
            workers: 0,
            platform_packages: DEFAULT_PLATFORM_PACKAGES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl MatcherConfig {
    pub fn from_json_str(payload: &str) -> RemapResult<Self> {
        let config: MatcherConfig = serde_json::from_str(payload)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> RemapResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Apply `REMAP_MIN_SIMILARITY`, `REMAP_FIELD_TOP_K` and `REMAP_WORKERS`.
    pub fn with_env_overrides(self) -> RemapResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> RemapResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("REMAP_MIN_SIMILARITY") {
            match raw.trim().parse::<f64>() {
                Ok(v) => self.min_similarity = v,
                Err(e) => warn!("Ignoring REMAP_MIN_SIMILARITY={raw:?}: {e}"),
            }
        }
        if let Some(raw) = lookup("REMAP_FIELD_TOP_K") {
            match raw.trim().parse::<usize>() {
                Ok(v) => self.field_top_k = v,
                Err(e) => warn!("Ignoring REMAP_FIELD_TOP_K={raw:?}: {e}"),
            }
        }
        if let Some(raw) = lookup("REMAP_WORKERS") {
            match raw.trim().parse::<usize>() {
                Ok(v) => self.workers = v,
                Err(e) => warn!("Ignoring REMAP_WORKERS={raw:?}: {e}"),
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> RemapResult<()> {
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(RemapError::Config(format!(
                "min_similarity must be within [0, 1], got {}",
                self.min_similarity
            )));
        }
        if !(0.0..=1.0).contains(&self.field_assign_threshold) {
            return Err(RemapError::Config(format!(
                "field_assign_threshold must be within [0, 1], got {}",
                self.field_assign_threshold
            )));
        }
        if self.field_top_k == 0 {
            return Err(RemapError::Config("field_top_k must be at least 1".into()));
        }
        if self.tie_margin.is_nan() || self.tie_margin < 0.0 {
            return Err(RemapError::Config(format!(
                "tie_margin must be non-negative, got {}",
                self.tie_margin
            )));
        }
        Ok(())
    }

    /// Score an anchor candidate must exceed.
    pub fn anchor_threshold(&self) -> f64 {
        ANCHOR_FLOOR.max(self.min_similarity + ANCHOR_MARGIN)
    }

    pub fn propagation_threshold(&self) -> f64 {
        self.min_similarity + PROPAGATION_MARGIN
    }

    pub fn refinement_threshold(&self) -> f64 {
        self.min_similarity + REFINEMENT_MARGIN
    }

    pub fn is_platform_type(&self, internal_name: &str) -> bool {
        self.platform_packages
            .iter()
            .any(|prefix| internal_name.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.propagation_rounds, 5);
        assert_eq!(config.refinement_rounds, 2);
        assert!((config.anchor_threshold() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn anchor_threshold_tracks_min_similarity() {
        let config = MatcherConfig {
            min_similarity: 0.6,
            ..MatcherConfig::default()
        };
        assert!((config.anchor_threshold() - 0.85).abs() < 1e-12);
        assert!((config.propagation_threshold() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = MatcherConfig::from_json_str(r#"{"min_similarity": 0.45}"#).unwrap();
        assert!((config.min_similarity - 0.45).abs() < 1e-12);
        assert_eq!(config.field_top_k, DEFAULT_FIELD_TOP_K);
        assert_eq!(config.platform_packages.len(), DEFAULT_PLATFORM_PACKAGES.len());
    }

    #[test]
    fn out_of_range_similarity_rejected() {
        let err = MatcherConfig::from_json_str(r#"{"min_similarity": 1.5}"#).unwrap_err();
        assert!(matches!(err, RemapError::Config(_)), "got {err}");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"field_top_k": 3, "workers": 2}}"#).unwrap();
        let config = MatcherConfig::from_file(file.path()).unwrap();
        assert_eq!(config.field_top_k, 3);
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let config = MatcherConfig::default()
            .with_overrides_from(|key| match key {
                "REMAP_MIN_SIMILARITY" => Some("0.5".to_string()),
                "REMAP_FIELD_TOP_K" => Some("not-a-number".to_string()),
                _ => None,
            })
            .unwrap();
        assert!((config.min_similarity - 0.5).abs() < 1e-12);
        assert_eq!(config.field_top_k, DEFAULT_FIELD_TOP_K);
    }

    #[test]
    fn platform_prefixes() {
        let config = MatcherConfig::default();
        assert!(config.is_platform_type("java/lang/String"));
        assert!(config.is_platform_type("com/sun/net/Foo"));
        assert!(!config.is_platform_type("com/example/Foo"));
        assert!(!config.is_platform_type("eb"));
    }

    #[test]
    fn clamp_unit_handles_nan() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
    }
}
