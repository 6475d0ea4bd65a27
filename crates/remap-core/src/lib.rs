//! Remap core library: cross-version symbol resolution for obfuscated JVM
//! bytecode.
//!
//! Two snapshots of the same program are indexed independently
//! ([`SymbolResolver::index`]), matched class by class
//! ([`SymbolResolver::match_classes`]) and then field by field on top of the
//! class mapping and a caller-supplied method mapping
//! ([`SymbolResolver::match_fields`]). With the `python` feature the crate
//! also builds as the `_remap_core` extension module.

pub mod analysis;
pub mod config;
pub mod descriptor;
pub mod errors;
pub mod matching;
pub mod models;
pub mod opcodes;

#[cfg(test)]
mod test_support;

pub use analysis::pipeline::SnapshotIndex;
pub use config::MatcherConfig;
pub use errors::{RemapError, RemapResult};
pub use matching::fields::{FieldResolution, MethodMapping};
pub use matching::mapping::{ClassMapping, MatchReport};
pub use models::Snapshot;

use analysis::pipeline::build_index;
use matching::classes::ClassMatcher;
use matching::fields::FieldResolver;

/// Entry point tying the stages together under one configuration.
#[derive(Clone, Debug)]
pub struct SymbolResolver {
    config: MatcherConfig,
}

impl SymbolResolver {
    pub fn new(config: MatcherConfig) -> RemapResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Fingerprints, evidence, access profiles and field usage of one snapshot.
    pub fn index(&self, snapshot: &Snapshot) -> RemapResult<SnapshotIndex> {
        build_index(snapshot, &self.config)
    }

    pub fn match_classes(&self, old: &SnapshotIndex, new: &SnapshotIndex) -> RemapResult<MatchReport> {
        ClassMatcher::new(&self.config).match_classes(old, new)
    }

    /// Index both snapshots and match their classes.
    pub fn match_snapshots(&self, old: &Snapshot, new: &Snapshot) -> RemapResult<MatchReport> {
        let old = self.index(old)?;
        let new = self.index(new)?;
        self.match_classes(&old, &new)
    }

    pub fn match_fields(
        &self,
        old: &SnapshotIndex,
        new: &SnapshotIndex,
        classes: &ClassMapping,
        methods: &MethodMapping,
    ) -> RemapResult<FieldResolution> {
        Ok(FieldResolver::new(&self.config, old, new, classes, methods)?.resolve())
    }
}

impl Default for SymbolResolver {
    fn default() -> Self {
        Self {
            config: MatcherConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Python module: _remap_core
// ---------------------------------------------------------------------------

#[cfg(feature = "python")]
mod python {
    use pyo3::prelude::*;
    use pyo3::wrap_pyfunction;

    use crate::config::{MatcherConfig, DEFAULT_FIELD_TOP_K, DEFAULT_MIN_SIMILARITY};
    use crate::models::Snapshot;
    use crate::SymbolResolver;

    /// Match two JSON snapshots and return the match report as JSON.
    #[pyfunction]
    #[pyo3(signature = (old_json, new_json, config_json=None))]
    fn match_classes_json(
        py: Python<'_>,
        old_json: &str,
        new_json: &str,
        config_json: Option<&str>,
    ) -> PyResult<String> {
        let config = match config_json {
            Some(payload) => MatcherConfig::from_json_str(payload)?,
            None => MatcherConfig::default(),
        }
        .with_env_overrides()?;
        let report = py.allow_threads(|| {
            let resolver = SymbolResolver::new(config)?;
            let old = Snapshot::from_json_str(old_json)?;
            let new = Snapshot::from_json_str(new_json)?;
            resolver.match_snapshots(&old, &new)
        })?;
        Ok(serde_json::to_string_pretty(&report).map_err(crate::RemapError::from)?)
    }

    #[pymodule]
    fn _remap_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add("DEFAULT_MIN_SIMILARITY", DEFAULT_MIN_SIMILARITY)?;
        m.add("DEFAULT_FIELD_TOP_K", DEFAULT_FIELD_TOP_K)?;
        m.add_function(wrap_pyfunction!(match_classes_json, m)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn resolver_runs_classes_then_fields() {
        let resolver = SymbolResolver::default();
        let old = Snapshot::new(vec![
            holder("PacketWriter", &["eb"]),
            rich_class("eb", 3),
        ])
        .unwrap();
        let new = Snapshot::new(vec![
            holder("PacketWriter", &["dn"]),
            rich_class("dn", 3),
        ])
        .unwrap();
        let (old, new) = (resolver.index(&old).unwrap(), resolver.index(&new).unwrap());
        let report = resolver.match_classes(&old, &new).unwrap();
        assert_eq!(report.mapping.new_name("eb"), Some("dn"));

        let fields = resolver
            .match_fields(&old, &new, &report.mapping, &MethodMapping::new())
            .unwrap();
        let assigned = fields.assign(resolver.config().field_assign_threshold);
        let writer_field = models::FieldKey::new("PacketWriter", "h0", "Leb;");
        assert_eq!(
            assigned.get(&writer_field),
            Some(&models::FieldKey::new("PacketWriter", "h0", "Ldn;"))
        );
    }

    #[test]
    fn resolver_rejects_bad_config() {
        let config = MatcherConfig {
            field_top_k: 0,
            ..MatcherConfig::default()
        };
        assert!(SymbolResolver::new(config).is_err());
    }
}
