//! Snapshot indexing with Rayon-based parallelism.

use std::collections::BTreeMap;
use std::time::Instant;

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::analysis::access::{finish_profiles, scan_class_accesses, FieldAccessProfile, FieldOwners};
use crate::analysis::evidence::{ClassUsage, TypeUsageEvidence};
use crate::analysis::fingerprint::{ClassFingerprint, MethodFingerprint};
use crate::analysis::usage::FieldUsage;
use crate::config::MatcherConfig;
use crate::errors::RemapResult;
use crate::matching::names::NameClassifier;
use crate::models::{ClassNode, FieldKey, MethodKey, Snapshot};

/// Run `op` inside a pool of `workers` threads (rayon's default when zero).
/// Falls back to the global pool if a dedicated one cannot be built.
pub fn with_pool<R, F>(workers: usize, op: F) -> R
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    let mut builder = rayon::ThreadPoolBuilder::new();
    if workers > 0 {
        builder = builder.num_threads(workers);
    }
    match builder.build() {
        Ok(pool) => pool.install(op),
        Err(e) => {
            warn!("Failed to build thread pool, using global pool: {e}");
            op()
        }
    }
}

/// Declaration facts the field resolver needs beyond the key.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub is_static: bool,
    pub is_final: bool,
    /// Index among the owner's declared fields.
    pub position: usize,
    pub owner_field_count: usize,
}

/// Everything the matcher knows about one snapshot.
#[derive(Debug)]
pub struct SnapshotIndex {
    pub fingerprints: IndexMap<String, ClassFingerprint>,
    pub methods: BTreeMap<MethodKey, MethodFingerprint>,
    pub evidence: TypeUsageEvidence,
    pub profiles: BTreeMap<FieldKey, FieldAccessProfile>,
    pub field_usage: FieldUsage,
    pub fields: BTreeMap<FieldKey, FieldInfo>,
}

impl SnapshotIndex {
    pub fn fingerprint(&self, class: &str) -> Option<&ClassFingerprint> {
        self.fingerprints.get(class)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.fingerprints.contains_key(class)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.fingerprints.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Declared fields of `owner`, in declaration order.
    pub fn fields_of<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = (&'a FieldKey, &'a FieldInfo)> {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .filter(move |(key, _)| key.owner == owner)
            .collect();
        fields.sort_by_key(|(_, info)| info.position);
        fields.into_iter()
    }
}

struct ClassExtraction {
    fingerprint: ClassFingerprint,
    methods: Vec<MethodFingerprint>,
    usage: ClassUsage,
    accesses: BTreeMap<FieldKey, FieldAccessProfile>,
    field_refs: Vec<(FieldKey, MethodKey)>,
}

fn extract_class_worker(
    class: &ClassNode,
    owners: &FieldOwners,
    classifier: &NameClassifier,
    config: &MatcherConfig,
) -> RemapResult<ClassExtraction> {
    let methods = class
        .methods
        .iter()
        .map(|m| MethodFingerprint::extract(class, m, classifier))
        .collect::<RemapResult<Vec<_>>>()?;
    Ok(ClassExtraction {
        fingerprint: ClassFingerprint::extract(class, classifier)?,
        methods,
        usage: ClassUsage::scan(class, config)?,
        accesses: scan_class_accesses(class, owners),
        field_refs: FieldUsage::scan_class(class, owners),
    })
}

/// Extract fingerprints, evidence, access profiles and field usage for every
/// class of `snapshot`. Classes are processed in parallel; results are
/// folded in snapshot order so the index is deterministic.
pub fn build_index(snapshot: &Snapshot, config: &MatcherConfig) -> RemapResult<SnapshotIndex> {
    let start = Instant::now();
    let classifier = NameClassifier::new(config.max_obfuscated_name_len);

    let mut fields = BTreeMap::new();
    for class in snapshot.classes() {
        for (position, field) in class.fields.iter().enumerate() {
            fields.insert(
                class.field_key(field),
                FieldInfo {
                    is_static: field.is_static,
                    is_final: field.is_final,
                    position,
                    owner_field_count: class.fields.len(),
                },
            );
        }
    }
    let owners = FieldOwners::from_classes(snapshot.classes());

    let classes: Vec<&ClassNode> = snapshot.classes().collect();
    let extractions = with_pool(config.workers, || {
        classes
            .par_iter()
            .map(|class| extract_class_worker(class, &owners, &classifier, config))
            .collect::<RemapResult<Vec<_>>>()
    })?;

    let mut fingerprints = IndexMap::with_capacity(extractions.len());
    let mut methods = BTreeMap::new();
    let mut usages = Vec::with_capacity(extractions.len());
    let mut partial_profiles = Vec::with_capacity(extractions.len());
    let mut field_refs = Vec::new();
    for extraction in extractions {
        for method in extraction.methods {
            methods.insert(method.key.clone(), method);
        }
        fingerprints.insert(extraction.fingerprint.name.clone(), extraction.fingerprint);
        usages.push(extraction.usage);
        partial_profiles.push(extraction.accesses);
        field_refs.extend(extraction.field_refs);
    }

    let index = SnapshotIndex {
        fingerprints,
        methods,
        evidence: TypeUsageEvidence::from_usages(usages),
        profiles: finish_profiles(owners.declared(), partial_profiles),
        field_usage: FieldUsage::from_refs(field_refs),
        fields,
    };
    info!(
        classes = index.len(),
        fields = index.fields.len(),
        methods = index.methods.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Indexed snapshot"
    );
    Ok(index)
}
