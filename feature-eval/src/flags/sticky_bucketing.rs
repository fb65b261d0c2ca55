use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::errors::FlagError;
use crate::flags::experiment::Experiment;
use crate::flags::flag_matching::EvaluationContext;
use crate::flags::flag_models::DEFAULT_HASH_ATTRIBUTE;
use crate::metrics::consts::STICKY_BUCKET_SAVES_COUNTER;
use crate::metrics::utils::{inc, inc_recovered_error};

/// Persisted variation assignments for one identity, e.g. `id||123`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyAssignmentsDocument {
    pub attribute_name: String,
    pub attribute_value: String,
    /// `experimentKey__bucketVersion` to variation key.
    #[serde(default)]
    pub assignments: BTreeMap<String, String>,
}

impl StickyAssignmentsDocument {
    pub fn key(&self) -> String {
        sticky_bucket_doc_key(&self.attribute_name, &self.attribute_value)
    }
}

pub fn sticky_bucket_doc_key(attribute_name: &str, attribute_value: &str) -> String {
    format!("{attribute_name}||{attribute_value}")
}

pub fn sticky_bucket_experiment_key(experiment_key: &str, bucket_version: u32) -> String {
    format!("{experiment_key}__{bucket_version}")
}

/// Storage for sticky bucket assignment documents.
pub trait StickyBucketService: Send + Sync {
    fn get_assignments(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Result<Option<StickyAssignmentsDocument>, FlagError>;

    fn save_assignments(&self, doc: &StickyAssignmentsDocument) -> Result<(), FlagError>;

    fn get_key(&self, attribute_name: &str, attribute_value: &str) -> String {
        sticky_bucket_doc_key(attribute_name, attribute_value)
    }

    /// Loads the documents for every `attribute -> value` pair, keyed by [`Self::get_key`].
    fn get_all_assignments(
        &self,
        attributes: &BTreeMap<String, String>,
    ) -> Result<HashMap<String, StickyAssignmentsDocument>, FlagError> {
        let mut docs = HashMap::new();
        for (name, value) in attributes {
            if let Some(doc) = self.get_assignments(name, value)? {
                docs.insert(self.get_key(name, value), doc);
            }
        }
        Ok(docs)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStickyBucketService {
    docs: RwLock<HashMap<String, StickyAssignmentsDocument>>,
}

impl InMemoryStickyBucketService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StickyBucketService for InMemoryStickyBucketService {
    fn get_assignments(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Result<Option<StickyAssignmentsDocument>, FlagError> {
        let docs = self
            .docs
            .read()
            .map_err(|e| FlagError::StickyBucketStoreError(e.to_string()))?;
        Ok(docs
            .get(&self.get_key(attribute_name, attribute_value))
            .cloned())
    }

    fn save_assignments(&self, doc: &StickyAssignmentsDocument) -> Result<(), FlagError> {
        let mut docs = self
            .docs
            .write()
            .map_err(|e| FlagError::StickyBucketStoreError(e.to_string()))?;
        docs.insert(doc.key(), doc.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StickyBucketLookup {
    pub variation: Option<usize>,
    pub version_is_blocked: bool,
}

impl EvaluationContext {
    /// Every hash and fallback attribute referenced by a bucketed rule.
    fn derive_sticky_bucket_identifier_attributes(&self) -> Vec<String> {
        let mut attributes = BTreeSet::new();
        for rule in self.features.values().flat_map(|feature| &feature.rules) {
            if !rule.is_experiment() {
                continue;
            }
            attributes.insert(
                rule.hash_attribute
                    .clone()
                    .unwrap_or_else(|| DEFAULT_HASH_ATTRIBUTE.to_string()),
            );
            if let Some(fallback) = &rule.fallback_attribute {
                attributes.insert(fallback.clone());
            }
        }
        attributes.into_iter().collect()
    }

    fn get_sticky_bucket_attributes(&mut self) -> BTreeMap<String, String> {
        if self.using_derived_sticky_bucket_attributes {
            self.sticky_bucket_identifier_attributes =
                Some(self.derive_sticky_bucket_identifier_attributes());
        }

        let Some(identifiers) = &self.sticky_bucket_identifier_attributes else {
            return BTreeMap::new();
        };

        identifiers
            .iter()
            .filter_map(|attribute| {
                let value = self.get_attribute(attribute);
                (!value.is_empty()).then(|| (attribute.clone(), value))
            })
            .collect()
    }

    /// Reloads assignment documents from the store when the identity attributes changed,
    /// or unconditionally with `force`.
    pub fn refresh_sticky_buckets(&mut self, force: bool) {
        let Some(service) = self.sticky_bucket_service.clone() else {
            return;
        };

        let attributes = self.get_sticky_bucket_attributes();
        if !force && self.sticky_bucket_attributes.as_ref() == Some(&attributes) {
            debug!("Skipping refresh of sticky bucket assignments, no changes");
            return;
        }

        self.sticky_bucket_assignment_docs = match service.get_all_assignments(&attributes) {
            Ok(docs) => docs,
            Err(e) => {
                warn!("Failed to load sticky bucket assignments: {}", e);
                inc_recovered_error(&e);
                HashMap::new()
            }
        };
        self.sticky_bucket_attributes = Some(attributes);
    }

    fn assignments_for(&self, attribute: &str) -> Option<&BTreeMap<String, String>> {
        let value = self.get_attribute(attribute);
        self.sticky_bucket_assignment_docs
            .get(&sticky_bucket_doc_key(attribute, &value))
            .map(|doc| &doc.assignments)
    }

    /// Assignments for the hash attribute merged with those of the fallback attribute.
    /// The hash attribute wins on conflicting keys.
    fn get_sticky_bucket_assignments(
        &self,
        hash_attribute: Option<&str>,
        fallback_attribute: Option<&str>,
    ) -> BTreeMap<String, String> {
        let mut merged = self
            .assignments_for(hash_attribute.unwrap_or(DEFAULT_HASH_ATTRIBUTE))
            .cloned()
            .unwrap_or_default();

        if let Some(fallback) = fallback_attribute.and_then(|attr| self.assignments_for(attr)) {
            for (key, variation) in fallback {
                merged
                    .entry(key.clone())
                    .or_insert_with(|| variation.clone());
            }
        }
        merged
    }

    pub(crate) fn get_sticky_bucket_variation(&self, experiment: &Experiment) -> StickyBucketLookup {
        let bucket_version = experiment.bucket_version.unwrap_or(0);
        let min_bucket_version = experiment.min_bucket_version.unwrap_or(0);

        let assignments = self.get_sticky_bucket_assignments(
            experiment.hash_attribute.as_deref(),
            experiment.fallback_attribute.as_deref(),
        );

        if is_blocked(&assignments, &experiment.key, min_bucket_version) {
            return StickyBucketLookup {
                variation: None,
                version_is_blocked: true,
            };
        }

        let variation = assignments
            .get(&sticky_bucket_experiment_key(&experiment.key, bucket_version))
            .and_then(|variation_key| {
                experiment
                    .meta
                    .as_ref()?
                    .iter()
                    .position(|meta| meta.key.as_deref() == Some(variation_key.as_str()))
            });

        StickyBucketLookup {
            variation,
            version_is_blocked: false,
        }
    }

    /// Merges `assignments` into the cached document for the identity. The flag is true
    /// when the merge changed the stored assignments.
    fn generate_sticky_bucket_assignment_doc(
        &self,
        attribute_name: &str,
        attribute_value: &str,
        assignments: BTreeMap<String, String>,
    ) -> (StickyAssignmentsDocument, bool) {
        let existing = self
            .sticky_bucket_assignment_docs
            .get(&sticky_bucket_doc_key(attribute_name, attribute_value))
            .map(|doc| doc.assignments.clone())
            .unwrap_or_default();

        let mut merged = existing.clone();
        merged.extend(assignments);
        // BTreeMap equality matches comparing the sorted-key serializations
        let changed = merged != existing;

        (
            StickyAssignmentsDocument {
                attribute_name: attribute_name.to_string(),
                attribute_value: attribute_value.to_string(),
                assignments: merged,
            },
            changed,
        )
    }

    pub(crate) fn persist_sticky_bucket_assignment(
        &mut self,
        experiment: &Experiment,
        hash_attribute: &str,
        hash_value: &str,
        variation_key: &str,
    ) {
        let Some(service) = self.sticky_bucket_service.clone() else {
            return;
        };

        let assignment = BTreeMap::from([(
            sticky_bucket_experiment_key(&experiment.key, experiment.bucket_version.unwrap_or(0)),
            variation_key.to_string(),
        )]);
        let (doc, changed) =
            self.generate_sticky_bucket_assignment_doc(hash_attribute, hash_value, assignment);
        if !changed {
            return;
        }

        self.sticky_bucket_assignment_docs
            .insert(doc.key(), doc.clone());
        match service.save_assignments(&doc) {
            Ok(()) => inc(STICKY_BUCKET_SAVES_COUNTER, &[], 1),
            Err(e) => {
                warn!("Failed to save sticky bucket assignments for '{}': {}", doc.key(), e);
                inc_recovered_error(&e);
            }
        }
    }
}

/// True when the identity holds an assignment for any version below `min_bucket_version`.
fn is_blocked(
    assignments: &BTreeMap<String, String>,
    experiment_key: &str,
    min_bucket_version: u32,
) -> bool {
    (0..min_bucket_version).any(|version| {
        assignments.contains_key(&sticky_bucket_experiment_key(experiment_key, version))
    })
}
