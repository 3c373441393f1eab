//! Decision annotation schema
//!
//! A decision is recorded on a workload as four annotation families:
//! `<domain>/gpu-assigned`, `<domain>/predicate-time`,
//! `<domain>/predicate-gpu-idx-<n>` and `<domain>/predicate-node`.
//! The presence of any of them means the workload has already been decided.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default annotation domain
pub const DEFAULT_ANNOTATION_DOMAIN: &str = "tencent.com";

/// Value written to the assigned marker
pub const ASSIGNED_VALUE: &str = "true";

/// Annotation keys for a given domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeys {
    assigned: String,
    predicate_time: String,
    gpu_index_prefix: String,
    predicate_node: String,
}

impl AnnotationKeys {
    /// Build the key set for an annotation domain
    pub fn new(domain: &str) -> Self {
        let domain = domain.trim_end_matches('/');
        Self {
            assigned: format!("{}/gpu-assigned", domain),
            predicate_time: format!("{}/predicate-time", domain),
            gpu_index_prefix: format!("{}/predicate-gpu-idx-", domain),
            predicate_node: format!("{}/predicate-node", domain),
        }
    }

    pub fn assigned(&self) -> &str {
        &self.assigned
    }

    pub fn predicate_time(&self) -> &str {
        &self.predicate_time
    }

    pub fn predicate_node(&self) -> &str {
        &self.predicate_node
    }

    pub fn gpu_index_prefix(&self) -> &str {
        &self.gpu_index_prefix
    }

    /// Device index key for the container at `container_index`
    pub fn gpu_index(&self, container_index: usize) -> String {
        format!("{}{}", self.gpu_index_prefix, container_index)
    }

    /// Whether `key` belongs to one of the four decision families
    pub fn is_decision_key(&self, key: &str) -> bool {
        key == self.assigned
            || key == self.predicate_time
            || key == self.predicate_node
            || key.starts_with(&self.gpu_index_prefix)
    }

    /// Whether the annotation set already carries a decision
    pub fn has_decision(&self, annotations: &HashMap<String, String>) -> bool {
        annotations.keys().any(|k| self.is_decision_key(k))
    }

    /// Provisional node recorded on a workload, if any
    pub fn provisional_node<'a>(&self, annotations: &'a HashMap<String, String>) -> Option<&'a str> {
        annotations.get(&self.predicate_node).map(String::as_str)
    }

    /// Copy only the decision keys out of an annotation set
    pub fn extract_decision(&self, annotations: &HashMap<String, String>) -> AnnotationDelta {
        let entries = annotations
            .iter()
            .filter(|(k, _)| self.is_decision_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        AnnotationDelta(entries)
    }
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self::new(DEFAULT_ANNOTATION_DOMAIN)
    }
}

/// A set of annotation writes applied as a single merge patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationDelta(BTreeMap<String, String>);

impl AnnotationDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Merge the delta into an annotation map, leaving other keys untouched
    pub fn apply_to(&self, annotations: &mut HashMap<String, String>) {
        for (k, v) in &self.0 {
            annotations.insert(k.clone(), v.clone());
        }
    }

    /// Merge patch body touching only `metadata.annotations`
    pub fn to_merge_patch(&self) -> serde_json::Value {
        serde_json::json!({
            "metadata": {
                "annotations": self.0,
            }
        })
    }
}

impl std::fmt::Display for AnnotationDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl FromIterator<(String, String)> for AnnotationDelta {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys() {
        let keys = AnnotationKeys::default();
        assert_eq!(keys.assigned(), "tencent.com/gpu-assigned");
        assert_eq!(keys.predicate_time(), "tencent.com/predicate-time");
        assert_eq!(keys.predicate_node(), "tencent.com/predicate-node");
        assert_eq!(keys.gpu_index(2), "tencent.com/predicate-gpu-idx-2");
    }

    #[test]
    fn test_custom_domain_trailing_slash() {
        let keys = AnnotationKeys::new("example.io/");
        assert_eq!(keys.assigned(), "example.io/gpu-assigned");
    }

    #[test]
    fn test_is_decision_key() {
        let keys = AnnotationKeys::default();
        assert!(keys.is_decision_key("tencent.com/gpu-assigned"));
        assert!(keys.is_decision_key("tencent.com/predicate-time"));
        assert!(keys.is_decision_key("tencent.com/predicate-node"));
        assert!(keys.is_decision_key("tencent.com/predicate-gpu-idx-0"));
        assert!(!keys.is_decision_key("tencent.com/vcuda-core"));
        assert!(!keys.is_decision_key("other.io/gpu-assigned"));
    }

    #[test]
    fn test_each_key_marks_decision() {
        let keys = AnnotationKeys::default();
        for key in [
            keys.assigned().to_string(),
            keys.predicate_time().to_string(),
            keys.gpu_index(0),
            keys.predicate_node().to_string(),
        ] {
            let mut annotations = HashMap::new();
            annotations.insert("team".to_string(), "vision".to_string());
            assert!(!keys.has_decision(&annotations));
            annotations.insert(key, "x".to_string());
            assert!(keys.has_decision(&annotations));
        }
    }

    #[test]
    fn test_extract_decision_allow_list() {
        let keys = AnnotationKeys::default();
        let mut annotations = HashMap::new();
        annotations.insert(keys.assigned().to_string(), "true".to_string());
        annotations.insert(keys.predicate_node().to_string(), "node-1".to_string());
        annotations.insert(keys.gpu_index(0), "1".to_string());
        annotations.insert("scratch/bookkeeping".to_string(), "42".to_string());

        let delta = keys.extract_decision(&annotations);
        assert_eq!(delta.len(), 3);
        assert_eq!(delta.get("tencent.com/predicate-node"), Some("node-1"));
        assert!(delta.get("scratch/bookkeeping").is_none());
    }

    #[test]
    fn test_apply_delta_merges() {
        let mut annotations = HashMap::new();
        annotations.insert("keep".to_string(), "me".to_string());

        let mut delta = AnnotationDelta::new();
        delta.insert("tencent.com/gpu-assigned", "true");
        delta.apply_to(&mut annotations);

        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations["keep"], "me");
    }

    #[test]
    fn test_merge_patch_body() {
        let mut delta = AnnotationDelta::new();
        delta.insert("tencent.com/predicate-node", "node-1");

        let patch = delta.to_merge_patch();
        assert_eq!(
            patch["metadata"]["annotations"]["tencent.com/predicate-node"],
            "node-1"
        );
    }
}
