//! Label <-> index mapping

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::utils::error::{PipelineError, Result};

/// Bijection between class labels and `0..num_classes`.
///
/// Labels are sorted lexicographically on construction, so the same set of
/// class folders always yields the same indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryIndex {
    labels: Vec<String>,
}

impl CategoryIndex {
    pub fn new(mut labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(PipelineError::EmptyCategoryIndex);
        }
        labels.sort();
        labels.dedup();
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels
            .binary_search_by(|probe| probe.as_str().cmp(label))
            .ok()
    }

    pub fn label_of(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// One-hot vector for `label`, or `None` for an unknown label
    pub fn one_hot(&self, label: &str) -> Option<Vec<f32>> {
        let index = self.index_of(label)?;
        let mut vector = vec![0.0; self.len()];
        vector[index] = 1.0;
        Some(vector)
    }

    /// Label -> index table, the form written to `class_index.json`
    pub fn to_map(&self) -> BTreeMap<String, usize> {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect()
    }

    /// Rebuild from a label -> index table
    pub fn from_map(map: &BTreeMap<String, usize>) -> Result<Self> {
        let index = Self::new(map.keys().cloned().collect())?;
        for (label, &i) in map {
            if index.index_of(label) != Some(i) {
                return Err(PipelineError::Serialization(format!(
                    "class index entry '{}' -> {} is not in sorted order",
                    label, i
                )));
            }
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sorted_and_stable() {
        let a = CategoryIndex::new(labels(&["dogs", "cats", "birds"])).unwrap();
        let b = CategoryIndex::new(labels(&["birds", "dogs", "cats"])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.index_of("birds"), Some(0));
        assert_eq!(a.index_of("cats"), Some(1));
        assert_eq!(a.index_of("dogs"), Some(2));
        assert_eq!(a.label_of(2), Some("dogs"));
        assert_eq!(a.index_of("fish"), None);
    }

    #[test]
    fn test_one_hot_has_single_one() {
        let index = CategoryIndex::new(labels(&["A", "B", "C"])).unwrap();
        for label in index.labels().to_vec() {
            let vector = index.one_hot(&label).unwrap();
            assert_eq!(vector.len(), 3);
            assert_eq!(vector.iter().filter(|&&v| v == 1.0).count(), 1);
            assert_eq!(vector.iter().filter(|&&v| v == 0.0).count(), 2);
            assert_eq!(vector[index.index_of(&label).unwrap()], 1.0);
        }
    }

    #[test]
    fn test_empty_is_error() {
        assert!(matches!(
            CategoryIndex::new(Vec::new()),
            Err(PipelineError::EmptyCategoryIndex)
        ));
    }

    #[test]
    fn test_map_roundtrip() {
        let index = CategoryIndex::new(labels(&["B", "A"])).unwrap();
        let map = index.to_map();
        assert_eq!(map["A"], 0);
        assert_eq!(map["B"], 1);
        assert_eq!(CategoryIndex::from_map(&map).unwrap(), index);
    }
}
