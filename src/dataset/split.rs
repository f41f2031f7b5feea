//! Train/validation splitting
//!
//! The split is stratified by class whenever that is possible, otherwise a
//! seeded random permutation is used. Both paths are deterministic for a
//! given seed.
//!
//! ## Allocation
//!
//! `n_val = ceil(n * fraction)` samples go to validation. In stratified mode
//! each non-empty class receives `count * n_val / n` of them, rounded by largest
//! remainder (ties go to the lower class index), so the per-class totals
//! always add up to exactly `n_val`.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::ImageDataset;
use crate::config::SplitConfig;
use crate::utils::error::{PipelineError, Result};

/// Two disjoint subsets whose union is the input dataset
#[derive(Debug, Clone)]
pub struct SplitResult {
    pub train: ImageDataset,
    pub validation: ImageDataset,
    /// Whether class proportions were preserved
    pub stratified: bool,
}

impl SplitResult {
    pub fn has_validation(&self) -> bool {
        !self.validation.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SplitPlanner {
    fraction: f64,
    seed: u64,
}

impl SplitPlanner {
    pub fn new(config: &SplitConfig) -> Self {
        Self {
            fraction: config.validation_fraction,
            seed: config.seed,
        }
    }

    /// Number of validation samples for a dataset of `n`
    pub fn validation_count(&self, n: usize) -> usize {
        if self.fraction <= 0.0 {
            return 0;
        }
        // The epsilon absorbs representation error such as 20 * 0.2 = 4.000...01.
        let raw = (n as f64 * self.fraction - 1e-9).ceil();
        (raw.max(0.0) as usize).min(n)
    }

    /// Decide, per sample, whether it goes to validation.
    ///
    /// Returns the membership mask and whether stratification was used.
    pub fn plan(&self, dataset: &ImageDataset) -> (Vec<bool>, bool) {
        let n = dataset.len();
        let n_val = self.validation_count(n);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut in_validation = vec![false; n];

        let num_classes = dataset.labels().first().map(Vec::len).unwrap_or(0);
        let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); num_classes];
        for i in 0..n {
            if let Some(class) = dataset.class_of(i) {
                by_class[class].push(i);
            }
        }

        // Classes kept in the index without samples take no part in stratification.
        let populated: Vec<&Vec<usize>> = by_class.iter().filter(|m| !m.is_empty()).collect();
        let stratify = populated.len() >= 2
            && populated.iter().all(|members| members.len() >= 2)
            && n_val >= populated.len()
            && n - n_val >= populated.len();

        if !stratify {
            debug!("Stratification not possible, using a random split");
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rng);
            for &i in order.iter().take(n_val) {
                in_validation[i] = true;
            }
            return (in_validation, false);
        }

        let counts: Vec<usize> = by_class.iter().map(Vec::len).collect();
        let allocation = allocate(&counts, n_val);

        for (members, &take) in by_class.iter_mut().zip(&allocation) {
            members.shuffle(&mut rng);
            for &i in members.iter().take(take) {
                in_validation[i] = true;
            }
        }

        (in_validation, true)
    }

    /// Partition `dataset`, consuming it.
    ///
    /// An empty training subset is an error; an empty validation subset is
    /// not (the caller decides how to run without one).
    pub fn split(&self, dataset: ImageDataset) -> Result<SplitResult> {
        let total = dataset.len();
        let (in_validation, stratified) = self.plan(&dataset);
        let (validation, train) = dataset.partition(&in_validation);

        if train.is_empty() {
            return Err(PipelineError::EmptyTrainingSplit {
                total,
                fraction: self.fraction,
            });
        }

        info!(
            "Split {} samples into {} train / {} validation ({})",
            total,
            train.len(),
            validation.len(),
            if stratified { "stratified" } else { "random" }
        );

        Ok(SplitResult {
            train,
            validation,
            stratified,
        })
    }
}

/// Largest-remainder apportionment of `total` over classes of size `counts`
fn allocate(counts: &[usize], total: usize) -> Vec<usize> {
    let n: usize = counts.iter().sum();
    if n == 0 {
        return vec![0; counts.len()];
    }

    let mut allocation: Vec<usize> = counts.iter().map(|&c| c * total / n).collect();
    let assigned: usize = allocation.iter().sum();

    // Remainder numerators: (c * total) mod n, compared exactly in integers.
    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = counts[a] * total % n;
        let rb = counts[b] * total % n;
        rb.cmp(&ra).then(a.cmp(&b))
    });

    for &class in order.iter().take(total - assigned) {
        allocation[class] += 1;
    }
    allocation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_util::dataset_with_counts;

    fn planner(fraction: f64, seed: u64) -> SplitPlanner {
        SplitPlanner::new(&SplitConfig {
            validation_fraction: fraction,
            seed,
        })
    }

    fn class_counts(dataset: &ImageDataset, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; num_classes];
        for i in 0..dataset.len() {
            counts[dataset.class_of(i).unwrap()] += 1;
        }
        counts
    }

    #[test]
    fn test_validation_count() {
        let p = planner(0.2, 42);
        assert_eq!(p.validation_count(20), 4);
        assert_eq!(p.validation_count(21), 5);
        assert_eq!(p.validation_count(1), 1);
        assert_eq!(p.validation_count(0), 0);
        assert_eq!(planner(0.0, 42).validation_count(50), 0);
    }

    #[test]
    fn test_allocate_largest_remainder() {
        assert_eq!(allocate(&[10, 10], 4), vec![2, 2]);
        assert_eq!(allocate(&[5, 3, 2], 3), vec![1, 1, 1]);
        assert_eq!(allocate(&[1, 1, 1], 2), vec![1, 1, 0]);
        assert_eq!(allocate(&[7, 13], 5).iter().sum::<usize>(), 5);
    }

    #[test]
    fn test_two_balanced_classes() {
        let split = planner(0.2, 42)
            .split(dataset_with_counts(&[10, 10]))
            .unwrap();
        assert!(split.stratified);
        assert_eq!(split.train.len(), 16);
        assert_eq!(split.validation.len(), 4);
        assert_eq!(class_counts(&split.validation, 2), vec![2, 2]);
        assert_eq!(class_counts(&split.train, 2), vec![8, 8]);
    }

    #[test]
    fn test_proportions_preserved() {
        let split = planner(0.25, 7)
            .split(dataset_with_counts(&[40, 20, 20]))
            .unwrap();
        assert_eq!(class_counts(&split.validation, 3), vec![10, 5, 5]);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = planner(0.3, 11).plan(&dataset_with_counts(&[6, 9, 5]));
        let b = planner(0.3, 11).plan(&dataset_with_counts(&[6, 9, 5]));
        assert_eq!(a, b);

        let c = planner(0.3, 12).plan(&dataset_with_counts(&[6, 9, 5]));
        assert_eq!(a.0.iter().filter(|&&v| v).count(), c.0.iter().filter(|&&v| v).count());
    }

    #[test]
    fn test_subsets_disjoint_and_complete() {
        let dataset = dataset_with_counts(&[6, 4]);
        let mut all: Vec<_> = dataset.sources().to_vec();
        let split = planner(0.3, 3).split(dataset).unwrap();

        let mut union: Vec<_> = split
            .train
            .sources()
            .iter()
            .chain(split.validation.sources())
            .cloned()
            .collect();
        all.sort();
        union.sort();
        assert_eq!(all, union);
    }

    #[test]
    fn test_single_sample_class_falls_back_to_random() {
        let split = planner(0.2, 42)
            .split(dataset_with_counts(&[9, 1]))
            .unwrap();
        assert!(!split.stratified);
        assert_eq!(split.train.len() + split.validation.len(), 10);
        assert_eq!(split.validation.len(), 2);
    }

    #[test]
    fn test_retained_empty_class_keeps_stratification() {
        let split = planner(0.2, 42)
            .split(dataset_with_counts(&[10, 0, 10]))
            .unwrap();
        assert!(split.stratified);
        assert_eq!(class_counts(&split.validation, 3), vec![2, 0, 2]);
        assert_eq!(class_counts(&split.train, 3), vec![8, 0, 8]);
    }

    #[test]
    fn test_allocate_skips_empty_classes() {
        assert_eq!(allocate(&[5, 0, 5], 3), vec![2, 0, 1]);
    }

    #[test]
    fn test_single_class_falls_back_to_random() {
        let (_, stratified) = planner(0.2, 42).plan(&dataset_with_counts(&[10]));
        assert!(!stratified);
    }

    #[test]
    fn test_empty_training_split_is_error() {
        let result = planner(0.2, 42).split(dataset_with_counts(&[1]));
        assert!(matches!(
            result,
            Err(PipelineError::EmptyTrainingSplit { total: 1, .. })
        ));
    }

    #[test]
    fn test_zero_fraction_leaves_validation_empty() {
        let split = planner(0.0, 42)
            .split(dataset_with_counts(&[3, 3]))
            .unwrap();
        assert!(!split.has_validation());
        assert_eq!(split.train.len(), 6);
    }
}
