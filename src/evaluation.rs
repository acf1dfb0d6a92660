//! Top-k ranking evaluation.
//!
//! Ratings for each evaluated user come from the model's dense rating
//! matrix with training positives masked to negative infinity, so known
//! interactions never occupy a recommendation slot. Metrics are averaged
//! over users that have at least one held-out positive.

use std::fmt;

use crate::error::{Error, Result};
use crate::graph::{InMemoryDataset, InteractionDataset};
use crate::model::PairwiseModel;

/// Accumulated top-k metrics over a set of evaluated users.
#[derive(Debug, Clone, PartialEq)]
pub struct TopKMetrics {
    k: usize,
    num_users: usize,
    sum_recall: f64,
    sum_precision: f64,
    sum_ndcg: f64,
}

impl TopKMetrics {
    /// Empty accumulator for cutoff `k`.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            num_users: 0,
            sum_recall: 0.0,
            sum_precision: 0.0,
            sum_ndcg: 0.0,
        }
    }

    /// Cutoff.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of users accumulated.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Mean recall@k.
    pub fn recall(&self) -> f64 {
        self.mean(self.sum_recall)
    }

    /// Mean precision@k.
    pub fn precision(&self) -> f64 {
        self.mean(self.sum_precision)
    }

    /// Mean NDCG@k.
    pub fn ndcg(&self) -> f64 {
        self.mean(self.sum_ndcg)
    }

    fn mean(&self, sum: f64) -> f64 {
        if self.num_users == 0 {
            0.0
        } else {
            sum / self.num_users as f64
        }
    }

    /// Accumulate one user given the ranked recommendation list and the
    /// held-out positives.
    pub fn add_user(&mut self, ranked: &[u32], relevant: &[u32]) {
        if relevant.is_empty() {
            return;
        }
        let top = &ranked[..ranked.len().min(self.k)];
        let mut hits = 0usize;
        let mut dcg = 0.0f64;
        for (pos, item) in top.iter().enumerate() {
            if relevant.contains(item) {
                hits += 1;
                dcg += 1.0 / ((pos + 2) as f64).log2();
            }
        }
        let ideal_len = relevant.len().min(self.k);
        let idcg: f64 = (0..ideal_len).map(|p| 1.0 / ((p + 2) as f64).log2()).sum();

        self.sum_recall += hits as f64 / relevant.len() as f64;
        self.sum_precision += hits as f64 / self.k as f64;
        self.sum_ndcg += dcg / idcg;
        self.num_users += 1;
    }

    /// Fold another accumulator with the same cutoff into this one.
    pub fn merge(&mut self, other: &TopKMetrics) -> Result<()> {
        if other.k != self.k {
            return Err(Error::DimensionMismatch {
                expected: self.k,
                got: other.k,
            });
        }
        self.num_users += other.num_users;
        self.sum_recall += other.sum_recall;
        self.sum_precision += other.sum_precision;
        self.sum_ndcg += other.sum_ndcg;
        Ok(())
    }
}

impl fmt::Display for TopKMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recall@{k} = {:.4}, precision@{k} = {:.4}, ndcg@{k} = {:.4} ({} users)",
            self.recall(),
            self.precision(),
            self.ndcg(),
            self.num_users,
            k = self.k
        )
    }
}

fn positives_by_user(dataset: &InMemoryDataset) -> Vec<Vec<u32>> {
    let mut by_user = vec![Vec::new(); dataset.num_users()];
    for &(u, i) in dataset.interactions() {
        by_user[u as usize].push(i);
    }
    for items in &mut by_user {
        items.sort_unstable();
        items.dedup();
    }
    by_user
}

/// Evaluate a model: rank the full catalog for every user with held-out
/// positives, mask training positives, and accumulate top-k metrics.
///
/// `batch_size` bounds the rating matrix slice held in memory at once.
pub fn evaluate_topk<M: PairwiseModel>(
    model: &M,
    train: &InMemoryDataset,
    test: &InMemoryDataset,
    k: usize,
    batch_size: usize,
) -> Result<TopKMetrics> {
    if k == 0 || batch_size == 0 {
        return Err(Error::InvalidConfig(
            "k and batch_size must be > 0".into(),
        ));
    }
    let train_pos = positives_by_user(train);
    let test_pos = positives_by_user(test);
    let eval_users: Vec<u32> = test_pos
        .iter()
        .enumerate()
        .filter(|(_, items)| !items.is_empty())
        .map(|(u, _)| u as u32)
        .collect();

    let mut metrics = TopKMetrics::new(k);
    for chunk in eval_users.chunks(batch_size) {
        let ratings = model.users_rating(chunk)?.to_vec2::<f32>()?;
        for (row, &u) in ratings.iter().zip(chunk.iter()) {
            let mut scores = row.clone();
            for &seen in &train_pos[u as usize] {
                scores[seen as usize] = f32::NEG_INFINITY;
            }
            let mut order: Vec<u32> = (0..scores.len() as u32).collect();
            order.sort_by(|&a, &b| {
                scores[b as usize]
                    .partial_cmp(&scores[a as usize])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            order.truncate(k);
            metrics.add_user(&order, &test_pos[u as usize]);
        }
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_ranking() {
        let mut metrics = TopKMetrics::new(2);
        metrics.add_user(&[3, 1], &[3, 1]);
        assert!((metrics.recall() - 1.0).abs() < 1e-12);
        assert!((metrics.precision() - 1.0).abs() < 1e-12);
        assert!((metrics.ndcg() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_hits() {
        let mut metrics = TopKMetrics::new(3);
        metrics.add_user(&[0, 1, 2], &[4]);
        assert_eq!(metrics.recall(), 0.0);
        assert_eq!(metrics.precision(), 0.0);
        assert_eq!(metrics.ndcg(), 0.0);
    }

    #[test]
    fn test_partial_hit_at_second_slot() {
        let mut metrics = TopKMetrics::new(2);
        metrics.add_user(&[5, 3], &[3, 7]);

        assert!((metrics.recall() - 0.5).abs() < 1e-12);
        assert!((metrics.precision() - 0.5).abs() < 1e-12);
        // dcg = 1/log2(3); idcg = 1/log2(2) + 1/log2(3)
        let dcg = 1.0 / 3f64.log2();
        let idcg = 1.0 + 1.0 / 3f64.log2();
        assert!((metrics.ndcg() - dcg / idcg).abs() < 1e-12);
    }

    #[test]
    fn test_users_without_positives_skipped() {
        let mut metrics = TopKMetrics::new(2);
        metrics.add_user(&[0, 1], &[]);
        assert_eq!(metrics.num_users(), 0);
        assert_eq!(metrics.recall(), 0.0);
    }

    #[test]
    fn test_merge_accumulates() {
        let mut a = TopKMetrics::new(2);
        a.add_user(&[3, 1], &[3, 1]);
        let mut b = TopKMetrics::new(2);
        b.add_user(&[0, 1], &[4]);
        a.merge(&b).unwrap();

        assert_eq!(a.num_users(), 2);
        assert!((a.recall() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_merge_rejects_cutoff_mismatch() {
        let mut a = TopKMetrics::new(2);
        let b = TopKMetrics::new(5);
        assert!(a.merge(&b).is_err());
    }
}
