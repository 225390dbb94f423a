/*
 * RecoBench
 * Copyright (C) 2018 Sebastian Schelter
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

//! Accuracy and ranking metrics for predictions on a validation partition.

use std::collections::BTreeMap;

use fnv::FnvHashSet;

use crate::dataset::Partition;
use crate::error::{BenchError, Result};
use crate::types::TopK;

pub type Metrics = BTreeMap<String, f64>;

/// Names of the metrics computed by `eval_pointwise`, in reporting order.
pub const POINTWISE_METRICS: [&str; 4] = ["rmse", "mae", "rsquared", "exp_var"];

/// Names of the metrics computed by `eval_top`, in reporting order.
pub const TOP_METRICS: [&str; 4] = ["map_at_k", "ndcg_at_k", "precision_at_k", "recall_at_k"];

/// Compares predicted scores with the observed scores of `ground_truth`. `predicted` must hold
/// one score per interaction of `ground_truth`, in the same order.
pub fn eval_pointwise(ground_truth: &Partition, predicted: &[f64]) -> Result<Metrics> {

    let observed = ground_truth.interactions();

    if observed.len() != predicted.len() {
        return Err(BenchError::ShapeMismatch { expected: observed.len(), actual: predicted.len() });
    }

    if observed.is_empty() {
        return Err(BenchError::InsufficientData("no ground truth to evaluate against".to_owned()));
    }

    let n = observed.len() as f64;

    let mean_observed = observed.iter().map(|interaction| interaction.score).sum::<f64>() / n;

    let residuals: Vec<f64> = observed.iter()
        .zip(predicted.iter())
        .map(|(interaction, prediction)| interaction.score - prediction)
        .collect();

    let mean_residual = residuals.iter().sum::<f64>() / n;

    let sum_squared_residuals: f64 = residuals.iter().map(|residual| residual * residual).sum();
    let sum_absolute_residuals: f64 = residuals.iter().map(|residual| residual.abs()).sum();
    let residual_variance: f64 = residuals.iter()
        .map(|residual| (residual - mean_residual).powi(2))
        .sum::<f64>() / n;

    let total_sum_of_squares: f64 = observed.iter()
        .map(|interaction| (interaction.score - mean_observed).powi(2))
        .sum();
    let observed_variance = total_sum_of_squares / n;

    let mut metrics = Metrics::new();
    metrics.insert("rmse".to_owned(), (sum_squared_residuals / n).sqrt());
    metrics.insert("mae".to_owned(), sum_absolute_residuals / n);
    metrics.insert("rsquared".to_owned(),
        explained_fraction(sum_squared_residuals, total_sum_of_squares));
    metrics.insert("exp_var".to_owned(), explained_fraction(residual_variance, observed_variance));

    Ok(metrics)
}

/// `1 - unexplained / total`, with a constant ground truth counting as fully explained only if
/// there is nothing left unexplained.
fn explained_fraction(unexplained: f64, total: f64) -> f64 {
    if total == 0.0 {
        if unexplained == 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - unexplained / total
    }
}

/// Compares predicted top-k lists with the items each user interacted with in `ground_truth`.
/// Metrics are averaged over the users that occur in both the ground truth and the predictions.
pub fn eval_top(ground_truth: &Partition, predicted: &TopK, k: usize) -> Metrics {

    let mut relevant: BTreeMap<u32, FnvHashSet<u32>> = BTreeMap::new();
    for interaction in ground_truth.interactions() {
        relevant.entry(interaction.user).or_insert_with(FnvHashSet::default).insert(interaction.item);
    }

    let mut num_users = 0;
    let mut sum_average_precision = 0.0;
    let mut sum_ndcg = 0.0;
    let mut sum_precision = 0.0;
    let mut sum_recall = 0.0;

    for (user, relevant_items) in relevant.iter() {

        let ranking = match predicted.get(user) {
            Some(ranking) => ranking,
            None => continue,
        };

        num_users += 1;

        let mut hits = 0;
        let mut precision_at_hits = 0.0;
        let mut dcg = 0.0;

        for (position, item) in ranking.iter().take(k).enumerate() {
            if relevant_items.contains(item) {
                hits += 1;
                precision_at_hits += hits as f64 / (position + 1) as f64;
                dcg += discount(position);
            }
        }

        let num_relevant = relevant_items.len();
        let ideal_hits = num_relevant.min(k);
        let idcg: f64 = (0..ideal_hits).map(discount).sum();

        if ideal_hits > 0 {
            sum_average_precision += precision_at_hits / ideal_hits as f64;
        }
        if idcg > 0.0 {
            sum_ndcg += dcg / idcg;
        }
        if k > 0 {
            sum_precision += hits as f64 / k as f64;
        }
        if num_relevant > 0 {
            sum_recall += hits as f64 / num_relevant as f64;
        }
    }

    let average = |sum: f64| if num_users == 0 { 0.0 } else { sum / num_users as f64 };

    let mut metrics = Metrics::new();
    metrics.insert("map_at_k".to_owned(), average(sum_average_precision));
    metrics.insert("ndcg_at_k".to_owned(), average(sum_ndcg));
    metrics.insert("precision_at_k".to_owned(), average(sum_precision));
    metrics.insert("recall_at_k".to_owned(), average(sum_recall));

    metrics
}

#[inline]
fn discount(position: usize) -> f64 {
    1.0 / ((position + 2) as f64).log2()
}

#[cfg(test)]
mod tests {

    use super::{eval_pointwise, eval_top, POINTWISE_METRICS, TOP_METRICS};
    use crate::dataset::Partition;
    use crate::error::BenchError;
    use crate::types::{Interaction, TopK};

    fn close_enough_to(value: f64, expected: f64) -> bool {
        (value - expected).abs() < 1e-4
    }

    fn ground_truth() -> Partition {
        Partition::new(vec![
            Interaction::new(0, 1, 1.0),
            Interaction::new(0, 2, 2.0),
            Interaction::new(1, 0, 3.0),
            Interaction::new(1, 3, 4.0),
        ], 2, 4)
    }

    #[test]
    fn constant_predictions() {
        let metrics = eval_pointwise(&ground_truth(), &[2.5, 2.5, 2.5, 2.5]).unwrap();

        assert!(close_enough_to(metrics["rmse"], 1.25_f64.sqrt()));
        assert!(close_enough_to(metrics["mae"], 1.0));
        assert!(close_enough_to(metrics["rsquared"], 0.0));
        assert!(close_enough_to(metrics["exp_var"], 0.0));

        for name in POINTWISE_METRICS.iter() {
            assert!(metrics.contains_key(*name));
        }
    }

    #[test]
    fn perfect_predictions() {
        let metrics = eval_pointwise(&ground_truth(), &[1.0, 2.0, 3.0, 4.0]).unwrap();

        assert!(close_enough_to(metrics["rmse"], 0.0));
        assert!(close_enough_to(metrics["rsquared"], 1.0));
    }

    #[test]
    fn shifted_predictions_explain_all_variance() {
        let metrics = eval_pointwise(&ground_truth(), &[2.0, 3.0, 4.0, 5.0]).unwrap();

        assert!(close_enough_to(metrics["rmse"], 1.0));
        assert!(close_enough_to(metrics["exp_var"], 1.0));
        assert!(close_enough_to(metrics["rsquared"], 1.0 - 4.0 / 5.0));
    }

    #[test]
    fn length_mismatch() {
        let result = eval_pointwise(&ground_truth(), &[1.0]);
        assert!(matches!(result, Err(BenchError::ShapeMismatch { expected: 4, actual: 1 })));
    }

    #[test]
    fn ranking_metrics() {
        let mut predicted = TopK::new();
        predicted.insert(0, vec![1, 3, 2]);
        predicted.insert(1, vec![2, 1, 0]);

        let metrics = eval_top(&ground_truth(), &predicted, 3);

        // user 0: hits at ranks 1 and 3, user 1: hit at rank 3
        let ndcg_0 = (1.0 + 0.5) / (1.0 + 1.0 / 3f64.log2());
        let ndcg_1 = 0.5 / (1.0 + 1.0 / 3f64.log2());

        assert!(close_enough_to(metrics["precision_at_k"], (2.0 / 3.0 + 1.0 / 3.0) / 2.0));
        assert!(close_enough_to(metrics["recall_at_k"], (1.0 + 0.5) / 2.0));
        assert!(close_enough_to(metrics["ndcg_at_k"], (ndcg_0 + ndcg_1) / 2.0));
        assert!(close_enough_to(metrics["map_at_k"], ((1.0 + 2.0 / 3.0) / 2.0 + (1.0 / 3.0) / 2.0) / 2.0));

        for name in TOP_METRICS.iter() {
            assert!(metrics.contains_key(*name));
        }
    }

    #[test]
    fn users_without_predictions_are_ignored() {
        let mut predicted = TopK::new();
        predicted.insert(0, vec![1, 2]);

        let metrics = eval_top(&ground_truth(), &predicted, 2);

        assert!(close_enough_to(metrics["precision_at_k"], 1.0));
        assert!(close_enough_to(metrics["ndcg_at_k"], 1.0));
    }

    #[test]
    fn deterministic() {
        let mut predicted = TopK::new();
        predicted.insert(0, vec![2, 0]);
        predicted.insert(1, vec![3]);

        assert_eq!(eval_top(&ground_truth(), &predicted, 2), eval_top(&ground_truth(), &predicted, 2));

        let scores = [0.3, 1.7, 2.9, 4.4];
        assert_eq!(eval_pointwise(&ground_truth(), &scores).unwrap(),
                   eval_pointwise(&ground_truth(), &scores).unwrap());
    }
}
