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

//! Linear blending of several models.

use tracing::info;

use crate::config::BenchConfig;
use crate::dataset::{self, Partition};
use crate::error::{BenchError, Result};
use crate::linalg::{self, LinearFit};
use crate::models::{self, Backend, Recommender, Scorer};
use crate::types::{SparseBinaryMatrix, TopK};

/// Added to the diagonal of the regression's gram matrix, keeps collinear members solvable.
const RIDGE: f64 = 1e-8;

/// Divides the coefficients by their sum, so that they describe the relative contribution of
/// each model. Fails if the sum is zero or not finite.
pub fn normalize_weights(coefficients: &[f64]) -> Result<Vec<f64>> {
    let sum: f64 = coefficients.iter().sum();
    if sum.abs() <= f64::EPSILON || !sum.is_finite() {
        return Err(BenchError::DegenerateEnsemble(sum));
    }
    Ok(coefficients.iter().map(|coefficient| coefficient / sum).collect())
}

struct Blend {
    fit: LinearFit,
    histories: SparseBinaryMatrix,
}

/// Weighted sum of the scores of the members.
struct BlendedScorer<'a> {
    members: Vec<Box<dyn Scorer + 'a>>,
    fit: &'a LinearFit,
}

impl<'a> Scorer for BlendedScorer<'a> {

    fn score(&self, user: u32, item: u32) -> f64 {
        self.relevance(user, item) + self.fit.intercept
    }

    fn relevance(&self, user: u32, item: u32) -> f64 {
        self.members.iter()
            .zip(self.fit.coefficients.iter())
            .map(|(member, coefficient)| coefficient * member.score(user, item))
            .sum()
    }
}

/// Combines models by regressing the observed scores on the scores of the members. The members
/// are fitted on part of the training data, the regression on the remainder. Coefficients are
/// constrained to be non-negative, so the normalised weights lie in [0, 1].
pub struct Ensemble {
    members: Vec<Box<dyn Recommender>>,
    blend_ratio: f64,
    seed: u64,
    backend: Backend,
    blend: Option<Blend>,
}

impl Ensemble {

    pub fn new(config: &BenchConfig, members: Vec<Box<dyn Recommender>>) -> Self {
        Ensemble {
            members,
            blend_ratio: config.blend_ratio,
            seed: config.seed,
            backend: Backend::new(config.num_threads),
            blend: None,
        }
    }

    /// An ensemble over the default roster of models.
    pub fn with_roster(config: &BenchConfig) -> Self {
        Ensemble::new(config, models::roster(config))
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|member| member.name()).collect()
    }

    /// The raw regression coefficients, one per member.
    pub fn coefficients(&self) -> Result<&[f64]> {
        Ok(&self.blend()?.fit.coefficients)
    }

    /// The relative weight of each member, by name.
    pub fn weights(&self) -> Result<Vec<(String, f64)>> {
        let weights = normalize_weights(self.coefficients()?)?;
        Ok(self.members.iter()
            .map(|member| member.name().to_owned())
            .zip(weights.into_iter())
            .collect())
    }

    fn blend(&self) -> Result<&Blend> {
        self.blend.as_ref().ok_or_else(|| BenchError::NotTrained(self.name().to_owned()))
    }

    fn blended_scorer(&self) -> Result<BlendedScorer<'_>> {
        let blend = self.blend()?;
        let members = self.members.iter()
            .map(|member| member.scorer())
            .collect::<Result<Vec<_>>>()?;
        Ok(BlendedScorer { members, fit: &blend.fit })
    }
}

impl Recommender for Ensemble {

    fn name(&self) -> &str {
        "Ensemble"
    }

    fn on_start(&mut self) -> Result<()> {
        self.backend.start();
        for member in self.members.iter_mut() {
            member.on_start()?;
        }
        Ok(())
    }

    fn train(&mut self, data: &Partition) -> Result<()> {

        self.backend.pool(self.name())?;

        if self.members.is_empty() {
            return Err(BenchError::training(self.name(), "the ensemble has no members"));
        }

        let (fit_part, blend_part) = dataset::split_partition(data, self.blend_ratio, self.seed)?;

        let mut columns = Vec::with_capacity(self.members.len());
        for member in self.members.iter_mut() {
            member.train(&fit_part)?;
            columns.push(member.predict_scores(&blend_part)?);
        }

        let fit = linalg::non_negative_least_squares(&columns, &blend_part.scores(), RIDGE)
            .ok_or_else(|| BenchError::training("Ensemble", "cannot regress on the member scores"))?;

        info!("Ensemble intercept {:.4}, coefficients {:?}", fit.intercept, fit.coefficients);

        self.blend = Some(Blend { fit, histories: data.histories() });

        Ok(())
    }

    fn predict_k(&self, data: &Partition, k: usize) -> Result<TopK> {
        let pool = self.backend.pool(self.name())?;
        let scorer = self.blended_scorer()?;
        Ok(models::rank_with(pool, &scorer, &self.blend()?.histories, data, k))
    }

    fn predict_scores(&self, data: &Partition) -> Result<Vec<f64>> {
        self.backend.pool(self.name())?;

        let blend = self.blend()?;
        let mut scores = vec![blend.fit.intercept; data.len()];

        for (member, coefficient) in self.members.iter().zip(blend.fit.coefficients.iter()) {
            for (score, member_score) in scores.iter_mut().zip(member.predict_scores(data)?) {
                *score += coefficient * member_score;
            }
        }

        Ok(scores)
    }

    /// Stops all members, even if stopping one of them fails. The first failure is returned.
    fn on_stop(&mut self) -> Result<()> {
        let mut outcome = Ok(());
        for member in self.members.iter_mut() {
            if let Err(failure) = member.on_stop() {
                if outcome.is_ok() {
                    outcome = Err(failure);
                }
            }
        }
        self.backend.stop();
        outcome
    }

    fn scorer(&self) -> Result<Box<dyn Scorer + '_>> {
        Ok(Box::new(self.blended_scorer()?))
    }
}

#[cfg(test)]
mod tests {

    use super::{normalize_weights, Ensemble};
    use crate::dataset::Partition;
    use crate::error::{BenchError, Result};
    use crate::models::tests::{check_contract, test_config, two_communities};
    use crate::models::{PopularityModel, Recommender, Scorer, SvdModel, SvdParams};
    use crate::types::TopK;

    fn close_enough_to(value: f64, expected: f64) -> bool {
        (value - expected).abs() < 1e-6
    }

    #[test]
    fn equal_coefficients_equal_weights() {
        let weights = normalize_weights(&[2.0, 2.0]).unwrap();
        assert_eq!(weights, vec![0.5, 0.5]);
    }

    #[test]
    fn weights_sum_to_one() {
        let weights = normalize_weights(&[0.3, 1.2, -0.1]).unwrap();
        assert!(close_enough_to(weights.iter().sum::<f64>(), 1.0));
    }

    #[test]
    fn zero_sum_is_degenerate() {
        let result = normalize_weights(&[1.0, -1.0]);
        assert!(matches!(result, Err(BenchError::DegenerateEnsemble(_))));
    }

    /// Predicts `offset` plus the item index, or the user index if `by_user` is set.
    struct IndexStub {
        name: &'static str,
        offset: f64,
        by_user: bool,
    }

    impl Scorer for IndexStub {
        fn score(&self, user: u32, item: u32) -> f64 {
            let index = if self.by_user { user } else { item };
            self.offset + index as f64
        }
    }

    impl Recommender for IndexStub {
        fn name(&self) -> &str { self.name }
        fn on_start(&mut self) -> Result<()> { Ok(()) }
        fn train(&mut self, _data: &Partition) -> Result<()> { Ok(()) }
        fn predict_k(&self, _data: &Partition, _k: usize) -> Result<TopK> { Ok(TopK::new()) }
        fn predict_scores(&self, data: &Partition) -> Result<Vec<f64>> {
            Ok(data.interactions().iter().map(|interaction| self.score(interaction.user, interaction.item)).collect())
        }
        fn on_stop(&mut self) -> Result<()> { Ok(()) }
        fn scorer(&self) -> Result<Box<dyn Scorer + '_>> { Ok(Box::new(self)) }
    }

    #[test]
    fn recovers_linear_target() {
        // Scores equal twice the item index plus one, the single member predicts the item index.
        let data = Partition::new(
            (0..40_u32).map(|n| crate::types::Interaction::new(n % 8, n % 10, 1.0 + 2.0 * (n % 10) as f64)).collect(),
            8, 10);

        let members: Vec<Box<dyn Recommender>> = vec![Box::new(IndexStub { name: "index", offset: 0.0, by_user: false })];
        let mut ensemble = Ensemble::new(&test_config(), members);

        ensemble.on_start().unwrap();
        ensemble.train(&data).unwrap();

        let coefficients = ensemble.coefficients().unwrap();
        assert!(close_enough_to(coefficients[0], 2.0));

        let scores = ensemble.predict_scores(&data).unwrap();
        for (score, interaction) in scores.iter().zip(data.interactions()) {
            assert!(close_enough_to(*score, interaction.score));
        }

        let weights = ensemble.weights().unwrap();
        assert_eq!(weights[0].0, "index");
        assert!(close_enough_to(weights[0].1, 1.0));

        ensemble.on_stop().unwrap();
    }

    #[test]
    fn contract_over_real_models() {
        let config = test_config();
        let members: Vec<Box<dyn Recommender>> = vec![
            Box::new(PopularityModel::new(&config)),
            Box::new(SvdModel::new(&config, SvdParams::default())),
        ];
        let mut ensemble = Ensemble::new(&config, members);

        check_contract(&mut ensemble, &two_communities(), 5);

        let weights = ensemble.weights().unwrap();
        let names: Vec<&str> = weights.iter().map(|(name, _)| name.as_str()).collect();

        assert_eq!(names, vec!["Popularity", "SVD"]);
        assert_eq!(ensemble.member_names(), names);
        assert!(close_enough_to(weights.iter().map(|(_, weight)| weight).sum::<f64>(), 1.0));
        assert!(weights.iter().all(|(_, weight)| (0.0..=1.0).contains(weight)));
    }

    #[test]
    fn anticorrelated_member_gets_zero_weight() {
        // Scores grow with the item index and shrink with the user index.
        let mut interactions = Vec::new();
        for user in 0..8_u32 {
            for item in 0..10_u32 {
                let score = 5.0 + 2.0 * item as f64 - 0.5 * user as f64;
                interactions.push(crate::types::Interaction::new(user, item, score));
            }
        }
        let data = Partition::new(interactions, 8, 10);

        let members: Vec<Box<dyn Recommender>> = vec![
            Box::new(IndexStub { name: "items", offset: 0.0, by_user: false }),
            Box::new(IndexStub { name: "users", offset: 0.0, by_user: true }),
        ];
        let mut ensemble = Ensemble::new(&test_config(), members);

        ensemble.on_start().unwrap();
        ensemble.train(&data).unwrap();

        let coefficients = ensemble.coefficients().unwrap();
        assert!(coefficients[0] > 0.0);
        assert_eq!(coefficients[1], 0.0);

        let weights = ensemble.weights().unwrap();
        assert_eq!(weights[0].0, "items");
        assert!(close_enough_to(weights[0].1, 1.0));
        assert_eq!(weights[1].0, "users");
        assert_eq!(weights[1].1, 0.0);
        assert!(weights.iter().all(|(_, weight)| (0.0..=1.0).contains(weight)));

        ensemble.on_stop().unwrap();
    }

    #[test]
    fn untrained_ensemble_has_no_weights() {
        let ensemble = Ensemble::with_roster(&test_config());
        assert!(matches!(ensemble.weights(), Err(BenchError::NotTrained(_))));
    }
}
