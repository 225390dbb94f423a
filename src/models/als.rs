/**
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

use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use scoped_pool::Pool;
use tracing::debug;

use super::{check_loss, Factors, Recommender, Scorer, Session};
use crate::config::BenchConfig;
use crate::dataset::Partition;
use crate::error::{BenchError, Result};
use crate::linalg;
use crate::types::TopK;

/// Number of factor rows solved by a single task of the worker pool.
const ROWS_PER_TASK: usize = 32;

#[derive(Clone, Debug)]
pub struct AlsParams {
    pub factors: usize,
    pub iterations: usize,
    /// Weighted lambda regularisation, scaled by the number of ratings of a user or item.
    pub regularization: f64,
    pub init_scale: f64,
}

impl Default for AlsParams {
    fn default() -> Self {
        AlsParams {
            factors: 10,
            iterations: 15,
            regularization: 0.05,
            init_scale: 0.1,
        }
    }
}

/// Alternating least squares for explicit ratings. The ratings are centred around their mean,
/// user and item factors are then solved for in turn, with the rows of one side solved in
/// parallel on the worker pool.
pub struct AlsModel {
    params: AlsParams,
    seed: u64,
    session: Session<Factors>,
}

impl AlsModel {
    pub fn new(config: &BenchConfig, params: AlsParams) -> Self {
        AlsModel { params, seed: config.seed, session: Session::new("ALS", config.num_threads) }
    }
}

/// Recomputes all rows of `target` while keeping the factors of the other side fixed. Rows
/// without ratings are set to zero.
fn solve_side(
    pool: &Pool,
    fixed: &Array2<f64>,
    ratings: &[Vec<(u32, f64)>],
    global_mean: f64,
    regularization: f64,
    target: &mut Array2<f64>,
) -> bool {

    let dimensions = fixed.ncols();
    let failed = AtomicBool::new(false);

    pool.scoped(|scope| {
        for (mut rows, ratings_of_task) in target.axis_chunks_iter_mut(Axis(0), ROWS_PER_TASK)
            .zip(ratings.chunks(ROWS_PER_TASK)) {

            let failed = &failed;

            scope.execute(move || {
                for (mut row, row_ratings) in rows.outer_iter_mut().zip(ratings_of_task.iter()) {

                    if row_ratings.is_empty() {
                        row.iter_mut().for_each(|value| *value = 0.0);
                        continue;
                    }

                    let mut a = Array2::<f64>::zeros((dimensions, dimensions));
                    let mut b = Array1::<f64>::zeros(dimensions);

                    for (other, score) in row_ratings.iter() {
                        let other_factors = fixed.row(*other as usize);
                        for i in 0..dimensions {
                            b[i] += (score - global_mean) * other_factors[i];
                            for j in 0..dimensions {
                                a[[i, j]] += other_factors[i] * other_factors[j];
                            }
                        }
                    }

                    let lambda = regularization * row_ratings.len() as f64;
                    for i in 0..dimensions {
                        a[[i, i]] += lambda;
                    }

                    match linalg::cholesky_solve(&a, &b) {
                        Some(solution) => row.assign(&solution),
                        None => failed.store(true, Ordering::Relaxed),
                    }
                }
            });
        }
    });

    !failed.load(Ordering::Relaxed)
}

fn squared_error(factors: &Factors, data: &Partition) -> f64 {
    data.interactions().iter()
        .map(|interaction| (interaction.score - factors.predict(interaction.user, interaction.item)).powi(2))
        .sum()
}

impl Recommender for AlsModel {

    fn name(&self) -> &str {
        self.session.name()
    }

    fn on_start(&mut self) -> Result<()> {
        self.session.start()
    }

    fn train(&mut self, data: &Partition) -> Result<()> {

        let name = self.session.name();
        let pool = self.session.begin_training(data)?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut factors = Factors::random(
            data.num_users(), data.num_items(), self.params.factors, self.params.init_scale, &mut rng);
        factors.global_bias = data.mean_score();

        let by_user = data.ratings_by_user();
        let by_item = data.ratings_by_item();

        for iteration in 0..self.params.iterations {

            let solved_users = solve_side(pool, &factors.items, &by_user, factors.global_bias,
                self.params.regularization, &mut factors.users);

            let solved_items = solve_side(pool, &factors.users, &by_item, factors.global_bias,
                self.params.regularization, &mut factors.items);

            if !(solved_users && solved_items) {
                return Err(BenchError::training(name, "normal equations are not positive definite"));
            }

            let rmse = (squared_error(&factors, data) / data.len() as f64).sqrt();
            debug!("{} iteration {}: training rmse {:.4}", name, iteration + 1, rmse);
            check_loss(name, iteration, rmse)?;
        }

        factors.check_finite(name)?;
        self.session.install(factors, data);

        Ok(())
    }

    fn predict_k(&self, data: &Partition, k: usize) -> Result<TopK> {
        self.session.predict_k(data, k)
    }

    fn predict_scores(&self, data: &Partition) -> Result<Vec<f64>> {
        self.session.predict_scores(data)
    }

    fn on_stop(&mut self) -> Result<()> {
        self.session.stop()
    }

    fn scorer(&self) -> Result<Box<dyn Scorer + '_>> {
        self.session.scorer()
    }
}
