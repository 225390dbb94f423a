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

//! Benchmarks recommendation models against each other: a ratings dataset is split into a
//! training and a validation partition, every model is trained on the former, asked for top-k
//! lists and pointwise scores, and evaluated on the latter.

mod llr;
pub mod config;
pub mod dataset;
pub mod ensemble;
pub mod error;
pub mod evaluation;
pub mod io;
pub mod linalg;
pub mod models;
pub mod results;
pub mod stats;
pub mod topk;
pub mod types;
pub mod utils;


use tracing::{error, info, warn};

pub use crate::config::BenchConfig;
pub use crate::dataset::{split_without_cold_start, Column, ColumnSpec, Dataset, Partition};
pub use crate::ensemble::Ensemble;
pub use crate::error::{BenchError, Result};
pub use crate::evaluation::{eval_pointwise, eval_top};
pub use crate::models::Recommender;
pub use crate::results::{ResultRow, ResultsTable};

use crate::stats::Renaming;

/// Runs the whole benchmark: splits the dataset, then trains, queries and evaluates one model
/// after the other, and finally the ensemble if one is given. A model that fails is reported in
/// its row and does not stop the benchmark, only problems with the data or the configuration do.
pub fn benchmark(
    dataset: &Dataset,
    models: Vec<Box<dyn Recommender>>,
    ensemble: Option<Ensemble>,
    config: &BenchConfig,
) -> Result<ResultsTable> {

    config.validate()?;

    let (train, valid) = split_without_cold_start(dataset, config.ratio, config.seed)?;

    let renaming = config.recommendations_dir.as_ref().map(|_| dataset.renaming());

    let mut rows: Vec<ResultRow> = Vec::with_capacity(models.len() + 1);

    for mut model in models {
        rows.push(run_model(model.as_mut(), &train, &valid, config, renaming.as_ref()));
    }

    let mut weights = Vec::new();

    if let Some(mut ensemble) = ensemble {
        let mut row = run_model(&mut ensemble, &train, &valid, config, renaming.as_ref());
        row.ensemble_weight = Some(1.0);

        if !row.failed() {
            match ensemble.weights() {
                Ok(ensemble_weights) => {
                    for (name, weight) in ensemble_weights.iter() {
                        info!("Ensemble weight of {}: {:.4}", name, weight);
                    }
                    weights = ensemble_weights;
                },
                Err(failure) => warn!("No ensemble weights: {}", failure),
            }
        }

        rows.push(row);
    }

    Ok(ResultsTable::new(rows).with_ensemble_weights(&weights))
}

/// Benchmarks a single model between `on_start` and `on_stop`.
fn run_model(
    model: &mut dyn Recommender,
    train: &Partition,
    valid: &Partition,
    config: &BenchConfig,
    renaming: Option<&Renaming>,
) -> ResultRow {

    let name = model.name().to_owned();
    let mut row = ResultRow::new(&name);

    info!("Benchmarking {}", name);

    let mut outcome = model.on_start()
        .and_then(|_| run_stages(model, train, valid, config, renaming, &mut row));

    if let Err(failure) = model.on_stop() {
        if outcome.is_ok() {
            outcome = Err(failure);
        }
    }

    if let Err(failure) = outcome {
        error!("{} failed: {}", name, failure);
        row.error = Some(failure.to_string());
    }

    row
}

fn run_stages(
    model: &mut dyn Recommender,
    train: &Partition,
    valid: &Partition,
    config: &BenchConfig,
    renaming: Option<&Renaming>,
    row: &mut ResultRow,
) -> Result<()> {

    let (trained, duration) = utils::timed(|| model.train(train));
    trained?;
    row.train_time = Some(utils::to_secs(duration));
    info!("{} trained in {}ms", model.name(), utils::to_millis(duration));

    let (top_k, duration) = utils::timed(|| model.predict_k(train, config.top_k));
    let top_k = top_k?;
    row.predict_top_time = Some(utils::to_secs(duration));
    info!("{} ranked {} users in {}ms", model.name(), top_k.len(), utils::to_millis(duration));

    let (scores, duration) = utils::timed(|| model.predict_scores(valid));
    let scores = scores?;
    row.predict_all_time = Some(utils::to_secs(duration));
    info!("{} scored {} pairs in {}ms", model.name(), scores.len(), utils::to_millis(duration));

    row.pointwise = Some(eval_pointwise(valid, &scores)?);
    row.top = Some(eval_top(valid, &top_k, config.top_k));

    if let (Some(dir), Some(renaming)) = (config.recommendations_dir.as_ref(), renaming) {
        let path = dir.join(format!("{}.jsonl", model.name()));
        io::write_recommendations(&top_k, renaming, Some(&path))?;
    }

    Ok(())
}
