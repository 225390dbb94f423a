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

use std::fmt;

use crate::evaluation::{Metrics, POINTWISE_METRICS, TOP_METRICS};

/// Timings and metrics of a single model. Values are absent if the stage producing them failed.
#[derive(Clone, Debug, Default)]
pub struct ResultRow {
    pub name: String,
    pub train_time: Option<f64>,
    pub predict_top_time: Option<f64>,
    pub predict_all_time: Option<f64>,
    pub pointwise: Option<Metrics>,
    pub top: Option<Metrics>,
    pub ensemble_weight: Option<f64>,
    pub error: Option<String>,
}

impl ResultRow {

    pub fn new(name: &str) -> Self {
        ResultRow { name: name.to_owned(), ..ResultRow::default() }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.pointwise.as_ref().and_then(|metrics| metrics.get(name))
            .or_else(|| self.top.as_ref().and_then(|metrics| metrics.get(name)))
            .cloned()
    }
}

/// One row per benchmarked model.
#[derive(Clone, Debug, Default)]
pub struct ResultsTable {
    rows: Vec<ResultRow>,
}

impl ResultsTable {

    pub fn new(rows: Vec<ResultRow>) -> Self {
        ResultsTable { rows }
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn row(&self, name: &str) -> Option<&ResultRow> {
        self.rows.iter().find(|row| row.name == name)
    }

    /// A new table in which every row named in `weights` carries that ensemble weight. Failed rows
    /// are left without a weight.
    pub fn with_ensemble_weights(&self, weights: &[(String, f64)]) -> Self {
        let rows = self.rows.iter()
            .map(|row| {
                if row.failed() {
                    return row.clone();
                }
                let weight = weights.iter()
                    .find(|(name, _)| *name == row.name)
                    .map(|(_, weight)| *weight)
                    .or(row.ensemble_weight);
                ResultRow { ensemble_weight: weight, ..row.clone() }
            })
            .collect();

        ResultsTable { rows }
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = vec![
            "name".to_owned(),
            "train_time".to_owned(),
            "predict_top_time".to_owned(),
            "predict_all_time".to_owned(),
        ];
        header.extend(POINTWISE_METRICS.iter().map(|metric| metric.to_string()));
        header.extend(TOP_METRICS.iter().map(|metric| metric.to_string()));
        header.push("ensemble_weight".to_owned());
        header.push("error".to_owned());
        header
    }

    /// The cells of each row, in the order of `header`. Absent values are empty strings.
    pub fn records(&self) -> Vec<Vec<String>> {
        self.rows.iter()
            .map(|row| {
                let mut record = vec![
                    row.name.clone(),
                    cell(row.train_time),
                    cell(row.predict_top_time),
                    cell(row.predict_all_time),
                ];
                record.extend(POINTWISE_METRICS.iter().map(|metric| cell(row.metric(metric))));
                record.extend(TOP_METRICS.iter().map(|metric| cell(row.metric(metric))));
                record.push(cell(row.ensemble_weight));
                record.push(row.error.clone().unwrap_or_default());
                record
            })
            .collect()
    }
}

fn cell(value: Option<f64>) -> String {
    value.map(|value| format!("{:.6}", value)).unwrap_or_default()
}

impl fmt::Display for ResultsTable {

    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {

        let header = self.header();
        let records = self.records();

        let widths: Vec<usize> = (0..header.len())
            .map(|column| {
                records.iter()
                    .map(|record| record[column].len())
                    .chain(std::iter::once(header[column].len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        for row in std::iter::once(&header).chain(records.iter()) {
            let line: Vec<String> = row.iter()
                .zip(widths.iter())
                .map(|(value, width)| format!("{:<width$}", value, width = width))
                .collect();
            writeln!(f, "{}", line.join("  ").trim_end())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use std::fs;

    use tempfile::tempdir;

    use super::{ResultRow, ResultsTable};
    use crate::evaluation::Metrics;
    use crate::io;

    fn table() -> ResultsTable {
        let mut pointwise = Metrics::new();
        pointwise.insert("rmse".to_owned(), 0.5);

        let svd = ResultRow {
            train_time: Some(1.5),
            pointwise: Some(pointwise),
            ..ResultRow::new("SVD")
        };

        let broken = ResultRow {
            error: Some("training NCF failed".to_owned()),
            ..ResultRow::new("NCF")
        };

        let ensemble = ResultRow { ensemble_weight: Some(1.0), ..ResultRow::new("Ensemble") };

        ResultsTable::new(vec![svd, broken, ensemble])
    }

    #[test]
    fn ensemble_weights_by_name_except_failed_rows() {
        let weights = vec![("SVD".to_owned(), 0.25), ("NCF".to_owned(), 0.75)];
        let weighted = table().with_ensemble_weights(&weights);

        assert_eq!(weighted.row("SVD").unwrap().ensemble_weight, Some(0.25));
        assert_eq!(weighted.row("NCF").unwrap().ensemble_weight, None);
        assert_eq!(weighted.row("Ensemble").unwrap().ensemble_weight, Some(1.0));
        assert_eq!(table().row("SVD").unwrap().ensemble_weight, None);
    }

    #[test]
    fn absent_values_are_empty_cells() {
        let records = table().records();
        let header = table().header();

        let rmse = header.iter().position(|column| column == "rmse").unwrap();
        let weight = header.iter().position(|column| column == "ensemble_weight").unwrap();

        assert_eq!(records[0][rmse], "0.500000");
        assert_eq!(records[1][rmse], "");
        assert_eq!(records[1][weight], "");
        assert_eq!(records[1].last().unwrap(), "training NCF failed");
        assert_eq!(records[2][weight], "1.000000");
    }

    #[test]
    fn written_as_tsv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.tsv");

        io::write_results(&table(), &path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("name\ttrain_time\tpredict_top_time\tpredict_all_time\trmse"));
        assert!(lines[1].starts_with("SVD\t1.500000\t\t\t0.500000"));
    }

    #[test]
    fn printable() {
        let printed = table().to_string();
        assert_eq!(printed.lines().count(), 4);
        assert!(printed.lines().nth(1).unwrap().starts_with("SVD"));
    }
}
