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

use std::cmp::Ordering;

use ndarray::{Array1, Array2};

/// Solves `a * x = b` for a symmetric positive definite `a` via its Cholesky decomposition
/// `a = l * l^T`. Returns `None` if `a` is not positive definite.
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {

    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: l * y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: l^T * x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Ordinary least squares fit with an intercept.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearFit {

    pub fn predict(&self, features: &[f64]) -> f64 {
        self.intercept + self.coefficients.iter()
            .zip(features.iter())
            .map(|(coefficient, feature)| coefficient * feature)
            .sum::<f64>()
    }
}

/// Regresses `target` on the given feature columns. The data is centred first so that the
/// intercept is not regularised, `ridge` is added to the diagonal of the centred gram matrix and
/// may be zero. Returns `None` for empty or mismatched input and for rank deficient systems.
pub fn least_squares<C: AsRef<[f64]>>(
    columns: &[C],
    target: &[f64],
    ridge: f64,
) -> Option<LinearFit> {

    let columns: Vec<&[f64]> = columns.iter().map(|column| column.as_ref()).collect();

    let num_rows = target.len();
    let num_columns = columns.len();

    if num_rows == 0 || num_columns == 0 || columns.iter().any(|column| column.len() != num_rows) {
        return None;
    }

    let target_mean = target.iter().sum::<f64>() / num_rows as f64;
    let column_means: Vec<f64> = columns.iter()
        .map(|column| column.iter().sum::<f64>() / num_rows as f64)
        .collect();

    let mut gram = Array2::<f64>::zeros((num_columns, num_columns));
    let mut moments = Array1::<f64>::zeros(num_columns);

    for row in 0..num_rows {
        let centred_target = target[row] - target_mean;

        for a in 0..num_columns {
            let centred_a = columns[a][row] - column_means[a];
            moments[a] += centred_a * centred_target;

            for b in 0..=a {
                gram[[a, b]] += centred_a * (columns[b][row] - column_means[b]);
            }
        }
    }

    for a in 0..num_columns {
        for b in 0..a {
            gram[[b, a]] = gram[[a, b]];
        }
        gram[[a, a]] += ridge;
    }

    let coefficients = cholesky_solve(&gram, &moments)?;

    let intercept = target_mean - coefficients.iter()
        .zip(column_means.iter())
        .map(|(coefficient, mean)| coefficient * mean)
        .sum::<f64>();

    Some(LinearFit { intercept, coefficients: coefficients.to_vec() })
}

/// Like `least_squares`, but no coefficient is negative. Starting from all columns, the column
/// with the most negative coefficient is removed and the rest refitted, until all remaining
/// coefficients are non-negative. Removed columns get a coefficient of zero, if none remains the
/// fit is the mean of `target`.
pub fn non_negative_least_squares<C: AsRef<[f64]>>(
    columns: &[C],
    target: &[f64],
    ridge: f64,
) -> Option<LinearFit> {

    if target.is_empty() || columns.is_empty() {
        return None;
    }

    let mut active: Vec<usize> = (0..columns.len()).collect();

    while !active.is_empty() {

        let selected: Vec<&[f64]> = active.iter().map(|column| columns[*column].as_ref()).collect();
        let fit = least_squares(&selected, target, ridge)?;

        let most_negative = fit.coefficients.iter()
            .enumerate()
            .filter(|(_, coefficient)| **coefficient < 0.0)
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            .map(|(position, _)| position);

        match most_negative {
            Some(position) => {
                active.remove(position);
            },
            None => {
                let mut coefficients = vec![0.0; columns.len()];
                for (column, coefficient) in active.iter().zip(fit.coefficients.iter()) {
                    coefficients[*column] = *coefficient;
                }
                return Some(LinearFit { intercept: fit.intercept, coefficients });
            },
        }
    }

    let intercept = target.iter().sum::<f64>() / target.len() as f64;

    Some(LinearFit { intercept, coefficients: vec![0.0; columns.len()] })
}

#[cfg(test)]
mod tests {

    use ndarray::{arr1, arr2};

    use super::{cholesky_solve, least_squares, non_negative_least_squares};

    fn close_enough_to(value: f64, expected: f64) -> bool {
        (value - expected).abs() < 1e-6
    }

    #[test]
    fn solves_positive_definite_system() {
        let a = arr2(&[[4.0, 2.0], [2.0, 3.0]]);
        let b = arr1(&[2.0, 1.0]);

        let x = cholesky_solve(&a, &b).unwrap();

        assert!(close_enough_to(x[0], 0.5));
        assert!(close_enough_to(x[1], 0.0));
    }

    #[test]
    fn rejects_indefinite_system() {
        let a = arr2(&[[1.0, 2.0], [2.0, 1.0]]);
        let b = arr1(&[1.0, 1.0]);

        assert!(cholesky_solve(&a, &b).is_none());
    }

    #[test]
    fn recovers_exact_linear_relationship() {
        let first = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let second = vec![2.0, 1.0, 4.0, 3.0, 6.0];
        let target: Vec<f64> = first.iter().zip(second.iter())
            .map(|(a, b)| 1.0 + 2.0 * a + 3.0 * b)
            .collect();

        let fit = least_squares(&[first, second], &target, 0.0).unwrap();

        assert!(close_enough_to(fit.intercept, 1.0));
        assert!(close_enough_to(fit.coefficients[0], 2.0));
        assert!(close_enough_to(fit.coefficients[1], 3.0));
        assert!(close_enough_to(fit.predict(&[1.0, 1.0]), 6.0));
    }

    #[test]
    fn constant_column_without_ridge_is_rank_deficient() {
        let constant = vec![1.0, 1.0, 1.0];
        let target = vec![1.0, 2.0, 3.0];

        assert!(least_squares(&[constant.clone()], &target, 0.0).is_none());

        let fit = least_squares(&[constant], &target, 1e-6).unwrap();
        assert!(close_enough_to(fit.coefficients[0], 0.0));
        assert!(close_enough_to(fit.intercept, 2.0));
    }

    #[test]
    fn negative_coefficients_are_removed() {
        let first = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let second = vec![2.0, 1.0, 4.0, 3.0, 6.0, 2.0];
        let target: Vec<f64> = first.iter().zip(second.iter())
            .map(|(a, b)| 1.0 + 2.0 * a - 0.5 * b)
            .collect();

        let unconstrained = least_squares(&[first.clone(), second.clone()], &target, 0.0).unwrap();
        assert!(close_enough_to(unconstrained.coefficients[1], -0.5));

        let fit = non_negative_least_squares(&[first, second], &target, 0.0).unwrap();

        assert_eq!(fit.coefficients[1], 0.0);
        assert!(fit.coefficients[0] > 0.0);
        assert!(fit.coefficients.iter().all(|coefficient| *coefficient >= 0.0));
    }

    #[test]
    fn non_negative_fit_keeps_positive_solution() {
        let first = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let second = vec![2.0, 1.0, 4.0, 3.0, 6.0];
        let target: Vec<f64> = first.iter().zip(second.iter())
            .map(|(a, b)| 1.0 + 2.0 * a + 3.0 * b)
            .collect();

        let fit = non_negative_least_squares(&[first, second], &target, 0.0).unwrap();

        assert!(close_enough_to(fit.coefficients[0], 2.0));
        assert!(close_enough_to(fit.coefficients[1], 3.0));
    }

    #[test]
    fn only_negative_columns_fall_back_to_the_mean() {
        let column = vec![1.0, 2.0, 3.0, 4.0];
        let target = vec![4.0, 3.0, 2.0, 1.0];

        let fit = non_negative_least_squares(&[column], &target, 0.0).unwrap();

        assert_eq!(fit.coefficients, vec![0.0]);
        assert!(close_enough_to(fit.intercept, 2.5));
    }
}
