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

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;

use getopts::{Matches, Options};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use recobench::io;
use recobench::models::roster;
use recobench::{benchmark, BenchConfig, ColumnSpec, Dataset, Ensemble};

fn main() {

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("i", "inputfile", "Input file name (required). The input consists of ratings \
        given by users to items, one user, item and rating per line.", "PATH");
    opts.optopt("f", "format", "Layout of the input file (optional, defaults to movielens). One \
        of 'movielens' (tab separated u.data), 'amazon' (comma separated ratings dump) or 'csv' \
        (comma separated with a header containing user, item and rating columns).", "FORMAT");
    opts.optopt("o", "outputfile", "File to write the results table to (optional, defaults to \
        results.tsv).", "PATH");
    opts.optopt("k", "top-k", "Length of the recommendation lists (optional, defaults to 10).",
        "NUMBER");
    opts.optopt("r", "ratio", "Fraction of the data used for training (optional, defaults to \
        0.75).", "RATIO");
    opts.optopt("s", "seed", "Random seed (optional, defaults to 42).", "NUMBER");
    opts.optopt("t", "threads", "Number of worker threads per model (optional, defaults to the \
        number of cpus).", "NUMBER");
    opts.optopt("d", "recommendations", "Directory to write the top-k lists of every model to \
        (optional).", "DIR");
    opts.optflag("", "no-ensemble", "Skip the ensemble of all models");
    opts.optflag("h", "help", "Print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(failure) => {
            let hint = failure.to_string();
            return print_usage_and_exit(&program, opts, Some(&hint))
        },
    };

    if matches.opt_present("h") {
        return print_usage_and_exit(&program, opts, None);
    }

    let interactions_path = match matches.opt_str("i") {
        Some(path) => path,
        None => return print_usage_and_exit(
            &program,
            opts,
            Some("Please specify an inputfile via --inputfile."),
        ),
    };

    let columns = match matches.opt_str("f").as_deref() {
        None | Some("movielens") => ColumnSpec::movielens(),
        Some("amazon") => ColumnSpec::amazon(),
        Some("csv") => ColumnSpec::csv("user", "item", "rating"),
        Some(other) => {
            let hint = format!("Unknown format '{}'", other);
            return print_usage_and_exit(&program, opts, Some(&hint))
        },
    };

    let results_path = matches.opt_str("o").unwrap_or_else(|| String::from("results.tsv"));

    let config = match config_from(&matches) {
        Ok(config) => config,
        Err(hint) => return print_usage_and_exit(&program, opts, Some(&hint)),
    };

    init_logging();

    if let Err(failure) = run_benchmark(&interactions_path, &columns, &config, &results_path) {
        eprintln!("{}", failure);
        process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn config_from(matches: &Matches) -> Result<BenchConfig, String> {

    let defaults = BenchConfig::default();

    let config = BenchConfig {
        seed: option_or(matches, "s", defaults.seed)?,
        top_k: option_or(matches, "k", defaults.top_k)?,
        ratio: option_or(matches, "r", defaults.ratio)?,
        num_threads: option_or(matches, "t", defaults.num_threads)?,
        ensemble: !matches.opt_present("no-ensemble"),
        recommendations_dir: matches.opt_str("d").map(PathBuf::from),
        ..defaults
    };

    config.validate().map_err(|failure| failure.to_string())?;

    Ok(config)
}

fn option_or<T>(matches: &Matches, name: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: ToString,
{
    matches.opt_get_default(name, default)
        .map_err(|failure| format!("Problem with option '{}': {}", name, failure.to_string()))
}

fn print_usage_and_exit(
    program: &str,
    opts: Options,
    hint: Option<&str>
) {

    if let Some(hint) = hint {
        eprintln!("\n{}\n", hint);
    }

    let brief = format!("Usage: {} [options]", program);
    eprint!("{}", opts.usage(&brief));
    process::exit(if hint.is_some() { 1 } else { 0 });
}

fn run_benchmark(
    interactions_path: &str,
    columns: &ColumnSpec,
    config: &BenchConfig,
    results_path: &str,
) -> Result<(), Box<dyn Error>> {

    info!("Reading {}", interactions_path);

    let dataset = Dataset::load(interactions_path, columns)?;

    let models = roster(config);
    let ensemble = if config.ensemble { Some(Ensemble::with_roster(config)) } else { None };

    let results = benchmark(&dataset, models, ensemble, config)?;

    println!("{}", results);

    info!("Writing results to {}", results_path);
    io::write_results(&results, results_path)?;

    Ok(())
}
