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

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde_derive::Serialize;

use crate::error::Result;
use crate::results::ResultsTable;
use crate::stats::Renaming;
use crate::types::TopK;

/// Reads a delimited input file. Rows may have varying numbers of fields, missing fields are
/// reported when they are accessed.
pub fn csv_reader<P: AsRef<Path>>(
    path: P,
    delimiter: u8,
    has_headers: bool,
) -> Result<csv::Reader<File>> {

    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .flexible(true)
        .from_path(path)?;

    Ok(reader)
}

/// Writes the results as a tab separated table with a header row. Absent values, e.g. the
/// metrics of a model that failed to train, are written as empty cells.
pub fn write_results<P: AsRef<Path>>(results: &ResultsTable, path: P) -> Result<()> {

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;

    writer.write_record(results.header())?;

    for record in results.records() {
        writer.write_record(&record)?;
    }

    writer.flush()?;

    Ok(())
}

/// Struct used for JSON serialization of computed recommendations. Field names will be used in
/// JSON.
#[derive(Serialize)]
struct Recommendations<'a> {
    for_user: &'a str,
    recommended_items: Vec<&'a str>,
}

/// Output the top-k lists in JSON format, one user per line, using the original identifiers from
/// the input file. If a `recommendations_path` is supplied, we write to a file at the specified
/// path, otherwise, we output to stdout.
pub fn write_recommendations(
    top_k: &TopK,
    renaming: &Renaming,
    recommendations_path: Option<&Path>,
) -> Result<()> {

    let mut out: Box<dyn Write> = match recommendations_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            Box::new(BufWriter::new(File::create(path)?))
        },
        None => Box::new(io::stdout()),
    };

    for (user, items) in top_k.iter() {

        let recommendations = Recommendations {
            for_user: renaming.user_name(*user),
            recommended_items: items.iter().map(|item| renaming.item_name(*item)).collect(),
        };

        serde_json::to_writer(&mut out, &recommendations)?;
        writeln!(out)?;
    }

    out.flush()?;

    Ok(())
}
