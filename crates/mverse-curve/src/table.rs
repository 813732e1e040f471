use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use mverse_core::errors::{ErrorInfo, MverseError};
use mverse_core::IdSet;

use crate::bootstrap::{NullBootRow, NullBootTable};
use crate::build::{SpecTable, Specification};
use crate::codec::ensure_parent;
use crate::config::MultiverseConfig;

const SPEC_COLUMNS: [&str; 11] = [
    "mean", "lb", "ub", "p", "k", "kc", "set", "set_es", "full_set", "rank", "ci",
];
const BOOT_COLUMNS: [&str; 4] = ["rank", "obs", "boot_lb", "boot_ub"];

fn csv_error(code: &str, err: impl ToString) -> MverseError {
    MverseError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn field_error(column: &str, line: usize, raw: &str) -> MverseError {
    MverseError::Serde(
        ErrorInfo::new("table_field", "field could not be parsed")
            .with_context("column", column)
            .with_context("line", line)
            .with_context("value", raw),
    )
}

fn parse<T: std::str::FromStr>(
    record: &StringRecord,
    idx: usize,
    column: &str,
    line: usize,
) -> Result<T, MverseError> {
    let raw = record.get(idx).unwrap_or("").trim();
    raw.parse().map_err(|_| field_error(column, line, raw))
}

fn parse_flag(raw: &str, line: usize) -> Result<bool, MverseError> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(field_error("full_set", line, other)),
    }
}

fn check_header(found: &StringRecord, expected: &[String]) -> Result<(), MverseError> {
    let found: Vec<&str> = found.iter().map(str::trim).collect();
    if found != expected.iter().map(String::as_str).collect::<Vec<_>>() {
        return Err(MverseError::Serde(
            ErrorInfo::new("table_header", "table header does not match the configuration")
                .with_context("expected", expected.join(","))
                .with_context("found", found.join(",")),
        ));
    }
    Ok(())
}

/// Column names of a specification table for `table`'s factors.
pub fn spec_columns(table: &SpecTable) -> Vec<String> {
    table
        .factor_names()
        .into_iter()
        .chain(SPEC_COLUMNS.iter().map(|c| c.to_string()))
        .collect()
}

/// Writes the specification table as CSV. `set`/`set_es` fields are quoted.
pub fn write_spec_table<W: Write>(writer: W, table: &SpecTable) -> Result<(), MverseError> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(spec_columns(table))
        .map_err(|err| csv_error("table_write", err))?;
    for spec in table.iter() {
        let mut record: Vec<String> = spec.factors.clone();
        record.extend([
            spec.mean.to_string(),
            spec.lb.to_string(),
            spec.ub.to_string(),
            spec.p.to_string(),
            spec.k.to_string(),
            spec.kc.to_string(),
            spec.set.to_string(),
            spec.set_es.to_string(),
            if spec.full_set { "1" } else { "0" }.to_string(),
            spec.rank.to_string(),
            spec.ci.to_string(),
        ]);
        wtr.write_record(&record)
            .map_err(|err| csv_error("table_write", err))?;
    }
    wtr.flush().map_err(|err| csv_error("table_write", err))
}

/// Reads a specification table written by [`write_spec_table`], checking
/// its header against the configured factors.
pub fn read_spec_table<R: Read>(
    reader: R,
    config: &MultiverseConfig,
) -> Result<SpecTable, MverseError> {
    let mut table = SpecTable::empty(
        config.which.iter().map(|f| f.name.clone()).collect(),
        config.how.iter().map(|f| f.name.clone()).collect(),
    );
    let n_factors = table.which.len() + table.how.len();
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let header = rdr
        .headers()
        .map_err(|err| csv_error("table_header", err))?
        .clone();
    check_header(&header, &spec_columns(&table))?;

    for (offset, record) in rdr.records().enumerate() {
        let line = offset + 2;
        let record = record.map_err(|err| csv_error("table_record", err))?;
        let at = |offset: usize| n_factors + offset;
        let factors = (0..n_factors)
            .map(|idx| record.get(idx).unwrap_or("").to_string())
            .collect();
        table.specs.push(Specification {
            factors,
            mean: parse(&record, at(0), "mean", line)?,
            lb: parse(&record, at(1), "lb", line)?,
            ub: parse(&record, at(2), "ub", line)?,
            p: parse(&record, at(3), "p", line)?,
            k: parse(&record, at(4), "k", line)?,
            kc: parse(&record, at(5), "kc", line)?,
            set: parse::<IdSet>(&record, at(6), "set", line)?,
            set_es: parse::<IdSet>(&record, at(7), "set_es", line)?,
            full_set: parse_flag(record.get(at(8)).unwrap_or(""), line)?,
            rank: parse(&record, at(9), "rank", line)?,
            ci: parse(&record, at(10), "ci", line)?,
        });
    }
    table.specs.sort_by_key(|spec| spec.rank);
    Ok(table)
}

/// Writes the null bootstrap table as CSV.
pub fn write_boot_table<W: Write>(writer: W, table: &NullBootTable) -> Result<(), MverseError> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(BOOT_COLUMNS)
        .map_err(|err| csv_error("table_write", err))?;
    for row in &table.rows {
        wtr.write_record([
            row.rank.to_string(),
            row.obs.to_string(),
            row.boot_lb.to_string(),
            row.boot_ub.to_string(),
        ])
        .map_err(|err| csv_error("table_write", err))?;
    }
    wtr.flush().map_err(|err| csv_error("table_write", err))
}

/// Reads a null bootstrap table written by [`write_boot_table`].
pub fn read_boot_table<R: Read>(reader: R) -> Result<NullBootTable, MverseError> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let header = rdr
        .headers()
        .map_err(|err| csv_error("table_header", err))?
        .clone();
    let expected: Vec<String> = BOOT_COLUMNS.iter().map(|c| c.to_string()).collect();
    check_header(&header, &expected)?;
    let mut rows = Vec::new();
    for (offset, record) in rdr.records().enumerate() {
        let line = offset + 2;
        let record = record.map_err(|err| csv_error("table_record", err))?;
        rows.push(NullBootRow {
            rank: parse(&record, 0, "rank", line)?,
            obs: parse(&record, 1, "obs", line)?,
            boot_lb: parse(&record, 2, "boot_lb", line)?,
            boot_ub: parse(&record, 3, "boot_ub", line)?,
        });
    }
    rows.sort_by_key(|row| row.rank);
    Ok(NullBootTable { rows })
}

fn create(path: &Path) -> Result<File, MverseError> {
    ensure_parent(path)?;
    File::create(path).map_err(|err| {
        MverseError::Serde(
            ErrorInfo::new("file_write", err.to_string()).with_context("path", path.display()),
        )
    })
}

fn open(path: &Path) -> Result<File, MverseError> {
    File::open(path).map_err(|err| {
        MverseError::Serde(
            ErrorInfo::new("file_read", err.to_string()).with_context("path", path.display()),
        )
    })
}

/// Saves the specification table to `path`.
pub fn save_spec_table(path: &Path, table: &SpecTable) -> Result<(), MverseError> {
    write_spec_table(create(path)?, table)
}

/// Loads a specification table from `path`.
pub fn load_spec_table(path: &Path, config: &MultiverseConfig) -> Result<SpecTable, MverseError> {
    read_spec_table(open(path)?, config)
}

/// Saves the null bootstrap table to `path`.
pub fn save_boot_table(path: &Path, table: &NullBootTable) -> Result<(), MverseError> {
    write_boot_table(create(path)?, table)
}

/// Loads a null bootstrap table from `path`.
pub fn load_boot_table(path: &Path) -> Result<NullBootTable, MverseError> {
    read_boot_table(open(path)?)
}
