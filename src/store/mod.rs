//! SQLite-backed relational store for subjects, samples and the derived
//! summary table.
//!
//! The store is single-writer. The connection is owned by [`Store`] and is
//! released when the store is dropped or explicitly [`Store::close`]d, on every
//! exit path including errors.
//!
//! # Example
//!
//! ```no_run
//! use immunoprofile::prelude::*;
//!
//! let records = read_records("cell-count.csv").unwrap();
//! let mut store = Store::open("subjects.db").unwrap();
//! store.initialize_schema().unwrap();
//! let report = store.load_records(&records).unwrap();
//! println!("{} samples loaded, {} skipped", report.samples_inserted, report.skipped.len());
//! let summary = store.refresh_summary().unwrap();
//! store.close().unwrap();
//! ```

mod schema;

use crate::data::{
    compute_summary, CellCounts, CohortRow, Population, RawRecord, Response, ResponseFrequency,
    Sample, Sex, Subject, SummaryRow, N_POPULATIONS,
};
use crate::error::{ImmunoError, Result};
use crate::filter::CohortCriteria;
use rusqlite::{params, Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// A record that was skipped during loading because it failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// 1-based record number in the input.
    pub record: usize,
    pub reason: String,
}

/// Outcome of one [`Store::load_records`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub records_read: usize,
    pub subjects_inserted: usize,
    /// Records whose subject was already present (first occurrence wins).
    pub subjects_existing: usize,
    pub samples_inserted: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// Relational store holding the normalized dataset.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened store");
        Self::configure(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::CONFIGURE_CONNECTION)?;
        Ok(Self { conn })
    }

    /// Create the base and summary tables if they do not exist yet.
    pub fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::CREATE_BASE_TABLES)?;
        self.conn.execute_batch(schema::CREATE_SUMMARY_TABLE)?;
        info!("schema initialized");
        Ok(())
    }

    /// Close the connection, surfacing any error from SQLite.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| ImmunoError::from(err))
    }

    /// Load raw records.
    ///
    /// Each record inserts its subject unless that subject identifier already
    /// exists, then inserts its sample. Records that fail validation are
    /// skipped and reported. A duplicate sample identifier aborts the load
    /// with [`ImmunoError::Integrity`] and nothing from this call is kept.
    pub fn load_records(&mut self, records: &[RawRecord]) -> Result<LoadReport> {
        let mut report = LoadReport {
            records_read: records.len(),
            ..Default::default()
        };

        let tx = self.conn.transaction()?;
        {
            let mut insert_subject = tx.prepare(schema::INSERT_SUBJECT)?;
            let mut insert_sample = tx.prepare(schema::INSERT_SAMPLE)?;

            for (idx, raw) in records.iter().enumerate() {
                let record = idx + 1;
                let (subject, sample) = match raw.validate(record) {
                    Ok(parsed) => parsed,
                    Err(err) if err.is_recoverable() => {
                        warn!(record, error = %err, "skipping invalid record");
                        report.skipped.push(SkippedRecord {
                            record,
                            reason: err.to_string(),
                        });
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                let inserted = insert_subject.execute(params![
                    subject.subject,
                    subject.project,
                    subject.condition,
                    i64::from(subject.age),
                    subject.sex.as_str(),
                    subject.treatment,
                    subject.response.to_db(),
                ])?;
                if inserted == 0 {
                    debug!(record, subject = %subject.subject, "subject already recorded");
                    report.subjects_existing += 1;
                } else {
                    report.subjects_inserted += 1;
                }

                let counts = sample.counts.to_array();
                insert_sample
                    .execute(params![
                        sample.sample,
                        sample.subject,
                        sample.sample_type,
                        sample.time_from_treatment_start,
                        to_db_count(counts[0])?,
                        to_db_count(counts[1])?,
                        to_db_count(counts[2])?,
                        to_db_count(counts[3])?,
                        to_db_count(counts[4])?,
                    ])
                    .map_err(|err| {
                        if is_constraint_violation(&err) {
                            ImmunoError::Integrity(format!(
                                "sample '{}' in record {} violates a uniqueness or reference constraint",
                                sample.sample, record
                            ))
                        } else {
                            ImmunoError::from(err)
                        }
                    })?;
                report.samples_inserted += 1;
            }
        }
        tx.commit()?;

        info!(
            records = report.records_read,
            subjects = report.subjects_inserted,
            samples = report.samples_inserted,
            skipped = report.skipped.len(),
            "records loaded"
        );
        Ok(report)
    }

    /// All subjects in insertion order.
    pub fn subjects(&self) -> Result<Vec<Subject>> {
        let mut stmt = self.conn.prepare(schema::SELECT_SUBJECTS)?;
        let mut rows = stmt.query([])?;
        let mut subjects = Vec::new();

        while let Some(row) = rows.next()? {
            let sex: String = row.get(4)?;
            let response: Option<String> = row.get(6)?;
            subjects.push(Subject {
                subject: row.get(0)?,
                project: row.get(1)?,
                condition: row.get(2)?,
                age: from_db_age(row.get(3)?)?,
                sex: parse_sex(&sex)?,
                treatment: row.get(5)?,
                response: parse_response(response.as_deref())?,
            });
        }
        Ok(subjects)
    }

    /// All samples in insertion order.
    pub fn samples(&self) -> Result<Vec<Sample>> {
        let mut stmt = self.conn.prepare(schema::SELECT_SAMPLES)?;
        let mut rows = stmt.query([])?;
        let mut samples = Vec::new();

        while let Some(row) = rows.next()? {
            let mut counts = [0u64; N_POPULATIONS];
            for (i, slot) in counts.iter_mut().enumerate() {
                *slot = from_db_count(row.get(4 + i)?)?;
            }
            samples.push(Sample {
                sample: row.get(0)?,
                subject: row.get(1)?,
                sample_type: row.get(2)?,
                time_from_treatment_start: row.get(3)?,
                counts: CellCounts::from_array(counts),
            });
        }
        Ok(samples)
    }

    /// Number of rows in the subjects and samples tables.
    pub fn row_counts(&self) -> Result<(usize, usize)> {
        let subjects: i64 = self
            .conn
            .query_row(schema::COUNT_ROWS_SUBJECTS, [], |row| row.get(0))?;
        let samples: i64 = self
            .conn
            .query_row(schema::COUNT_ROWS_SAMPLES, [], |row| row.get(0))?;
        Ok((subjects as usize, samples as usize))
    }

    /// Every sample joined with its subject, in sample insertion order.
    pub fn cohort_rows(&self) -> Result<Vec<CohortRow>> {
        let mut stmt = self.conn.prepare(schema::SELECT_COHORT_ROWS)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();

        while let Some(row) = rows.next()? {
            let sex: String = row.get(5)?;
            let response: Option<String> = row.get(7)?;
            let mut counts = [0u64; N_POPULATIONS];
            for (i, slot) in counts.iter_mut().enumerate() {
                *slot = from_db_count(row.get(10 + i)?)?;
            }
            out.push(CohortRow {
                sample: row.get(0)?,
                subject: row.get(1)?,
                project: row.get(2)?,
                condition: row.get(3)?,
                age: from_db_age(row.get(4)?)?,
                sex: parse_sex(&sex)?,
                treatment: row.get(6)?,
                response: parse_response(response.as_deref())?,
                sample_type: row.get(8)?,
                time_from_treatment_start: row.get(9)?,
                counts: CellCounts::from_array(counts),
            });
        }
        Ok(out)
    }

    /// Persisted summary rows joined with their subjects, restricted to
    /// responders and non-responders that satisfy `criteria`.
    pub fn response_frequencies(&self, criteria: &CohortCriteria) -> Result<Vec<ResponseFrequency>> {
        let summary = self.summary_rows()?;
        let rows = self.cohort_rows()?;
        Ok(crate::filter::response_frequencies(&summary, &rows, criteria))
    }

    /// Recompute the summary table from the current samples and persist it.
    pub fn refresh_summary(&mut self) -> Result<Vec<SummaryRow>> {
        let samples = self.samples()?;
        let rows = compute_summary(&samples);
        self.write_summary(&rows)?;
        info!(samples = samples.len(), rows = rows.len(), "summary table rebuilt");
        Ok(rows)
    }

    /// Replace the persisted summary table with `rows`.
    pub fn write_summary(&mut self, rows: &[SummaryRow]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(schema::DELETE_SUMMARY, [])?;
        {
            let mut insert = tx.prepare(schema::INSERT_SUMMARY)?;
            for row in rows {
                insert.execute(params![
                    row.id,
                    row.sample,
                    to_db_count(row.total_count)?,
                    row.population.as_str(),
                    to_db_count(row.count)?,
                    row.percentage,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The persisted summary table, ordered by row id.
    pub fn summary_rows(&self) -> Result<Vec<SummaryRow>> {
        let mut stmt = self.conn.prepare(schema::SELECT_SUMMARY)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();

        while let Some(row) = rows.next()? {
            let population: String = row.get(3)?;
            out.push(SummaryRow {
                id: row.get(0)?,
                sample: row.get(1)?,
                total_count: from_db_count(row.get(2)?)?,
                population: population.parse::<Population>()?,
                count: from_db_count(row.get(4)?)?,
                percentage: row.get(5)?,
            });
        }
        Ok(out)
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn to_db_count(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| ImmunoError::InvalidParameter(format!("count {} exceeds storage range", value)))
}

fn from_db_count(value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| ImmunoError::Integrity(format!("stored count {} is negative", value)))
}

fn from_db_age(value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ImmunoError::Integrity(format!("stored age {} is out of range", value)))
}

fn parse_sex(value: &str) -> Result<Sex> {
    value.parse().map_err(ImmunoError::Integrity)
}

fn parse_response(value: Option<&str>) -> Result<Response> {
    Response::from_db(value).map_err(ImmunoError::Integrity)
}
