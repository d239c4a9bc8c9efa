//! Raw input records and the typed subject/sample entities they normalize into.

use crate::data::population::{CellCounts, Population, N_POPULATIONS};
use crate::error::{ImmunoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Biological sex of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "M" => Ok(Self::Male),
            "F" => Ok(Self::Female),
            other => Err(format!("expected 'M' or 'F', got '{}'", other)),
        }
    }
}

/// Recorded response to treatment.
///
/// `Unknown` is the pre-labeling state; it is persisted as NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Yes,
    No,
    Unknown,
}

impl Response {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unknown => "unknown",
        }
    }

    /// Value stored in the `response` column (NULL for unknown).
    pub fn to_db(&self) -> Option<&'static str> {
        match self {
            Self::Yes => Some("yes"),
            Self::No => Some("no"),
            Self::Unknown => None,
        }
    }

    /// Inverse of [`Response::to_db`].
    pub fn from_db(value: Option<&str>) -> std::result::Result<Self, String> {
        match value {
            None => Ok(Self::Unknown),
            Some(v) => v.parse(),
        }
    }

    /// Whether the response is one of the two comparison labels.
    pub fn is_labeled(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Response {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            "" | "unknown" => Ok(Self::Unknown),
            other => Err(format!("expected 'yes', 'no' or blank, got '{}'", other)),
        }
    }
}

/// A study participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub subject: String,
    pub project: String,
    pub condition: String,
    pub age: u32,
    pub sex: Sex,
    pub treatment: String,
    pub response: Response,
}

/// A biological sample with its five population counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub sample: String,
    pub subject: String,
    pub sample_type: String,
    /// `None` when not applicable.
    pub time_from_treatment_start: Option<i64>,
    pub counts: CellCounts,
}

/// One untyped row of the input table, exactly as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub subject: String,
    pub sample: String,
    pub project: String,
    pub condition: String,
    pub age: String,
    pub sex: String,
    pub treatment: String,
    pub response: String,
    pub sample_type: String,
    pub time_from_treatment_start: String,
    pub b_cell: String,
    pub cd8_t_cell: String,
    pub cd4_t_cell: String,
    pub nk_cell: String,
    pub monocyte: String,
}

impl RawRecord {
    /// Raw text of one population count column.
    pub fn count_field(&self, population: Population) -> &str {
        match population {
            Population::BCell => &self.b_cell,
            Population::Cd8TCell => &self.cd8_t_cell,
            Population::Cd4TCell => &self.cd4_t_cell,
            Population::NkCell => &self.nk_cell,
            Population::Monocyte => &self.monocyte,
        }
    }

    /// Type and validate this record.
    ///
    /// `record` is the 1-based record number used in error messages.
    pub fn validate(&self, record: usize) -> Result<(Subject, Sample)> {
        let subject = required(record, "subject", &self.subject)?;
        let sample = required(record, "sample", &self.sample)?;
        let age = parse_integer::<u32>(record, "age", &self.age)?;
        let sex = self
            .sex
            .trim()
            .parse::<Sex>()
            .map_err(|reason| invalid(record, "sex", &self.sex, reason))?;
        let response = self
            .response
            .trim()
            .parse::<Response>()
            .map_err(|reason| invalid(record, "response", &self.response, reason))?;

        let time_from_treatment_start = if self.time_from_treatment_start.trim().is_empty() {
            None
        } else {
            Some(parse_integer::<i64>(
                record,
                "time_from_treatment_start",
                &self.time_from_treatment_start,
            )?)
        };

        let mut counts = [0u64; N_POPULATIONS];
        for population in Population::ALL {
            let field = population.as_str();
            let raw = self.count_field(population);
            let value = parse_integer::<i64>(record, field, raw)?;
            counts[population.index()] = u64::try_from(value)
                .map_err(|_| invalid(record, field, raw, "count must be non-negative"))?;
        }
        let total = counts
            .iter()
            .try_fold(0u64, |acc, &c| acc.checked_add(c))
            .filter(|&t| i64::try_from(t).is_ok());
        if total.is_none() {
            let joined = counts.map(|c| c.to_string()).join(",");
            return Err(invalid(
                record,
                "total_count",
                &joined,
                "sum of counts exceeds storage range",
            ));
        }

        Ok((
            Subject {
                subject: subject.clone(),
                project: self.project.trim().to_string(),
                condition: self.condition.trim().to_string(),
                age,
                sex,
                treatment: self.treatment.trim().to_string(),
                response,
            },
            Sample {
                sample,
                subject,
                sample_type: self.sample_type.trim().to_string(),
                time_from_treatment_start,
                counts: CellCounts::from_array(counts),
            },
        ))
    }
}

fn invalid(record: usize, field: &str, value: &str, reason: impl Into<String>) -> ImmunoError {
    ImmunoError::Validation {
        record,
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn required(record: usize, field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(record, field, value, "required field is blank"));
    }
    Ok(trimmed.to_string())
}

fn parse_integer<T: FromStr>(record: usize, field: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| invalid(record, field, value, "expected an integer in range"))
}

/// Read raw records from a comma-delimited file with a header row.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecord>> {
    read_records_with_delimiter(path, b',')
}

/// Read raw records from a delimited file with a header row.
pub fn read_records_with_delimiter<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Vec<RawRecord>> {
    let file = File::open(path)?;
    parse_records(file, delimiter)
}

/// Parse raw records from any reader.
///
/// A missing required column is a hard error; field contents are not
/// interpreted here.
pub fn parse_records<R: Read>(reader: R, delimiter: u8) -> Result<Vec<RawRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for row in csv_reader.deserialize::<RawRecord>() {
        records.push(row?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "project,subject,condition,age,sex,treatment,response,sample,sample_type,time_from_treatment_start,b_cell,cd8_t_cell,cd4_t_cell,nk_cell,monocyte";

    fn raw(subject: &str, sample: &str) -> RawRecord {
        RawRecord {
            subject: subject.to_string(),
            sample: sample.to_string(),
            project: "prj1".to_string(),
            condition: "melanoma".to_string(),
            age: "57".to_string(),
            sex: "M".to_string(),
            treatment: "miraclib".to_string(),
            response: "yes".to_string(),
            sample_type: "PBMC".to_string(),
            time_from_treatment_start: "0".to_string(),
            b_cell: "100".to_string(),
            cd8_t_cell: "100".to_string(),
            cd4_t_cell: "100".to_string(),
            nk_cell: "100".to_string(),
            monocyte: "100".to_string(),
        }
    }

    #[test]
    fn test_validate_full_record() {
        let (subject, sample) = raw("S1", "A1").validate(1).unwrap();
        assert_eq!(subject.subject, "S1");
        assert_eq!(subject.sex, Sex::Male);
        assert_eq!(subject.response, Response::Yes);
        assert_eq!(sample.subject, "S1");
        assert_eq!(sample.time_from_treatment_start, Some(0));
        assert_eq!(sample.counts.total(), 500);
    }

    #[test]
    fn test_blank_optional_fields_become_absent() {
        let mut record = raw("S1", "A1");
        record.response = String::new();
        record.time_from_treatment_start = "  ".to_string();
        let (subject, sample) = record.validate(1).unwrap();
        assert_eq!(subject.response, Response::Unknown);
        assert_eq!(subject.response.to_db(), None);
        assert_eq!(sample.time_from_treatment_start, None);
    }

    #[test]
    fn test_non_numeric_count_names_field() {
        let mut record = raw("S1", "A1");
        record.nk_cell = "12x".to_string();
        match record.validate(7) {
            Err(ImmunoError::Validation { record, field, .. }) => {
                assert_eq!(record, 7);
                assert_eq!(field, "nk_cell");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut record = raw("S1", "A1");
        record.monocyte = "-3".to_string();
        assert!(record.validate(1).is_err());
    }

    #[test]
    fn test_count_total_beyond_storage_range_rejected() {
        let mut record = raw("S1", "A1");
        let max = i64::MAX.to_string();
        record.b_cell = max.clone();
        record.cd8_t_cell = max.clone();
        record.cd4_t_cell = max;
        match record.validate(4) {
            Err(err @ ImmunoError::Validation { .. }) => {
                assert!(err.is_recoverable());
                assert!(err.to_string().contains("total_count"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let mut record = raw("S1", "A1");
        record.b_cell = (i64::MAX - 400).to_string();
        let (_, sample) = record.validate(1).unwrap();
        assert_eq!(sample.counts.total(), i64::MAX as u64);
    }

    #[test]
    fn test_bad_enum_values_rejected() {
        let mut record = raw("S1", "A1");
        record.sex = "X".to_string();
        assert!(record.validate(1).is_err());

        let mut record = raw("S1", "A1");
        record.response = "maybe".to_string();
        assert!(record.validate(1).is_err());

        let mut record = raw("", "A1");
        record.subject = "   ".to_string();
        assert!(record.validate(1).is_err());
    }

    #[test]
    fn test_response_db_round_trip() {
        for r in [Response::Yes, Response::No, Response::Unknown] {
            assert_eq!(Response::from_db(r.to_db()).unwrap(), r);
        }
    }

    #[test]
    fn test_read_records_any_column_order() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        writeln!(file, "prj1,sbj000,melanoma,57,M,miraclib,yes,s000,PBMC,0,36000,24663,19000,14000,5000").unwrap();
        writeln!(file, "prj1,sbj001,carcinoma,61,F,none,,s001,WB,,1,2,3,4,5").unwrap();
        file.flush().unwrap();

        let records = read_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sample, "s000");
        assert_eq!(records[0].cd8_t_cell, "24663");
        assert_eq!(records[1].response, "");
        assert_eq!(records[1].time_from_treatment_start, "");
    }

    #[test]
    fn test_read_records_missing_column_fails() {
        let data = "subject,sample\nS1,A1\n";
        let result = parse_records(data.as_bytes(), b',');
        assert!(matches!(result, Err(ImmunoError::Csv(_))));
    }

    #[test]
    fn test_read_records_tab_delimited() {
        let data = HEADER.replace(',', "\t")
            + "\nprj2\tsbj9\tmelanoma\t40\tF\tmiraclib\tno\ts9\tPBMC\t7\t1\t1\t1\t1\t1\n";
        let records = parse_records(data.as_bytes(), b'\t').unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time_from_treatment_start, "7");
    }
}
