//! Relational schema and the fixed set of statements run against it.
//!
//! Table and column names only ever appear in these constants; every value
//! reaches SQLite as a bound parameter.

pub(crate) const CONFIGURE_CONNECTION: &str = "PRAGMA foreign_keys = ON;";

pub(crate) const CREATE_BASE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS subjects (
  subject TEXT PRIMARY KEY,
  project TEXT NOT NULL,
  condition TEXT NOT NULL,
  age INTEGER NOT NULL CHECK (age >= 0),
  sex TEXT NOT NULL CHECK (sex IN ('M', 'F')),
  treatment TEXT NOT NULL,
  response TEXT CHECK (response IN ('yes', 'no') OR response IS NULL)
);

CREATE TABLE IF NOT EXISTS samples (
  sample TEXT PRIMARY KEY,
  subject TEXT NOT NULL,
  sample_type TEXT NOT NULL,
  time_from_treatment_start INTEGER,
  b_cell INTEGER NOT NULL CHECK (b_cell >= 0),
  cd8_t_cell INTEGER NOT NULL CHECK (cd8_t_cell >= 0),
  cd4_t_cell INTEGER NOT NULL CHECK (cd4_t_cell >= 0),
  nk_cell INTEGER NOT NULL CHECK (nk_cell >= 0),
  monocyte INTEGER NOT NULL CHECK (monocyte >= 0),
  FOREIGN KEY (subject) REFERENCES subjects (subject)
);

CREATE INDEX IF NOT EXISTS idx_samples_subject ON samples(subject);
";

pub(crate) const CREATE_SUMMARY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS summary (
  id INTEGER PRIMARY KEY,
  sample TEXT NOT NULL,
  total_count INTEGER NOT NULL,
  population TEXT NOT NULL CHECK (
    population IN ('b_cell', 'cd8_t_cell', 'cd4_t_cell', 'nk_cell', 'monocyte')
  ),
  count INTEGER NOT NULL,
  percentage REAL NOT NULL,
  FOREIGN KEY (sample) REFERENCES samples (sample)
);

CREATE INDEX IF NOT EXISTS idx_summary_sample ON summary(sample);
";

pub(crate) const INSERT_SUBJECT: &str = "INSERT OR IGNORE INTO subjects
  (subject, project, condition, age, sex, treatment, response)
  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

pub(crate) const INSERT_SAMPLE: &str = "INSERT INTO samples
  (sample, subject, sample_type, time_from_treatment_start,
   b_cell, cd8_t_cell, cd4_t_cell, nk_cell, monocyte)
  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

pub(crate) const SELECT_SUBJECTS: &str = "SELECT subject, project, condition, age, sex, treatment, response
  FROM subjects ORDER BY rowid";

pub(crate) const SELECT_SAMPLES: &str = "SELECT sample, subject, sample_type, time_from_treatment_start,
  b_cell, cd8_t_cell, cd4_t_cell, nk_cell, monocyte
  FROM samples ORDER BY rowid";

pub(crate) const DELETE_SUMMARY: &str = "DELETE FROM summary";

pub(crate) const INSERT_SUMMARY: &str = "INSERT INTO summary
  (id, sample, total_count, population, count, percentage)
  VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

pub(crate) const SELECT_SUMMARY: &str = "SELECT id, sample, total_count, population, count, percentage
  FROM summary ORDER BY id";

pub(crate) const SELECT_COHORT_ROWS: &str = "SELECT t.sample, t.subject, subj.project, subj.condition,
  subj.age, subj.sex, subj.treatment, subj.response, t.sample_type, t.time_from_treatment_start,
  t.b_cell, t.cd8_t_cell, t.cd4_t_cell, t.nk_cell, t.monocyte
  FROM samples t
  JOIN subjects subj ON t.subject = subj.subject
  ORDER BY t.rowid";

pub(crate) const COUNT_ROWS_SUBJECTS: &str = "SELECT COUNT(*) FROM subjects";
pub(crate) const COUNT_ROWS_SAMPLES: &str = "SELECT COUNT(*) FROM samples";
