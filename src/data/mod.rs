//! Data structures for immune cell-frequency analysis.

mod joined;
mod population;
mod record;
mod summary;

pub use joined::{CohortRow, ResponseFrequency};
pub use population::{
    percentage_features, safe_percentage, CellCounts, Population, N_POPULATIONS,
};
pub use record::{
    parse_records, read_records, read_records_with_delimiter, RawRecord, Response, Sample, Sex,
    Subject,
};
pub use summary::{compute_summary, SummaryRow};
