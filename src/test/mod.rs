//! Statistical hypothesis tests.


pub use mann_whitney::{mann_whitney_u, MannWhitneyMethod, MannWhitneyResult, EXACT_MAX_SIZE};
