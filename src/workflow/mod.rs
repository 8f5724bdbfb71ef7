pub mod driver;
pub mod issue;
pub mod review;
pub mod types;

pub use driver::{Driver, Mode};
pub use types::{CodeOutcome, CycleOutcome, Outcome, ReviewRunOutcome, RunSummary, Subject};
