// Library module for the valuation pipeline, shared by the API server and tests

pub mod config;
pub mod error;
pub mod sourcing;
pub mod valuation;

pub use config::Settings;
pub use error::{ErrorRecord, Result, ValuationError};
pub use valuation::{appraise, Appraisal, AppraisalRequest};
