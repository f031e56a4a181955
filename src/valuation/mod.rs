//! Valuation module - pure pipeline from comparable sales to a final ARV

pub mod appraise;
pub mod comps;
pub mod engine;
pub mod history;
pub mod location;
pub mod types;

pub use appraise::{appraise, Appraisal, AppraisalRequest};
pub use types::*;
