//! Core data types for the valuation pipeline
//! Plain serializable records, derived fields are recomputed, never patched in place

use crate::error::{Result, ValuationError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Renovation condition, from an explicit tag only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Remodeled,
    Unremodeled,
    #[default]
    Unknown,
}

impl Condition {
    pub fn from_tag(tag: &str) -> Self {
        let lower = tag.trim().to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let has = |word: &str| words.iter().any(|w| *w == word);
        let negated = |word: &str| {
            words
                .windows(2)
                .any(|pair| matches!(pair[0], "not" | "never" | "un") && pair[1] == word)
        };

        let positive = ["remodeled", "renovated", "updated", "flipped"];
        let negative = [
            "unremodeled",
            "unrenovated",
            "unupdated",
            "original",
            "dated",
            "outdated",
            "fixer",
        ];

        // Negated forms win, "not updated" is a positive keyword behind a "not"
        if negative.iter().any(|&w| has(w))
            || positive.iter().any(|&w| negated(w))
            || lower.contains("needs work")
        {
            Condition::Unremodeled
        } else if positive.iter().any(|&w| has(w)) {
            Condition::Remodeled
        } else {
            Condition::Unknown
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Remodeled => write!(f, "remodeled"),
            Condition::Unremodeled => write!(f, "unremodeled"),
            Condition::Unknown => write!(f, "unknown"),
        }
    }
}

/// Where a comp came from, ranked by how much its selection can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompSource {
    AiMatched,      // Comp sets matched to the subject by a provider
    FilteredSearch, // Search results with provider-side filters applied
    GenericSearch,  // Plain nearby-sales search
    AiGenerated,    // Synthetic comps
    #[default]
    Unknown,
}

impl CompSource {
    /// Quality-score bonus for this tier
    pub fn tier_bonus(&self) -> u8 {
        match self {
            CompSource::AiMatched => 20,
            CompSource::FilteredSearch => 15,
            CompSource::GenericSearch => 10,
            CompSource::AiGenerated => 5,
            CompSource::Unknown => 0,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        let lower = tag.trim().to_lowercase().replace(['-', ' '], "_");

        match lower.as_str() {
            "ai_matched" | "matched" | "comp_set" => CompSource::AiMatched,
            "filtered_search" | "filtered" => CompSource::FilteredSearch,
            "search" | "generic_search" | "nearby" => CompSource::GenericSearch,
            "ai_generated" | "generated" | "synthetic" => CompSource::AiGenerated,
            _ => CompSource::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    High,
    Medium,
    Low,
}

impl QualityLabel {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => QualityLabel::High,
            60..=79 => QualityLabel::Medium,
            _ => QualityLabel::Low,
        }
    }
}

/// A comparable sale as fetched from a provider
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComparableSale {
    pub address: Option<String>,
    pub zip: Option<String>,
    pub price: Option<f64>,
    pub sqft: Option<f64>,
    pub beds: Option<f64>,
    pub baths: Option<f64>,
    /// Raw date as reported; unparsable dates are dropped by the recency filter
    pub sale_date: Option<String>,
    pub distance_miles: Option<f64>,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub data_source: CompSource,
    /// Derived 0-100 score, set by scoring
    #[serde(default)]
    pub quality_score: Option<u8>,
}

impl ComparableSale {
    /// Price usable in an average (present, finite, positive)
    pub fn usable_price(&self) -> Option<f64> {
        self.price.filter(|p| p.is_finite() && *p > 0.0)
    }

    pub fn quality_label(&self) -> Option<QualityLabel> {
        self.quality_score.map(QualityLabel::from_score)
    }
}

/// The subject property being valued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub sqft: Option<f64>,
    pub beds: Option<f64>,
    pub baths: Option<f64>,
    pub purchase_price: Option<f64>,
}

impl PropertyDescriptor {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(ValuationError::input("address", "must not be empty"));
        }
        if self.zip.trim().is_empty() {
            return Err(ValuationError::input("zip", "must not be empty"));
        }

        let numeric = [
            ("sqft", self.sqft),
            ("beds", self.beds),
            ("baths", self.baths),
            ("purchase_price", self.purchase_price),
        ];
        for (field, value) in numeric {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ValuationError::input(field, format!("invalid value {}", v)));
                }
            }
        }
        if matches!(self.sqft, Some(v) if v == 0.0) {
            return Err(ValuationError::input("sqft", "must be positive"));
        }

        Ok(())
    }
}

/// A third-party point estimate with its blend weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointEstimate {
    pub source: String,
    pub value: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// Either a dispersion-derived score or a tier label
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Confidence {
    Score(f64),
    Level(ConfidenceLevel),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source: String,
    pub value: f64,
    /// Normalized weight (all contributions sum to 1.0)
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub arv: f64,
    /// Human-readable derivation trail
    pub method: String,
    pub confidence: Confidence,
    pub renovation_premium: f64,
    pub sources: Vec<SourceContribution>,
    pub std_dev: Option<f64>,
    pub coefficient_of_variation: Option<f64>,
    pub comps_used: usize,
}

/// Mean ± one standard deviation over a flat list of estimates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub conservative: f64,
    pub moderate: f64,
    pub aggressive: f64,
    pub std_dev: f64,
    pub confidence_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchoolSignal {
    pub avg_rating: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkabilitySignal {
    pub walk_score: f64,
    pub transit_score: Option<f64>,
    pub bike_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalSignal {
    /// Higher is louder
    pub noise_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationSignals {
    pub schools: Option<SchoolSignal>,
    pub walkability: Option<WalkabilitySignal>,
    pub environmental: Option<EnvironmentalSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorAdjustment {
    pub premium: f64,
    pub amount: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationAdjustment {
    pub base_arv: f64,
    pub adjusted_arv: f64,
    pub schools: FactorAdjustment,
    pub walkability: FactorAdjustment,
    pub environmental: FactorAdjustment,
    pub total_adjustment: f64,
}

/// Last recorded sale of the subject, for trend validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSale {
    pub price: f64,
    pub date: NaiveDate,
    pub appreciation_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalVerdict {
    pub is_valid: bool,
    pub expected_value: f64,
    pub deviation_percent: f64,
    pub years_elapsed: f64,
    pub appreciation_rate: f64,
    pub warning: Option<String>,
}
