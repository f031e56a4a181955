//! Valuation engine - tiered comps ARV, multi-source blending and confidence

use crate::config::ValuationSettings;
use crate::error::{Result, ValuationError};
use crate::valuation::comps::partition_by_condition;
use crate::valuation::types::{
    ComparableSale, Confidence, ConfidenceInterval, ConfidenceLevel, PointEstimate,
    PropertyDescriptor, SourceContribution, ValuationResult,
};
use tracing::debug;

/// CV at or below this earns full confidence
const CV_FULL_CONFIDENCE: f64 = 0.05;
/// CV at or above this is pinned to the confidence floor
const CV_FLOOR: f64 = 0.20;
const CONFIDENCE_FLOOR: f64 = 50.0;

/// Source name carried by the comps-derived figure when blended
pub const COMPS_SOURCE: &str = "comps";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompsTier {
    Remodeled,
    Mixed,
    UnremodeledOnly,
    Fallback,
}

/// ARV derived purely from comps
#[derive(Debug, Clone, PartialEq)]
pub struct CompsValuation {
    pub arv: f64,
    pub premium: f64,
    pub tier: CompsTier,
    pub method: String,
    pub confidence: ConfidenceLevel,
    pub remodeled_count: usize,
    pub unremodeled_count: usize,
    pub comps_used: usize,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn prices(comps: &[&ComparableSale]) -> Vec<f64> {
    comps.iter().filter_map(|c| c.usable_price()).collect()
}

/// Tiered ARV from comps. First satisfied tier wins:
/// 1. at least 3 remodeled comps: their mean, no premium
/// 2. both remodeled and unremodeled: unremodeled mean × (1 + observed premium, capped)
/// 3. at least 3 unremodeled only: unremodeled mean × flat premium
/// 4. anything else: mean of all priced comps × fallback premium
///
/// Comps without a usable price are ignored.
pub fn value_from_comps(
    comps: &[ComparableSale],
    settings: &ValuationSettings,
) -> Result<CompsValuation> {
    let groups = partition_by_condition(comps);
    let remodeled = prices(&groups.remodeled);
    let unremodeled = prices(&groups.unremodeled);
    let all: Vec<f64> = comps.iter().filter_map(|c| c.usable_price()).collect();

    if all.is_empty() {
        return Err(ValuationError::InsufficientData(
            "no comps with a usable sale price".to_string(),
        ));
    }

    let (r, u) = (remodeled.len(), unremodeled.len());

    let valuation = match (mean(&remodeled), mean(&unremodeled)) {
        (Some(avg_remodeled), _) if r >= 3 => CompsValuation {
            arv: avg_remodeled,
            premium: 0.0,
            tier: CompsTier::Remodeled,
            method: format!("Average of {} remodeled comps", r),
            confidence: ConfidenceLevel::High,
            remodeled_count: r,
            unremodeled_count: u,
            comps_used: r,
        },
        (Some(avg_remodeled), Some(avg_unremodeled)) => {
            let observed = avg_remodeled / avg_unremodeled - 1.0;
            let premium = observed.min(settings.renovation_premium_cap);
            let confidence = if r >= 3 && u >= 3 {
                ConfidenceLevel::High
            } else if r >= 2 && u >= 2 {
                ConfidenceLevel::Medium
            } else {
                ConfidenceLevel::Low
            };

            if premium < observed {
                debug!(
                    "Renovation premium {:.1}% capped at {:.1}%",
                    observed * 100.0,
                    premium * 100.0
                );
            }

            CompsValuation {
                arv: avg_unremodeled * (1.0 + premium),
                premium,
                tier: CompsTier::Mixed,
                method: format!(
                    "Unremodeled average × (1 + {:.1}% renovation premium) from {} remodeled / {} unremodeled comps",
                    premium * 100.0,
                    r,
                    u
                ),
                confidence,
                remodeled_count: r,
                unremodeled_count: u,
                comps_used: r + u,
            }
        }
        (None, Some(avg_unremodeled)) if u >= 3 => CompsValuation {
            arv: avg_unremodeled * (1.0 + settings.unremodeled_premium),
            premium: settings.unremodeled_premium,
            tier: CompsTier::UnremodeledOnly,
            method: format!(
                "Average of {} unremodeled comps × {:.2} flat renovation premium",
                u,
                1.0 + settings.unremodeled_premium
            ),
            confidence: ConfidenceLevel::Medium,
            remodeled_count: 0,
            unremodeled_count: u,
            comps_used: u,
        },
        _ => {
            // `all` is non-empty, checked above
            let avg_all = mean(&all).unwrap_or_default();
            CompsValuation {
                arv: avg_all * (1.0 + settings.fallback_premium),
                premium: settings.fallback_premium,
                tier: CompsTier::Fallback,
                method: format!(
                    "Average of {} comps × {:.2} fallback premium",
                    all.len(),
                    1.0 + settings.fallback_premium
                ),
                confidence: ConfidenceLevel::Low,
                remodeled_count: r,
                unremodeled_count: u,
                comps_used: all.len(),
            }
        }
    };

    debug!("Comps valuation: {:.0} via {:?}", valuation.arv, valuation.tier);

    Ok(valuation)
}

/// 100 at CV ≤ 5%, falling linearly to 50 at CV = 20%, 50 beyond
pub fn confidence_from_cv(cv: f64) -> f64 {
    if !cv.is_finite() || cv >= CV_FLOOR {
        return CONFIDENCE_FLOOR;
    }
    if cv <= CV_FULL_CONFIDENCE {
        return 100.0;
    }
    let slope = (100.0 - CONFIDENCE_FLOOR) / (CV_FLOOR - CV_FULL_CONFIDENCE);
    100.0 - (cv - CV_FULL_CONFIDENCE) * slope
}

/// Weighted blend of point estimates
#[derive(Debug, Clone, PartialEq)]
pub struct Blend {
    pub arv: f64,
    pub contributions: Vec<SourceContribution>,
    /// None for a single source
    pub std_dev: Option<f64>,
    pub coefficient_of_variation: Option<f64>,
    pub confidence_score: Option<f64>,
    pub method: String,
}

fn validate_estimate(estimate: &PointEstimate) -> Result<()> {
    if !estimate.value.is_finite() || estimate.value <= 0.0 {
        return Err(ValuationError::input(
            "estimate.value",
            format!("{} reported {}", estimate.source, estimate.value),
        ));
    }
    if !estimate.weight.is_finite() || estimate.weight <= 0.0 {
        return Err(ValuationError::input(
            "estimate.weight",
            format!("{} has weight {}", estimate.source, estimate.weight),
        ));
    }
    Ok(())
}

/// Normalize weights to sum to 1 and blend. Any positive weight vector is
/// accepted.
pub fn blend_estimates(estimates: &[PointEstimate]) -> Result<Blend> {
    for estimate in estimates {
        validate_estimate(estimate)?;
    }

    match estimates {
        [] => Err(ValuationError::InsufficientData(
            "no point estimates to blend".to_string(),
        )),
        [only] => Ok(Blend {
            arv: only.value,
            contributions: vec![SourceContribution {
                source: only.source.clone(),
                value: only.value,
                weight: 1.0,
            }],
            std_dev: None,
            coefficient_of_variation: None,
            confidence_score: None,
            method: format!("Single source: {}", only.source),
        }),
        many => {
            let total_weight: f64 = many.iter().map(|e| e.weight).sum();
            let contributions: Vec<SourceContribution> = many
                .iter()
                .map(|e| SourceContribution {
                    source: e.source.clone(),
                    value: e.value,
                    weight: e.weight / total_weight,
                })
                .collect();

            let arv: f64 = contributions.iter().map(|c| c.value * c.weight).sum();
            let variance: f64 = contributions
                .iter()
                .map(|c| c.weight * (c.value - arv).powi(2))
                .sum();
            let std_dev = variance.sqrt();
            let cv = std_dev / arv;
            let confidence = confidence_from_cv(cv);

            let breakdown = contributions
                .iter()
                .map(|c| format!("{} {:.0}%", c.source, c.weight * 100.0))
                .collect::<Vec<_>>()
                .join(", ");

            Ok(Blend {
                arv,
                contributions,
                std_dev: Some(std_dev),
                coefficient_of_variation: Some(cv),
                confidence_score: Some(confidence),
                method: format!("Weighted blend of {} sources ({})", many.len(), breakdown),
            })
        }
    }
}

/// Attach the historical default tier weights to external estimates, in
/// order. Estimates beyond the configured list reuse its last weight.
pub fn with_default_weights(
    values: Vec<(String, f64)>,
    settings: &ValuationSettings,
) -> Vec<PointEstimate> {
    let fallback = settings.estimate_weights.last().copied().unwrap_or(0.25);

    values
        .into_iter()
        .enumerate()
        .map(|(idx, (source, value))| PointEstimate {
            source,
            value,
            weight: settings.estimate_weights.get(idx).copied().unwrap_or(fallback),
        })
        .collect()
}

/// Produce an ARV from scored comps plus optional third-party estimates.
/// Comps are required; estimates only ever refine a comps-backed figure.
pub fn valuate(
    comps: &[ComparableSale],
    estimates: &[PointEstimate],
    subject: &PropertyDescriptor,
    settings: &ValuationSettings,
) -> Result<ValuationResult> {
    subject.validate()?;

    let from_comps = value_from_comps(comps, settings)?;

    if estimates.is_empty() {
        return Ok(ValuationResult {
            arv: from_comps.arv,
            method: format!("Single source (comps): {}", from_comps.method),
            confidence: Confidence::Level(from_comps.confidence),
            renovation_premium: from_comps.premium,
            sources: vec![SourceContribution {
                source: COMPS_SOURCE.to_string(),
                value: from_comps.arv,
                weight: 1.0,
            }],
            std_dev: None,
            coefficient_of_variation: None,
            comps_used: from_comps.comps_used,
        });
    }

    let mut all = Vec::with_capacity(estimates.len() + 1);
    all.push(PointEstimate {
        source: COMPS_SOURCE.to_string(),
        value: from_comps.arv,
        weight: settings.comps_weight,
    });
    all.extend_from_slice(estimates);

    let blend = blend_estimates(&all)?;
    let confidence = blend
        .confidence_score
        .map(Confidence::Score)
        .unwrap_or(Confidence::Level(from_comps.confidence));

    debug!(
        "Blended ARV {:.0} from {} sources (comps {:.0})",
        blend.arv,
        all.len(),
        from_comps.arv
    );

    Ok(ValuationResult {
        arv: blend.arv,
        method: format!("{}; comps: {}", blend.method, from_comps.method),
        confidence,
        renovation_premium: from_comps.premium,
        sources: blend.contributions,
        std_dev: blend.std_dev,
        coefficient_of_variation: blend.coefficient_of_variation,
        comps_used: from_comps.comps_used,
    })
}

/// Mean ± one population standard deviation (68% band)
pub fn confidence_interval(values: &[f64]) -> Result<ConfidenceInterval> {
    if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
        return Err(ValuationError::input("estimates", "values must be positive"));
    }
    let moderate = mean(values).ok_or_else(|| {
        ValuationError::InsufficientData("no estimates for a confidence interval".to_string())
    })?;

    let variance =
        values.iter().map(|v| (v - moderate).powi(2)).sum::<f64>() / values.len() as f64;
    let std_dev = variance.sqrt();

    Ok(ConfidenceInterval {
        conservative: moderate - std_dev,
        moderate,
        aggressive: moderate + std_dev,
        std_dev,
        confidence_level: "68%".to_string(),
    })
}
