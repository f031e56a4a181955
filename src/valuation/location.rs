//! Location adjustment - bounded additive premiums from school, walkability
//! and noise signals

use crate::error::{Result, ValuationError};
use crate::valuation::types::{
    EnvironmentalSignal, FactorAdjustment, LocationAdjustment, LocationSignals, SchoolSignal,
    WalkabilitySignal,
};
use tracing::debug;

/// Walkability's own total never exceeds this, transit and bike bonuses included
const WALKABILITY_CAP: f64 = 0.10;

pub fn school_premium(schools: Option<&SchoolSignal>) -> (f64, String) {
    let Some(rating) = schools.map(|s| s.avg_rating).filter(|r| *r > 0.0) else {
        return (0.0, "No school data".to_string());
    };

    let (premium, tier) = if rating >= 8.0 {
        (0.15, "excellent")
    } else if rating >= 6.0 {
        (0.05, "good")
    } else if rating >= 4.0 {
        (0.0, "average")
    } else if rating >= 2.0 {
        (-0.03, "below average")
    } else {
        (-0.05, "poor")
    };

    (premium, format!("Schools rated {:.1}/10 ({})", rating, tier))
}

pub fn walkability_premium(walkability: Option<&WalkabilitySignal>) -> (f64, String) {
    let Some(signal) = walkability else {
        return (0.0, "No walkability data".to_string());
    };

    let walk: f64 = if signal.walk_score >= 90.0 {
        0.07
    } else if signal.walk_score >= 70.0 {
        0.05
    } else if signal.walk_score >= 50.0 {
        0.02
    } else if signal.walk_score >= 25.0 {
        0.0
    } else {
        -0.02
    };

    let transit = match signal.transit_score {
        Some(t) if t >= 70.0 => 0.02,
        Some(t) if t >= 50.0 => 0.01,
        _ => 0.0,
    };

    let bike = match signal.bike_score {
        Some(b) if b >= 70.0 => 0.01,
        _ => 0.0,
    };

    let premium = (walk + transit + bike).min(WALKABILITY_CAP);

    let mut description = format!("Walk score {:.0}", signal.walk_score);
    if let Some(t) = signal.transit_score {
        description.push_str(&format!(", transit {:.0}", t));
    }
    if let Some(b) = signal.bike_score {
        description.push_str(&format!(", bike {:.0}", b));
    }

    (premium, description)
}

pub fn environmental_premium(environmental: Option<&EnvironmentalSignal>) -> (f64, String) {
    let Some(noise) = environmental.map(|e| e.noise_score) else {
        return (0.0, "No noise data".to_string());
    };

    let (premium, tier) = if noise < 40.0 {
        (0.03, "very quiet")
    } else if noise < 50.0 {
        (0.01, "quiet")
    } else if noise < 60.0 {
        (0.0, "moderate")
    } else if noise < 70.0 {
        (-0.02, "noisy")
    } else {
        (-0.03, "very noisy")
    };

    (premium, format!("Noise score {:.0} ({})", noise, tier))
}

fn factor(base_arv: f64, (premium, description): (f64, String)) -> FactorAdjustment {
    FactorAdjustment {
        premium,
        amount: base_arv * premium,
        description,
    }
}

/// Sum the per-factor premiums and apply them to the base ARV
pub fn adjust(base_arv: f64, signals: &LocationSignals) -> Result<LocationAdjustment> {
    if !base_arv.is_finite() || base_arv <= 0.0 {
        return Err(ValuationError::input(
            "base_arv",
            format!("must be positive, got {}", base_arv),
        ));
    }

    let schools = factor(base_arv, school_premium(signals.schools.as_ref()));
    let walkability = factor(base_arv, walkability_premium(signals.walkability.as_ref()));
    let environmental = factor(base_arv, environmental_premium(signals.environmental.as_ref()));

    let total_adjustment = schools.premium + walkability.premium + environmental.premium;
    let adjusted_arv = base_arv * (1.0 + total_adjustment);

    debug!(
        "Location adjustment {:+.1}%: {:.0} -> {:.0}",
        total_adjustment * 100.0,
        base_arv,
        adjusted_arv
    );

    Ok(LocationAdjustment {
        base_arv,
        adjusted_arv,
        schools,
        walkability,
        environmental,
        total_adjustment,
    })
}
