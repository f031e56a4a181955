//! Comps filter & scorer - narrow raw comparable sales and rank them
//! Pure functions, no side effects

use crate::config::CompsSettings;
use crate::valuation::types::{ComparableSale, Condition, PropertyDescriptor};
use chrono::{Months, NaiveDate};
use tracing::debug;

const DAYS_PER_MONTH: f64 = 30.4375;

/// Parse a provider sale date. Accepts ISO dates, ISO timestamps and US
/// MM/DD/YYYY.
pub fn parse_sale_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);

    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%m/%d/%Y"))
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y/%m/%d"))
        .ok()
}

/// Drop comps whose sale date is missing, unparsable, or older than the
/// lookback window
pub fn filter_by_recency(
    comps: Vec<ComparableSale>,
    today: NaiveDate,
    lookback_months: u32,
) -> Vec<ComparableSale> {
    let cutoff = today
        .checked_sub_months(Months::new(lookback_months))
        .unwrap_or(NaiveDate::MIN);

    comps
        .into_iter()
        .filter(|comp| {
            match comp.sale_date.as_deref().and_then(parse_sale_date) {
                Some(date) => date >= cutoff,
                None => {
                    debug!("Dropping comp {:?}: missing or unparsable sale date", comp.address);
                    false
                }
            }
        })
        .collect()
}

/// True when every attribute known on both sides is within tolerance.
/// Attributes missing on either side cannot disqualify a comp.
pub fn is_similar(
    comp: &ComparableSale,
    subject: &PropertyDescriptor,
    settings: &CompsSettings,
) -> bool {
    let sqft_ok = match (comp.sqft, subject.sqft) {
        (Some(c), Some(s)) if s > 0.0 => ((c - s) / s).abs() <= settings.sqft_tolerance,
        _ => true,
    };
    let beds_ok = match (comp.beds, subject.beds) {
        (Some(c), Some(s)) => (c - s).abs() <= settings.beds_tolerance,
        _ => true,
    };
    let baths_ok = match (comp.baths, subject.baths) {
        (Some(c), Some(s)) => (c - s).abs() <= settings.baths_tolerance,
        _ => true,
    };

    sqft_ok && beds_ok && baths_ok
}

/// Keep similar comps, falling back to the full input when too few survive
pub fn filter_by_similarity(
    comps: Vec<ComparableSale>,
    subject: &PropertyDescriptor,
    settings: &CompsSettings,
) -> Vec<ComparableSale> {
    let similar: Vec<ComparableSale> = comps
        .iter()
        .filter(|comp| is_similar(comp, subject, settings))
        .cloned()
        .collect();

    if similar.len() < settings.min_similar {
        debug!(
            "Only {} of {} comps similar to subject, keeping the recency-filtered set",
            similar.len(),
            comps.len()
        );
        return comps;
    }

    similar
}

/// Recency then similarity. Idempotent for a fixed `today`.
pub fn filter_comps(
    comps: Vec<ComparableSale>,
    subject: &PropertyDescriptor,
    today: NaiveDate,
    settings: &CompsSettings,
) -> Vec<ComparableSale> {
    let recent = filter_by_recency(comps, today, settings.lookback_months);
    filter_by_similarity(recent, subject, settings)
}

/// Comps partitioned by their explicit condition tag
#[derive(Debug, Default)]
pub struct ConditionGroups<'a> {
    pub remodeled: Vec<&'a ComparableSale>,
    pub unremodeled: Vec<&'a ComparableSale>,
    pub unknown: Vec<&'a ComparableSale>,
}

pub fn partition_by_condition(comps: &[ComparableSale]) -> ConditionGroups<'_> {
    let mut groups = ConditionGroups::default();

    for comp in comps {
        match comp.condition {
            Condition::Remodeled => groups.remodeled.push(comp),
            Condition::Unremodeled => groups.unremodeled.push(comp),
            Condition::Unknown => groups.unknown.push(comp),
        }
    }

    groups
}

fn recency_bonus(sale_date: Option<NaiveDate>, today: NaiveDate) -> u8 {
    let Some(date) = sale_date else {
        return 0;
    };
    let months = (today - date).num_days().max(0) as f64 / DAYS_PER_MONTH;

    if months <= 3.0 {
        20
    } else if months <= 6.0 {
        15
    } else if months <= 12.0 {
        10
    } else if months <= 24.0 {
        5
    } else {
        0
    }
}

fn distance_bonus(distance_miles: Option<f64>) -> u8 {
    match distance_miles {
        Some(d) if d <= 0.5 => 20,
        Some(d) if d <= 1.0 => 15,
        Some(d) if d <= 2.0 => 10,
        Some(d) if d <= 5.0 => 5,
        _ => 0,
    }
}

/// Additive 0-100 quality score
pub fn quality_score(comp: &ComparableSale, today: NaiveDate) -> u8 {
    let sale_date = comp.sale_date.as_deref().and_then(parse_sale_date);

    // Data completeness, max 40
    let present = [
        comp.address.as_deref().is_some_and(|a| !a.trim().is_empty()),
        comp.usable_price().is_some(),
        comp.sqft.is_some_and(|s| s > 0.0),
        sale_date.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count() as u8;
    let completeness = present * 10;

    completeness
        + recency_bonus(sale_date, today)
        + distance_bonus(comp.distance_miles)
        + comp.data_source.tier_bonus()
}

/// Produce a scored copy of a comp
pub fn score_comp(comp: ComparableSale, today: NaiveDate) -> ComparableSale {
    let score = quality_score(&comp, today);
    ComparableSale {
        quality_score: Some(score),
        ..comp
    }
}

/// Full filter & score pipeline, most relevant first. Ties keep input order.
pub fn score_comps(
    comps: Vec<ComparableSale>,
    subject: &PropertyDescriptor,
    today: NaiveDate,
    settings: &CompsSettings,
) -> Vec<ComparableSale> {
    let total = comps.len();
    let filtered = filter_comps(comps, subject, today, settings);

    let mut scored: Vec<ComparableSale> = filtered
        .into_iter()
        .map(|comp| score_comp(comp, today))
        .collect();

    // sort_by is stable
    scored.sort_by(|a, b| b.quality_score.cmp(&a.quality_score));

    debug!("Scored {} of {} comps", scored.len(), total);

    scored
}

/// Pull the last 5-digit token out of an address
fn zip_from_address(address: &str) -> Option<&str> {
    address
        .split(|c: char| !c.is_ascii_digit())
        .rev()
        .find(|token| token.len() == 5)
}

/// Keep only comps that provably sit in `zip`. Comps without a zip field
/// fall back to the zip embedded in their address; comps with neither are
/// not trusted.
pub fn retain_zip(comps: Vec<ComparableSale>, zip: &str) -> Vec<ComparableSale> {
    let wanted = zip.trim();

    comps
        .into_iter()
        .filter(|comp| {
            let comp_zip = comp
                .zip
                .as_deref()
                .map(str::trim)
                .or_else(|| comp.address.as_deref().and_then(zip_from_address));
            comp_zip.is_some_and(|z| z.get(..5).unwrap_or(z) == wanted)
        })
        .collect()
}
