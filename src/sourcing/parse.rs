//! Parse functions - turn provider JSON payloads into valuation inputs
//!
//! Providers disagree on field names and formats, so every field is looked up
//! under a list of aliases and numbers are accepted as strings with `$` and
//! thousands separators.

use crate::error::{Result, ValuationError};
use crate::valuation::types::{
    ComparableSale, CompSource, Condition, EnvironmentalSignal, LocationSignals, PointEstimate,
    SchoolSignal, WalkabilitySignal,
};
use chrono::DateTime;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Keys a comps array may be wrapped under
const WRAPPERS: [&str; 4] = ["comps", "comparables", "results", "data"];

const ADDRESS: &[&str] = &["address", "streetAddress", "formattedAddress", "fullAddress"];
const ZIP: &[&str] = &["zip", "zipcode", "zipCode", "postalCode", "postal_code"];
const PRICE: &[&str] = &["price", "soldPrice", "lastSoldPrice", "salePrice", "sold_price"];
const SQFT: &[&str] = &["sqft", "livingArea", "squareFootage", "living_area", "square_feet"];
const BEDS: &[&str] = &["beds", "bedrooms", "bedroomCount"];
const BATHS: &[&str] = &["baths", "bathrooms", "bathroomCount"];
const SALE_DATE: &[&str] = &["saleDate", "sale_date", "soldDate", "dateSold", "lastSoldDate"];
const DISTANCE: &[&str] = &["distance", "distanceMiles", "distance_miles"];
const CONDITION: &[&str] = &["condition", "renovationStatus", "renovation_status", "remodeled"];
const DATA_SOURCE: &[&str] = &["dataSource", "data_source", "compSource"];
const ESTIMATE: &[&str] = &["value", "estimate", "zestimate", "price"];

/// First non-null value stored under any of `keys`
fn pick<'a>(row: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| row.get(*k))
        .find(|v| !v.is_null())
}

/// Number or numeric string like "$1,250,000"
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(['$', ','], "").trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Date as a string, or epoch milliseconds/seconds normalized to YYYY-MM-DD
fn sale_date(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Anything past ~1973 in milliseconds is larger than any seconds value we'd see
            let seconds = if raw.abs() > 100_000_000_000 { raw / 1000 } else { raw };
            DateTime::from_timestamp(seconds, 0).map(|t| t.format("%Y-%m-%d").to_string())
        }
        _ => None,
    }
}

fn condition(value: &Value) -> Condition {
    match value {
        Value::Bool(true) => Condition::Remodeled,
        Value::Bool(false) => Condition::Unremodeled,
        Value::String(s) => Condition::from_tag(s),
        _ => Condition::Unknown,
    }
}

/// Find the comps array inside a payload
fn comp_rows(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(rows) => Some(rows),
        Value::Object(map) => WRAPPERS
            .iter()
            .filter_map(|k| map.get(*k))
            .find_map(comp_rows),
        _ => None,
    }
}

/// Parse a provider comps payload. Rows that can't be read are skipped.
/// `default_tier` is used for rows that carry no source tag of their own.
pub fn parse_comps(payload: &Value, default_tier: CompSource) -> Result<Vec<ComparableSale>> {
    let rows = comp_rows(payload).ok_or_else(|| {
        ValuationError::Parse("expected an array of comparables".to_string())
    })?;

    let mut comps = Vec::with_capacity(rows.len());
    let mut parse_errors = 0;

    for (idx, row) in rows.iter().enumerate() {
        match parse_comp_row(row, default_tier) {
            Ok(comp) => comps.push(comp),
            Err(e) => {
                parse_errors += 1;
                if parse_errors <= 10 {
                    // Only log first 10 errors
                    warn!("Failed to parse comp {}: {}", idx, e);
                }
            }
        }
    }

    info!("Parsed {} comps ({} errors)", comps.len(), parse_errors);
    Ok(comps)
}

fn parse_comp_row(row: &Value, default_tier: CompSource) -> Result<ComparableSale> {
    let row = row
        .as_object()
        .ok_or_else(|| ValuationError::Parse("row is not an object".to_string()))?;

    // Some providers nest the address as {streetAddress, zipcode, ...}
    let (address, nested_zip) = match pick(row, ADDRESS) {
        Some(Value::Object(parts)) => (
            pick(parts, &["streetAddress", "street", "line", "address"]).and_then(text),
            pick(parts, ZIP).and_then(text),
        ),
        Some(other) => (text(other), None),
        None => (None, None),
    };

    let price = match pick(row, PRICE) {
        Some(raw) => Some(number(raw).ok_or_else(|| {
            ValuationError::Parse(format!("unreadable price {}", raw))
        })?),
        None => None,
    };

    let data_source = match pick(row, DATA_SOURCE).and_then(|v| v.as_str()) {
        Some(tag) => CompSource::from_tag(tag),
        None => default_tier,
    };

    Ok(ComparableSale {
        address,
        zip: pick(row, ZIP).and_then(text).or(nested_zip),
        price,
        sqft: pick(row, SQFT).and_then(number),
        beds: pick(row, BEDS).and_then(number),
        baths: pick(row, BATHS).and_then(number),
        sale_date: pick(row, SALE_DATE).and_then(sale_date),
        distance_miles: pick(row, DISTANCE).and_then(number),
        condition: pick(row, CONDITION).map(condition).unwrap_or_default(),
        data_source,
        quality_score: None,
    })
}

/// Parse a single point estimate, either a bare number or an object holding
/// one under a known key (optionally wrapped in `data`)
pub fn parse_estimate(payload: &Value, source: &str, weight: f64) -> Result<PointEstimate> {
    let value = match payload {
        Value::Object(map) => pick(map, ESTIMATE).and_then(number).or_else(|| {
            map.get("data")
                .and_then(|d| d.as_object())
                .and_then(|d| pick(d, ESTIMATE))
                .and_then(number)
        }),
        other => number(other),
    };

    match value {
        Some(value) if value > 0.0 => Ok(PointEstimate {
            source: source.to_string(),
            value,
            weight,
        }),
        _ => Err(ValuationError::Parse(format!(
            "no usable estimate in {} payload",
            source
        ))),
    }
}

/// Average school rating from `{avgRating}` or a list of `{rating}` entries
fn school_rating(value: &Value) -> Option<f64> {
    match value {
        Value::Object(map) => pick(map, &["avgRating", "avg_rating", "averageRating", "rating"])
            .and_then(number),
        Value::Array(schools) => {
            let ratings: Vec<f64> = schools
                .iter()
                .filter_map(|s| s.as_object())
                .filter_map(|s| pick(s, &["rating", "greatSchoolsRating"]).and_then(number))
                .collect();
            if ratings.is_empty() {
                None
            } else {
                Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
            }
        }
        other => number(other),
    }
}

/// Parse location signals. Missing signals stay `None` and contribute nothing.
pub fn parse_location_signals(payload: &Value) -> Result<LocationSignals> {
    let map = match payload {
        Value::Object(map) => match map.get("data") {
            Some(Value::Object(inner)) => inner,
            _ => map,
        },
        _ => {
            return Err(ValuationError::Parse(
                "location payload must be an object".to_string(),
            ))
        }
    };

    let schools = pick(map, &["schools", "schoolRating", "school_rating"])
        .and_then(school_rating)
        .map(|avg_rating| SchoolSignal { avg_rating });

    let walkability = pick(map, &["walkScore", "walk_score", "walkscore"])
        .and_then(number)
        .map(|walk_score| WalkabilitySignal {
            walk_score,
            transit_score: pick(map, &["transitScore", "transit_score"]).and_then(number),
            bike_score: pick(map, &["bikeScore", "bike_score"]).and_then(number),
        });

    let environmental = pick(map, &["noiseScore", "noise_score", "noise"])
        .and_then(number)
        .map(|noise_score| EnvironmentalSignal { noise_score });

    Ok(LocationSignals {
        schools,
        walkability,
        environmental,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wrapped_comps_with_aliases() {
        let payload = json!({
            "comps": [
                {
                    "streetAddress": "1 A St",
                    "zipcode": 78701,
                    "soldPrice": "$400,000",
                    "livingArea": 1500,
                    "bedrooms": 3,
                    "bathrooms": 2.5,
                    "dateSold": "2025-09-01",
                    "distanceMiles": 0.4,
                    "renovationStatus": "Fully renovated",
                    "dataSource": "ai_matched"
                }
            ]
        });

        let comps = parse_comps(&payload, CompSource::GenericSearch).unwrap();

        assert_eq!(comps.len(), 1);
        let comp = &comps[0];
        assert_eq!(comp.address.as_deref(), Some("1 A St"));
        assert_eq!(comp.zip.as_deref(), Some("78701"));
        assert_eq!(comp.price, Some(400_000.0));
        assert_eq!(comp.sqft, Some(1500.0));
        assert_eq!(comp.baths, Some(2.5));
        assert_eq!(comp.sale_date.as_deref(), Some("2025-09-01"));
        assert_eq!(comp.distance_miles, Some(0.4));
        assert_eq!(comp.condition, Condition::Remodeled);
        assert_eq!(comp.data_source, CompSource::AiMatched);
        assert_eq!(comp.quality_score, None);
    }

    #[test]
    fn test_parse_bare_array_uses_default_tier() {
        let payload = json!([
            {"address": "2 B St", "price": 320000, "condition": "needs work"},
            {"address": "3 C St", "price": 330000}
        ]);

        let comps = parse_comps(&payload, CompSource::FilteredSearch).unwrap();

        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].condition, Condition::Unremodeled);
        assert_eq!(comps[1].condition, Condition::Unknown);
        assert!(comps.iter().all(|c| c.data_source == CompSource::FilteredSearch));
    }

    #[test]
    fn test_nested_wrappers_and_address_objects() {
        let payload = json!({
            "data": {
                "results": [
                    {
                        "address": {"streetAddress": "4 D St", "zipcode": "78702"},
                        "lastSoldPrice": 350000,
                        "lastSoldDate": 1756684800000i64
                    }
                ]
            }
        });

        let comps = parse_comps(&payload, CompSource::Unknown).unwrap();

        assert_eq!(comps[0].address.as_deref(), Some("4 D St"));
        assert_eq!(comps[0].zip.as_deref(), Some("78702"));
        assert_eq!(comps[0].sale_date.as_deref(), Some("2025-09-01"));
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let payload = json!([
            "not a row",
            {"address": "5 E St", "price": "call for price"},
            {"address": "6 F St", "price": 300000}
        ]);

        let comps = parse_comps(&payload, CompSource::Unknown).unwrap();

        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].address.as_deref(), Some("6 F St"));
    }

    #[test]
    fn test_payload_without_comps() {
        assert!(matches!(
            parse_comps(&json!({"message": "ok"}), CompSource::Unknown),
            Err(ValuationError::Parse(_))
        ));
        assert!(parse_comps(&json!({"comps": []}), CompSource::Unknown)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_boolean_condition() {
        let payload = json!([
            {"price": 1, "remodeled": true},
            {"price": 1, "remodeled": false}
        ]);

        let comps = parse_comps(&payload, CompSource::Unknown).unwrap();

        assert_eq!(comps[0].condition, Condition::Remodeled);
        assert_eq!(comps[1].condition, Condition::Unremodeled);
    }

    #[test]
    fn test_parse_estimate() {
        let zestimate = parse_estimate(&json!({"zestimate": 812000}), "zillow", 0.25).unwrap();
        assert_eq!(zestimate.value, 812_000.0);
        assert_eq!(zestimate.source, "zillow");
        assert_eq!(zestimate.weight, 0.25);

        let wrapped = parse_estimate(&json!({"data": {"value": "$790,500"}}), "redfin", 0.25).unwrap();
        assert_eq!(wrapped.value, 790_500.0);

        let bare = parse_estimate(&json!(800000), "x", 1.0).unwrap();
        assert_eq!(bare.value, 800_000.0);

        assert!(parse_estimate(&json!({"value": 0}), "x", 1.0).is_err());
        assert!(parse_estimate(&json!({"other": 1}), "x", 1.0).is_err());
    }

    #[test]
    fn test_parse_location_signals() {
        let signals = parse_location_signals(&json!({
            "schools": {"avgRating": 8.5},
            "walkScore": 75,
            "transitScore": "40",
            "noiseScore": 45
        }))
        .unwrap();

        assert_eq!(signals.schools, Some(SchoolSignal { avg_rating: 8.5 }));
        let walk = signals.walkability.unwrap();
        assert_eq!(walk.walk_score, 75.0);
        assert_eq!(walk.transit_score, Some(40.0));
        assert_eq!(walk.bike_score, None);
        assert_eq!(signals.environmental, Some(EnvironmentalSignal { noise_score: 45.0 }));
    }

    #[test]
    fn test_school_list_is_averaged() {
        let signals = parse_location_signals(&json!({
            "schools": [{"rating": 9}, {"rating": 7}, {"name": "unrated"}]
        }))
        .unwrap();

        assert_eq!(signals.schools, Some(SchoolSignal { avg_rating: 8.0 }));
        assert!(signals.walkability.is_none());
        assert!(signals.environmental.is_none());
    }

    #[test]
    fn test_location_payload_must_be_object() {
        assert!(parse_location_signals(&json!([1, 2])).is_err());
    }
}
