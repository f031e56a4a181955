//! Appraisal pipeline - filter & score -> valuate -> location adjust -> validate

use crate::config::Settings;
use crate::error::Result;
use crate::valuation::types::{
    ComparableSale, ConfidenceInterval, HistoricalVerdict, LastSale, LocationAdjustment,
    LocationSignals, PointEstimate, PropertyDescriptor, ValuationResult,
};
use crate::valuation::{comps, engine, history, location};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Everything the caller gathered for one property
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppraisalRequest {
    pub property: PropertyDescriptor,
    #[serde(default)]
    pub comps: Vec<ComparableSale>,
    #[serde(default)]
    pub estimates: Vec<PointEstimate>,
    pub location: Option<LocationSignals>,
    pub last_sale: Option<LastSale>,
}

/// Final valuation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appraisal {
    pub id: Uuid,
    pub property: PropertyDescriptor,
    pub evaluated_on: NaiveDate,
    pub valuation: ValuationResult,
    /// Spread of the blended sources, when there are at least two
    pub interval: Option<ConfidenceInterval>,
    pub location: Option<LocationAdjustment>,
    pub history: Option<HistoricalVerdict>,
    /// Scored comps, most relevant first
    pub comps: Vec<ComparableSale>,
    /// ARV after location adjustment, or the raw ARV when no signals were given
    pub final_arv: f64,
}

/// Run the whole pipeline for one request
pub fn appraise(request: AppraisalRequest, today: NaiveDate, settings: &Settings) -> Result<Appraisal> {
    request.property.validate()?;

    let AppraisalRequest {
        property,
        comps,
        estimates,
        location: signals,
        last_sale,
    } = request;

    // Step 1: Filter & score comps
    let raw_count = comps.len();
    let scored = comps::score_comps(comps, &property, today, &settings.comps);
    info!("Scored {} of {} comps for {}", scored.len(), raw_count, property.address);

    // Step 2: Valuate
    let valuation = engine::valuate(&scored, &estimates, &property, &settings.valuation)?;
    info!("ARV {:.0} for {} ({})", valuation.arv, property.address, valuation.method);

    let interval = if valuation.sources.len() >= 2 {
        let values: Vec<f64> = valuation.sources.iter().map(|s| s.value).collect();
        Some(engine::confidence_interval(&values)?)
    } else {
        None
    };

    // Step 3: Location adjustment
    let location = signals
        .map(|s| location::adjust(valuation.arv, &s))
        .transpose()?;
    let final_arv = location
        .as_ref()
        .map(|l| l.adjusted_arv)
        .unwrap_or(valuation.arv);

    // Step 4: Historical sanity check
    let history = last_sale
        .map(|sale| {
            history::validate(
                final_arv,
                &sale,
                settings.valuation.default_appreciation_rate,
                settings.valuation.deviation_threshold_percent,
                today,
            )
        })
        .transpose()?;

    Ok(Appraisal {
        id: Uuid::new_v4(),
        property,
        evaluated_on: today,
        valuation,
        interval,
        location,
        history,
        comps: scored,
        final_arv,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValuationError;
    use crate::valuation::types::{
        CompSource, Condition, EnvironmentalSignal, SchoolSignal, WalkabilitySignal,
    };

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 15).unwrap()
    }

    fn property() -> PropertyDescriptor {
        PropertyDescriptor {
            address: "10 Smith St".to_string(),
            city: "Austin".to_string(),
            state: "TX".to_string(),
            zip: "78701".to_string(),
            sqft: Some(1500.0),
            beds: Some(3.0),
            baths: Some(2.0),
            purchase_price: Some(280_000.0),
        }
    }

    fn comp(address: &str, price: f64, condition: Condition, sale_date: &str) -> ComparableSale {
        ComparableSale {
            address: Some(address.to_string()),
            zip: Some("78701".to_string()),
            price: Some(price),
            sqft: Some(1500.0),
            beds: Some(3.0),
            baths: Some(2.0),
            sale_date: Some(sale_date.to_string()),
            distance_miles: Some(0.8),
            condition,
            data_source: CompSource::FilteredSearch,
            quality_score: None,
        }
    }

    #[test]
    fn test_full_pipeline() {
        let request = AppraisalRequest {
            property: property(),
            comps: vec![
                comp("1 A St", 400_000.0, Condition::Remodeled, "2025-09-01"),
                comp("2 B St", 320_000.0, Condition::Unremodeled, "2025-08-01"),
                // too old, filtered out
                comp("3 C St", 900_000.0, Condition::Remodeled, "2021-01-01"),
            ],
            estimates: vec![],
            location: Some(LocationSignals {
                schools: Some(SchoolSignal { avg_rating: 8.5 }),
                walkability: Some(WalkabilitySignal {
                    walk_score: 75.0,
                    transit_score: None,
                    bike_score: None,
                }),
                environmental: Some(EnvironmentalSignal { noise_score: 45.0 }),
            }),
            last_sale: Some(LastSale {
                price: 300_000.0,
                date: NaiveDate::from_ymd_opt(2024, 11, 15).unwrap(),
                appreciation_rate: Some(0.04),
            }),
        };

        let appraisal = appraise(request, today(), &Settings::default()).unwrap();

        assert_eq!(appraisal.comps.len(), 2);
        assert!((appraisal.valuation.arv - 400_000.0).abs() < 1e-6);
        assert!((appraisal.valuation.renovation_premium - 0.25).abs() < 1e-9);

        let location = appraisal.location.as_ref().unwrap();
        assert!((location.adjusted_arv - 484_000.0).abs() < 1e-6);
        assert_eq!(appraisal.final_arv, location.adjusted_arv);

        // 484k against ~312k trend is far outside 15%
        let history = appraisal.history.unwrap();
        assert!(!history.is_valid);
        assert!(history.warning.is_some());
    }

    #[test]
    fn test_pipeline_without_optional_stages() {
        let request = AppraisalRequest {
            property: property(),
            comps: vec![
                comp("1 A St", 300_000.0, Condition::Remodeled, "2025-09-01"),
                comp("2 B St", 310_000.0, Condition::Remodeled, "2025-08-01"),
                comp("3 C St", 320_000.0, Condition::Remodeled, "2025-07-01"),
            ],
            estimates: vec![],
            location: None,
            last_sale: None,
        };

        let appraisal = appraise(request, today(), &Settings::default()).unwrap();

        assert!(appraisal.location.is_none());
        assert!(appraisal.history.is_none());
        assert!(appraisal.interval.is_none());
        assert_eq!(appraisal.final_arv, appraisal.valuation.arv);
    }

    #[test]
    fn test_blended_pipeline_reports_interval() {
        let request = AppraisalRequest {
            property: property(),
            comps: vec![
                comp("1 A St", 800_000.0, Condition::Remodeled, "2025-09-01"),
                comp("2 B St", 800_000.0, Condition::Remodeled, "2025-08-01"),
                comp("3 C St", 800_000.0, Condition::Remodeled, "2025-07-01"),
            ],
            estimates: vec![PointEstimate {
                source: "zillow".to_string(),
                value: 820_000.0,
                weight: 0.5,
            }],
            location: None,
            last_sale: None,
        };

        let appraisal = appraise(request, today(), &Settings::default()).unwrap();

        assert!((appraisal.valuation.arv - 810_000.0).abs() < 1e-6);
        let interval = appraisal.interval.unwrap();
        assert!((interval.moderate - 810_000.0).abs() < 1e-6);
        assert!((interval.std_dev - 10_000.0).abs() < 1e-6);
        assert_eq!(interval.confidence_level, "68%");
    }

    #[test]
    fn test_pipeline_with_no_usable_comps() {
        let request = AppraisalRequest {
            property: property(),
            comps: vec![comp("1 A St", 300_000.0, Condition::Remodeled, "2019-01-01")],
            estimates: vec![],
            location: None,
            last_sale: None,
        };

        let result = appraise(request, today(), &Settings::default());

        assert!(matches!(result, Err(ValuationError::InsufficientData(_))));
    }
}
