//! Historical validation - compare a proposed ARV against the last sale
//! price grown at an appreciation rate

use crate::error::{Result, ValuationError};
use crate::valuation::types::{HistoricalVerdict, LastSale};
use chrono::NaiveDate;
use tracing::warn;

const DAYS_PER_YEAR: f64 = 365.25;

/// Deviations beyond `threshold_percent` come back as a warning on the
/// verdict, never as an error.
pub fn validate(
    arv: f64,
    last_sale: &LastSale,
    default_rate: f64,
    threshold_percent: f64,
    today: NaiveDate,
) -> Result<HistoricalVerdict> {
    if !arv.is_finite() || arv <= 0.0 {
        return Err(ValuationError::input("arv", format!("must be positive, got {}", arv)));
    }
    if !last_sale.price.is_finite() || last_sale.price <= 0.0 {
        return Err(ValuationError::input(
            "last_sale.price",
            format!("must be positive, got {}", last_sale.price),
        ));
    }

    let rate = last_sale.appreciation_rate.unwrap_or(default_rate);
    if !rate.is_finite() || rate <= -1.0 {
        return Err(ValuationError::input(
            "appreciation_rate",
            format!("invalid rate {}", rate),
        ));
    }

    // A future-dated sale counts as no time elapsed
    let years_elapsed = (today - last_sale.date).num_days().max(0) as f64 / DAYS_PER_YEAR;
    let expected_value = last_sale.price * (1.0 + rate).powf(years_elapsed);
    let deviation_percent = (arv - expected_value) / expected_value * 100.0;
    let is_valid = deviation_percent.abs() <= threshold_percent;

    let warning = if is_valid {
        None
    } else {
        let direction = if deviation_percent > 0.0 { "above" } else { "below" };
        let message = format!(
            "ARV ${:.0} is {:.1}% {} the trend value ${:.0} ({:.1} years at {:.1}%/yr from ${:.0})",
            arv,
            deviation_percent.abs(),
            direction,
            expected_value,
            years_elapsed,
            rate * 100.0,
            last_sale.price
        );
        warn!("{}", message);
        Some(message)
    };

    Ok(HistoricalVerdict {
        is_valid,
        expected_value,
        deviation_percent,
        years_elapsed,
        appreciation_rate: rate,
        warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 15).unwrap()
    }

    fn sale(price: f64, date: NaiveDate, rate: Option<f64>) -> LastSale {
        LastSale {
            price,
            date,
            appreciation_rate: rate,
        }
    }

    #[test]
    fn test_within_trend() {
        let last = sale(300_000.0, today(), Some(0.04));

        let verdict = validate(330_000.0, &last, 0.04, 15.0, today()).unwrap();

        assert!(verdict.is_valid);
        assert_eq!(verdict.years_elapsed, 0.0);
        assert!((verdict.deviation_percent - 10.0).abs() < 1e-9);
        assert!(verdict.warning.is_none());
    }

    #[test]
    fn test_appreciation_compounds() {
        // 1461 days = exactly 4 years of 365.25 days
        let sold = today() - chrono::Duration::days(1461);
        let last = sale(100_000.0, sold, Some(0.10));

        let verdict = validate(146_410.0, &last, 0.04, 15.0, today()).unwrap();

        assert!((verdict.years_elapsed - 4.0).abs() < 1e-9);
        assert!((verdict.expected_value - 146_410.0).abs() < 1e-6);
        assert!(verdict.deviation_percent.abs() < 1e-6);
    }

    #[test]
    fn test_deviation_warns_but_succeeds() {
        let last = sale(300_000.0, today(), None);

        let verdict = validate(400_000.0, &last, 0.04, 15.0, today()).unwrap();

        assert!(!verdict.is_valid);
        assert_eq!(verdict.appreciation_rate, 0.04);
        let warning = verdict.warning.unwrap();
        assert!(warning.contains("above"));

        let low = validate(200_000.0, &last, 0.04, 15.0, today()).unwrap();
        assert!(low.warning.unwrap().contains("below"));
    }

    #[test]
    fn test_future_sale_date_counts_as_zero_years() {
        let future = today() + chrono::Duration::days(30);
        let last = sale(300_000.0, future, None);

        let verdict = validate(300_000.0, &last, 0.04, 15.0, today()).unwrap();

        assert_eq!(verdict.years_elapsed, 0.0);
        assert!(verdict.is_valid);
    }

    #[test]
    fn test_invalid_inputs() {
        let last = sale(0.0, today(), None);
        assert!(matches!(
            validate(300_000.0, &last, 0.04, 15.0, today()),
            Err(ValuationError::Input { field: "last_sale.price", .. })
        ));

        let last = sale(300_000.0, today(), None);
        assert!(matches!(
            validate(0.0, &last, 0.04, 15.0, today()),
            Err(ValuationError::Input { field: "arv", .. })
        ));
    }
}
