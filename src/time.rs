//! Conversions between decimal years and MJD2000 (days since 2000-01-01T00:00 UT).

use chrono::{Datelike, NaiveDate};

use crate::error::{ensure_finite, MagError, MagResult};

/// 2000-01-01 as a day number from 0001-01-01 of the proleptic Gregorian calendar.
const J2000_DAY: i64 = 730_120;

fn year_start(year: i32) -> MagResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| MagError::domain(format!("year {year} outside the supported calendar")))
}

fn days_in_year(year: i32) -> MagResult<f64> {
    let last = NaiveDate::from_ymd_opt(year, 12, 31)
        .ok_or_else(|| MagError::domain(format!("year {year} outside the supported calendar")))?;
    Ok(last.ordinal() as f64)
}

fn mjd2000_of(date: NaiveDate) -> i64 {
    date.num_days_from_ce() as i64 - J2000_DAY
}

/// Decimal year to MJD2000; the fraction is measured in days of that year
/// (365 or 366).
pub fn decimal_year_to_mjd2000(decimal_year: f64) -> MagResult<f64> {
    ensure_finite("decimal year", decimal_year)?;
    let year = decimal_year.floor();
    if year.abs() > 200_000.0 {
        return Err(MagError::domain(format!("year {year} outside the supported calendar")));
    }
    let year = year as i32;
    let start = mjd2000_of(year_start(year)?) as f64;
    Ok(start + (decimal_year - year as f64) * days_in_year(year)?)
}

/// MJD2000 to decimal year.
pub fn mjd2000_to_decimal_year(mjd2000: f64) -> MagResult<f64> {
    ensure_finite("MJD2000", mjd2000)?;
    let day = mjd2000.floor();
    if day.abs() > 7e7 {
        return Err(MagError::domain(format!("MJD2000 {mjd2000} outside the supported calendar")));
    }
    let date = NaiveDate::from_num_days_from_ce_opt((day as i64 + J2000_DAY) as i32)
        .ok_or_else(|| {
            MagError::domain(format!("MJD2000 {mjd2000} outside the supported calendar"))
        })?;
    let year = date.year();
    let start = mjd2000_of(year_start(year)?) as f64;
    Ok(year as f64 + (mjd2000 - start) / days_in_year(year)?)
}
