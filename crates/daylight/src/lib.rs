//! Sunrise and sunset computation
//!
//! Day length follows the CBM model from "A Model Comparison for Daylength
//! as a Function of Latitude and Day of Year" (Ecological Modelling 80,
//! 1995), with the sun's upper limb and refraction folded into a 0.8333°
//! horizon correction. Solar noon is corrected for longitude and the
//! equation of time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Geographic position in decimal degrees (north and east positive)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Hours of daylight at `latitude` on the given day of the year (1-366).
///
/// Clamps to 24.0 during polar day and 0.0 during polar night.
#[must_use]
pub fn day_length(latitude: f64, day_of_year: u32) -> f64 {
    let day = f64::from(day_of_year);
    let declination = (0.39795
        * (0.2163108 + 2.0 * (0.9671396 * (0.00860 * (day - 186.0)).tan()).atan()).cos())
    .asin();

    let lat = latitude.to_radians();
    let cos_hour_angle = (0.8333_f64.to_radians().sin() + lat.sin() * declination.sin())
        / (lat.cos() * declination.cos());

    24.0 - (24.0 / std::f64::consts::PI) * cos_hour_angle.clamp(-1.0, 1.0).acos()
}

/// Equation of time in minutes (apparent minus mean solar time)
#[must_use]
pub fn equation_of_time(day_of_year: u32) -> f64 {
    let b = (360.0 / 365.0 * (f64::from(day_of_year) - 81.0)).to_radians();
    9.87 * (2.0 * b).sin() - 7.53 * b.cos() - 1.5 * b.sin()
}

/// Instant of solar noon on `date` at the coordinate's longitude
#[must_use]
pub fn solar_noon(coordinate: Coordinate, date: NaiveDate) -> DateTime<Utc> {
    let minutes = 720.0 - 4.0 * coordinate.longitude - equation_of_time(date.ordinal());
    midnight(date) + minutes_to_duration(minutes)
}

/// Instant of sunrise on `date`
#[must_use]
pub fn sunrise(coordinate: Coordinate, date: NaiveDate) -> DateTime<Utc> {
    let half_day = day_length(coordinate.latitude, date.ordinal()) * 30.0;
    solar_noon(coordinate, date) - minutes_to_duration(half_day)
}

/// Instant of sunset on `date`
#[must_use]
pub fn sunset(coordinate: Coordinate, date: NaiveDate) -> DateTime<Utc> {
    let half_day = day_length(coordinate.latitude, date.ordinal()) * 30.0;
    solar_noon(coordinate, date) + minutes_to_duration(half_day)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[allow(clippy::cast_possible_truncation)]
fn minutes_to_duration(minutes: f64) -> Duration {
    Duration::milliseconds((minutes * 60_000.0).round() as i64)
}
