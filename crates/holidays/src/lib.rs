//! Public holiday calendars
//!
//! A calendar is a list of rules, each resolving to at most one date per
//! year: a fixed month and day, an offset from Easter Sunday, or the first
//! given weekday on or after a fixed date.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// How a holiday's date is derived for a given year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolidayRule {
    /// Same month and day every year
    Fixed { month: u32, day: u32 },
    /// Days after (or before, if negative) Easter Sunday
    EasterOffset(i64),
    /// First `weekday` on or after `month`/`day`
    WeekdayOnOrAfter {
        weekday: Weekday,
        month: u32,
        day: u32,
    },
}

/// A named holiday
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holiday {
    pub name: &'static str,
    pub rule: HolidayRule,
}

impl Holiday {
    #[must_use]
    pub const fn new(name: &'static str, rule: HolidayRule) -> Self {
        Self { name, rule }
    }

    /// Date of this holiday in `year`
    #[must_use]
    pub fn date_in(&self, year: i32) -> Option<NaiveDate> {
        match self.rule {
            HolidayRule::Fixed { month, day } => NaiveDate::from_ymd_opt(year, month, day),
            HolidayRule::EasterOffset(days) => {
                easter_sunday(year).and_then(|easter| easter.checked_add_signed(Duration::days(days)))
            }
            HolidayRule::WeekdayOnOrAfter {
                weekday,
                month,
                day,
            } => {
                let start = NaiveDate::from_ymd_opt(year, month, day)?;
                let ahead = (7 + weekday.num_days_from_monday()
                    - start.weekday().num_days_from_monday())
                    % 7;
                start.checked_add_signed(Duration::days(i64::from(ahead)))
            }
        }
    }

    #[must_use]
    pub fn falls_on(&self, date: NaiveDate) -> bool {
        self.date_in(date.year()) == Some(date)
    }
}

/// Easter Sunday in the Gregorian calendar (anonymous Gregorian algorithm)
#[must_use]
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year.rem_euclid(19);
    let b = year.div_euclid(100);
    let c = year.rem_euclid(100);
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let n = h + l - 7 * m + 114;

    let month = u32::try_from(n / 31).ok()?;
    let day = u32::try_from(n % 31 + 1).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// A set of holidays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolidayCalendar {
    holidays: Vec<Holiday>,
}

impl HolidayCalendar {
    #[must_use]
    pub fn new(holidays: impl IntoIterator<Item = Holiday>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// A calendar without holidays
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Swedish public holidays and the customary days off around them
    #[must_use]
    pub fn swedish() -> Self {
        use HolidayRule::{EasterOffset, Fixed, WeekdayOnOrAfter};

        Self::new([
            Holiday::new("New Year's Day", Fixed { month: 1, day: 1 }),
            Holiday::new("Epiphany", Fixed { month: 1, day: 6 }),
            Holiday::new("Good Friday", EasterOffset(-2)),
            Holiday::new("Easter Sunday", EasterOffset(0)),
            Holiday::new("Easter Monday", EasterOffset(1)),
            Holiday::new("May Day", Fixed { month: 5, day: 1 }),
            Holiday::new("Ascension Day", EasterOffset(39)),
            Holiday::new("Whitsunday", EasterOffset(49)),
            Holiday::new("Whit Monday", EasterOffset(50)),
            Holiday::new("National Day", Fixed { month: 6, day: 6 }),
            Holiday::new(
                "Midsummer Eve",
                WeekdayOnOrAfter { weekday: Weekday::Fri, month: 6, day: 19 },
            ),
            Holiday::new(
                "Midsummer Day",
                WeekdayOnOrAfter { weekday: Weekday::Sat, month: 6, day: 20 },
            ),
            Holiday::new(
                "All Saints' Day",
                WeekdayOnOrAfter { weekday: Weekday::Sat, month: 10, day: 31 },
            ),
            Holiday::new("Christmas Eve", Fixed { month: 12, day: 24 }),
            Holiday::new("Christmas Day", Fixed { month: 12, day: 25 }),
            Holiday::new("Boxing Day", Fixed { month: 12, day: 26 }),
            Holiday::new("New Year's Eve", Fixed { month: 12, day: 31 }),
        ])
    }

    /// The holiday falling on `date`, if any
    #[must_use]
    pub fn holiday_on(&self, date: NaiveDate) -> Option<&Holiday> {
        self.holidays.iter().find(|holiday| holiday.falls_on(date))
    }

    #[must_use]
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holiday_on(date).is_some()
    }

    #[must_use]
    pub fn holidays(&self) -> &[Holiday] {
        &self.holidays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn named<'a>(calendar: &'a HolidayCalendar, name: &str) -> &'a Holiday {
        calendar.holidays().iter().find(|h| h.name == name).unwrap()
    }

    #[test]
    fn test_easter_sunday() {
        assert_eq!(easter_sunday(2016), Some(date("2016-03-27")));
        assert_eq!(easter_sunday(2019), Some(date("2019-04-21")));
        assert_eq!(easter_sunday(2024), Some(date("2024-03-31")));
        assert_eq!(easter_sunday(2025), Some(date("2025-04-20")));
        // earliest and latest possible
        assert_eq!(easter_sunday(2285), Some(date("2285-03-22")));
        assert_eq!(easter_sunday(2038), Some(date("2038-04-25")));
    }

    #[test]
    fn test_good_friday_crosses_month() {
        let calendar = HolidayCalendar::swedish();
        assert_eq!(calendar.holiday_on(date("2024-03-29")).map(|h| h.name), Some("Good Friday"));
        // Easter on April 1st puts Good Friday in March
        assert_eq!(named(&calendar, "Good Friday").date_in(2018), Some(date("2018-03-30")));
        assert!(!calendar.is_holiday(date("2024-03-28")));
    }

    #[test]
    fn test_midsummer() {
        let calendar = HolidayCalendar::swedish();
        let eve = named(&calendar, "Midsummer Eve");
        let day = named(&calendar, "Midsummer Day");

        for (year, expected) in [(2016, "2016-06-24"), (2017, "2017-06-23"), (2018, "2018-06-22"), (2019, "2019-06-21"), (2024, "2024-06-21")] {
            assert_eq!(eve.date_in(year), Some(date(expected)));
        }
        for (year, expected) in [(2016, "2016-06-25"), (2017, "2017-06-24"), (2018, "2018-06-23"), (2019, "2019-06-22")] {
            assert_eq!(day.date_in(year), Some(date(expected)));
        }
        assert!(!calendar.is_holiday(date("2024-06-20")));
    }

    #[test]
    fn test_all_saints_and_national_day() {
        let calendar = HolidayCalendar::swedish();
        let all_saints = named(&calendar, "All Saints' Day");
        for (year, expected) in [(2016, "2016-11-05"), (2017, "2017-11-04"), (2018, "2018-11-03"), (2019, "2019-11-02")] {
            assert_eq!(all_saints.date_in(year), Some(date(expected)));
        }
        assert!(calendar.is_holiday(date("2019-06-06")));
    }

    #[test]
    fn test_easter_relative_days() {
        let calendar = HolidayCalendar::swedish();
        for (day, name) in [
            ("2024-04-01", "Easter Monday"),
            ("2024-05-09", "Ascension Day"),
            ("2024-05-19", "Whitsunday"),
            ("2024-05-20", "Whit Monday"),
        ] {
            assert_eq!(calendar.holiday_on(date(day)).map(|h| h.name), Some(name));
        }
    }

    #[test]
    fn test_each_holiday_once_a_year() {
        let calendar = HolidayCalendar::swedish();
        let year: Vec<NaiveDate> = date("2024-01-01")
            .iter_days()
            .take_while(|d| d.year() == 2024)
            .collect();

        for holiday in calendar.holidays() {
            let count = year.iter().filter(|&&d| holiday.falls_on(d)).count();
            assert_eq!(count, 1, "{}", holiday.name);
        }
    }

    #[test]
    fn test_empty_calendar() {
        let calendar = HolidayCalendar::none();
        assert!(!calendar.is_holiday(date("2024-12-25")));
        assert!(HolidayCalendar::new([Holiday::new("Christmas Day", HolidayRule::Fixed { month: 12, day: 25 })])
            .is_holiday(date("2024-12-25")));
    }
}
