// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Trading session calendar: pure computation, no I/O and no wall clock.
//!
//! Classifies a civil exchange date as regular, early-close, or closed and
//! reports the expected minute-bar count per session. Holidays are computed
//! from their civil rules rather than read from disk; a holiday landing on a
//! weekend is not shifted to an adjacent weekday.

use chrono::{Datelike, Days, NaiveDate, Weekday};

pub const REGULAR_SESSION_BARS: u32 = 390;
pub const EARLY_CLOSE_BARS: u32 = 210;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Closed,
    EarlyClose,
    Regular,
}

/// Equity-index session calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCalendar;

impl SessionCalendar {
    pub fn classify(&self, day: NaiveDate) -> SessionKind {
        if is_weekend(day) || is_holiday(day) {
            return SessionKind::Closed;
        }
        if is_early_close(day) {
            return SessionKind::EarlyClose;
        }
        SessionKind::Regular
    }

    pub fn is_trading(&self, day: NaiveDate) -> bool {
        self.classify(day) != SessionKind::Closed
    }

    pub fn expected_minute_bars(&self, day: NaiveDate) -> u32 {
        match self.classify(day) {
            SessionKind::Closed => 0,
            SessionKind::EarlyClose => EARLY_CLOSE_BARS,
            SessionKind::Regular => REGULAR_SESSION_BARS,
        }
    }

    /// First trading day strictly after `day`.
    pub fn next_trading_day(&self, day: NaiveDate) -> NaiveDate {
        let mut candidate = day + Days::new(1);
        while !self.is_trading(candidate) {
            candidate = candidate + Days::new(1);
        }
        candidate
    }

    /// Last trading day strictly before `day`.
    pub fn previous_trading_day(&self, day: NaiveDate) -> NaiveDate {
        let mut candidate = day - Days::new(1);
        while !self.is_trading(candidate) {
            candidate = candidate - Days::new(1);
        }
        candidate
    }
}

fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

fn is_holiday(day: NaiveDate) -> bool {
    let year = day.year();
    day == ymd(year, 1, 1)
        || day == nth_weekday(year, 1, Weekday::Mon, 3) // MLK Day
        || day == nth_weekday(year, 2, Weekday::Mon, 3) // Presidents' Day
        || day == good_friday(year)
        || day == last_weekday(year, 5, Weekday::Mon) // Memorial Day
        || day == ymd(year, 7, 4)
        || day == nth_weekday(year, 9, Weekday::Mon, 1) // Labor Day
        || day == thanksgiving(year)
        || day == ymd(year, 12, 25)
}

fn is_early_close(day: NaiveDate) -> bool {
    if day == thanksgiving(day.year()) + Days::new(1) {
        return true;
    }
    // Christmas Eve, when it lands on a weekday.
    day == ymd(day.year(), 12, 24) && !is_weekend(day)
}

fn thanksgiving(year: i32) -> NaiveDate {
    nth_weekday(year, 11, Weekday::Thu, 4)
}

/// Good Friday: two days before Easter Sunday (anonymous Gregorian computus).
fn good_friday(year: i32) -> NaiveDate {
    easter_sunday(year) - Days::new(2)
}

fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    ymd(year, month as u32, day as u32)
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> NaiveDate {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
        .expect("nth weekday exists for every month in range")
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, 5)
        .unwrap_or_else(|| nth_weekday(year, month, weekday, 4))
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid civil date")
}
