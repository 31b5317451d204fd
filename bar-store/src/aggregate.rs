// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! On-the-fly interval aggregation over an ordered minute-bar sequence.

use std::iter::Peekable;

use chrono::{DateTime, Utc};
use core_types::types::{Interval, UnderlyingBar};

/// Lazily folds consecutive minute bars into interval windows.
///
/// The input must be ordered by `ts_utc` ascending; output keeps that order.
/// Finite and non-restartable. Windows with no input bars are not emitted.
pub struct AggregatedBars<I: Iterator<Item = UnderlyingBar>> {
    source: Peekable<I>,
    interval: Interval,
}

pub fn aggregate_bars<I>(bars: I, interval: Interval) -> AggregatedBars<I::IntoIter>
where
    I: IntoIterator<Item = UnderlyingBar>,
{
    AggregatedBars {
        source: bars.into_iter().peekable(),
        interval,
    }
}

impl<I: Iterator<Item = UnderlyingBar>> Iterator for AggregatedBars<I> {
    type Item = UnderlyingBar;

    fn next(&mut self) -> Option<UnderlyingBar> {
        let first = self.source.next()?;
        if self.interval == Interval::Minute {
            return Some(first);
        }
        let window = window_start(first.ts_utc, self.interval);
        let mut folded = first;
        folded.ts_utc = window;
        while let Some(peeked) = self.source.peek() {
            if window_start(peeked.ts_utc, self.interval) != window {
                break;
            }
            let bar = self.source.next().expect("peeked bar present");
            // Open stays from the earliest bar; close follows the latest.
            folded.high = folded.high.max(bar.high);
            folded.low = folded.low.min(bar.low);
            folded.close = bar.close;
            folded.volume += bar.volume;
        }
        Some(folded)
    }
}

/// Window containing `ts`: epoch-aligned for minute multiples, the UTC civil
/// day for `1d`.
fn window_start(ts: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    match interval.minutes() {
        Some(minutes) => {
            let window_secs = minutes * 60;
            let secs = ts.timestamp();
            DateTime::from_timestamp(secs - secs.rem_euclid(window_secs), 0)
                .expect("aligned timestamp in range")
        }
        None => ts
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc(),
    }
}
