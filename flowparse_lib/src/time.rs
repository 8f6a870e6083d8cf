use std::ops::{Add, Mul, Sub};

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use crate::records::*;

pub const SWITCHED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Arithmetic used when turning switched times into wall-clock time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePrecision {
    #[default]
    Integer,
    Rational,
}

/// What happens to uptime-relative fields such as `first_switched`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SwitchedTimeMode {
    /// Leave the raw device-uptime milliseconds untouched
    Uptime,
    /// Integer ms/us arithmetic with borrow, then format
    Integer,
    /// Exact rational arithmetic, then format
    Rational,
}

impl SwitchedTimeMode {
    pub fn from_settings(from_uptime: bool, precision: TimePrecision) -> Self {
        match (from_uptime, precision) {
            (true, _) => SwitchedTimeMode::Uptime,
            (false, TimePrecision::Integer) => SwitchedTimeMode::Integer,
            (false, TimePrecision::Rational) => SwitchedTimeMode::Rational,
        }
    }
}

/// The (uptime, unix seconds, unix nanoseconds) triple from a packet header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExportClock {
    pub uptime_ms: u32,
    pub unix_secs: u32,
    pub unix_nsecs: u32,
}

impl ExportClock {
    /// Wall time of `switched_ms` as (seconds, microseconds), integer arithmetic.
    pub fn switched_to_time(&self, switched_ms: u32) -> (i64, u32) {
        // negative when the flow event is stamped after the header uptime
        let millis = i64::from(self.uptime_ms) - i64::from(switched_ms);
        let mut seconds = i64::from(self.unix_secs) - millis.div_euclid(1000);
        let mut micros = i64::from(self.unix_nsecs / 1000) - millis.rem_euclid(1000) * 1000;
        if micros < 0 {
            seconds -= 1;
            micros += 1_000_000;
        }
        // only reachable with an out-of-range nanosecond field
        if micros >= 1_000_000 {
            seconds += micros / 1_000_000;
            micros %= 1_000_000;
        }
        (seconds, micros as u32)
    }

    /// Same result as `switched_to_time`, computed with exact fractions.
    pub fn switched_to_time_rational(&self, switched_ms: u32) -> (i64, u32) {
        let current = Rational::from_int(i128::from(self.unix_secs))
            + Rational::new(i128::from(self.unix_nsecs), 1_000_000_000);
        let diff = Rational::new(i128::from(self.uptime_ms) - i128::from(switched_ms), 1000);
        let target = current - diff;

        let seconds = target.floor();
        let fraction = target - Rational::from_int(seconds);
        let micros = (fraction * 1_000_000).floor();
        (seconds as i64, micros as u32)
    }
}

/// Exact fraction with a positive, gcd-reduced denominator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rational {
    num: i128,
    den: i128,
}

impl Rational {
    pub fn new(num: i128, den: i128) -> Self {
        assert!(den != 0, "zero denominator");
        let sign = if den < 0 { -1 } else { 1 };
        let g = gcd(num.abs(), den.abs()).max(1);
        Rational { num: sign * num / g, den: sign * den / g }
    }

    pub fn from_int(v: i128) -> Self {
        Rational { num: v, den: 1 }
    }

    pub fn floor(&self) -> i128 {
        self.num.div_euclid(self.den)
    }
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Add for Rational {
    type Output = Rational;
    fn add(self, rhs: Rational) -> Rational {
        Rational::new(self.num * rhs.den + rhs.num * self.den, self.den * rhs.den)
    }
}

impl Sub for Rational {
    type Output = Rational;
    fn sub(self, rhs: Rational) -> Rational {
        Rational::new(self.num * rhs.den - rhs.num * self.den, self.den * rhs.den)
    }
}

impl Mul<i128> for Rational {
    type Output = Rational;
    fn mul(self, rhs: i128) -> Rational {
        Rational::new(self.num * rhs, self.den)
    }
}

pub fn format_switched(seconds: i64, micros: u32) -> Option<String> {
    let dt = DateTime::from_timestamp(seconds, micros * 1000)?;
    Some(dt.format(SWITCHED_TIME_FORMAT).to_string())
}

pub fn format_epoch_seconds(seconds: u64) -> Option<String> {
    let dt = DateTime::from_timestamp(i64::try_from(seconds).ok()?, 0)?;
    Some(dt.format(SWITCHED_TIME_FORMAT).to_string())
}

pub fn format_epoch_millis(millis: u64) -> Option<String> {
    let dt = DateTime::from_timestamp_millis(i64::try_from(millis).ok()?)?;
    Some(dt.format(SWITCHED_TIME_FORMAT).to_string())
}

/// Applies the configured `SwitchedTimeMode` to uptime-relative fields.
#[derive(Copy, Clone, Debug)]
pub struct TimeConverter {
    mode: SwitchedTimeMode,
}

impl TimeConverter {
    pub fn new(mode: SwitchedTimeMode) -> Self {
        TimeConverter { mode }
    }

    pub fn mode(&self) -> SwitchedTimeMode {
        self.mode
    }

    /// Without a clock (IPFIX headers carry no uptime) the raw value is kept.
    pub fn convert(&self, clock: Option<&ExportClock>, switched_ms: u32) -> FlowValue {
        let clock = match clock {
            Some(c) => c,
            None => return FlowValue::Unsigned(u64::from(switched_ms)),
        };
        let (seconds, micros) = match self.mode {
            SwitchedTimeMode::Uptime => return FlowValue::Unsigned(u64::from(switched_ms)),
            SwitchedTimeMode::Integer => clock.switched_to_time(switched_ms),
            SwitchedTimeMode::Rational => clock.switched_to_time_rational(switched_ms),
        };
        match format_switched(seconds, micros) {
            Some(s) => FlowValue::Text(s),
            None => FlowValue::Unsigned(u64::from(switched_ms)),
        }
    }
}

impl Default for TimeConverter {
    fn default() -> Self {
        TimeConverter::new(SwitchedTimeMode::Integer)
    }
}
