//! Provides parsing and formatting helpers for durations.
//!
//! The settings of a coordinator (lock TTL, backoff, cache TTL) are all durations which are
//! written in a human friendly notation like `100ms` or `1d` in the config. The helpers here
//! convert between this notation and [Duration](std::time::Duration), and render the latency
//! measurements recorded in [Stats](crate::stats::Stats).
use std::fmt::Write;
use std::time::Duration;

/// Formats a duration given in microseconds.
///
/// This function determines the ideal unit (ranging from microseconds to seconds) to provide
/// a concise representation.
///
/// Note that a helper function [format_short_duration](format_short_duration) is also provided
/// which directly returns a String. This function also provides some examples.
pub fn format_micros(micros: i32, f: &mut dyn std::fmt::Write) -> std::fmt::Result {
    if micros < 1_000 {
        write!(f, "{} us", micros)
    } else if micros < 10_000 {
        write!(f, "{:.2} ms", micros as f32 / 1_000.)
    } else if micros < 100_000 {
        write!(f, "{:.1} ms", micros as f32 / 1_000.)
    } else if micros < 1_000_000 {
        write!(f, "{} ms", micros / 1_000)
    } else if micros < 10_000_000 {
        write!(f, "{:.2} s", micros as f32 / 1_000_000.)
    } else if micros < 100_000_000 {
        write!(f, "{:.1} s", micros as f32 / 1_000_000.)
    } else {
        write!(f, "{} s", micros / 1_000_000)
    }
}

/// Formats a duration given in microseconds and returns a String representation.
///
/// # Examples
///
/// ```
/// assert_eq!(herdcache::fmt::format_short_duration(100), "100 us");
/// assert_eq!(herdcache::fmt::format_short_duration(8_192), "8.19 ms");
/// assert_eq!(herdcache::fmt::format_short_duration(32_768), "32.8 ms");
/// assert_eq!(herdcache::fmt::format_short_duration(128_123), "128 ms");
/// assert_eq!(herdcache::fmt::format_short_duration(1_128_123), "1.13 s");
/// assert_eq!(herdcache::fmt::format_short_duration(101_000_000), "101 s");
/// ```
pub fn format_short_duration(duration_in_micros: i32) -> String {
    let mut result = String::new();
    let _ = format_micros(duration_in_micros, &mut result);
    result
}

/// Parses a duration from a given string.
///
/// This string can have the following suffixes:
/// * **ms** or **MS**: treats the value as milliseconds
/// * **s** or **S**: treats the value as seconds
/// * **m** or **M**: treats the value as minutes
/// * **h** or **H**: treats the value as hours
/// * **d** or **D**: treats the value as days
///
/// A value without any suffix is treated as milliseconds. Returns an **Err** if either a
/// non-integer value is given or if an unknown suffix was provided.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(herdcache::fmt::parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(herdcache::fmt::parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(herdcache::fmt::parse_duration("3 M").unwrap(), Duration::from_secs(3 * 60));
/// assert_eq!(herdcache::fmt::parse_duration("1d").unwrap(), Duration::from_secs(24 * 60 * 60));
///
/// // An invalid suffix results in an error...
/// assert_eq!(herdcache::fmt::parse_duration("3 Y").is_err(), true);
///
/// // Decimal numbers result in an error...
/// assert_eq!(herdcache::fmt::parse_duration("1.2s").is_err(), true);
///
/// // Negative numbers result in an error...
/// assert_eq!(herdcache::fmt::parse_duration("-1m").is_err(), true);
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *((ms|s|m|h|d|MS|S|M|H|D)?) *$").unwrap();
    }

    match NUMBER_AND_SUFFIX.captures(str.as_ref()) {
        Some(captures) => {
            let number = captures[1].parse::<u64>()?;
            match &captures[2] {
                "s" | "S" => Ok(Duration::from_secs(number)),
                "m" | "M" => Ok(Duration::from_secs(number * 60)),
                "h" | "H" => Ok(Duration::from_secs(number * 60 * 60)),
                "d" | "D" => Ok(Duration::from_secs(number * 60 * 60 * 24)),
                _ => Ok(Duration::from_millis(number)),
            }
        }
        None => Err(anyhow::anyhow!(
            "Cannot parse '{}' into a duration expression.\
             Expected a positive number an optionally 'ms', 's', 'm', 'h' or 'd' as suffix.",
            str.as_ref()
        )),
    }
}

/// Formats a duration into a string like "1d 3h 17m 2s 12ms".
///
/// This is used to log settings changes in the same notation as they are written in the config.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(herdcache::fmt::format_duration(Duration::from_millis(100)), "100ms");
/// assert_eq!(herdcache::fmt::format_duration(Duration::from_millis(1013)), "1s 13ms");
/// assert_eq!(herdcache::fmt::format_duration(Duration::from_secs(60 * 61)), "1h 1m");
/// assert_eq!(herdcache::fmt::format_duration(Duration::from_secs(24 * 60 * 60)), "1d");
/// assert_eq!(herdcache::fmt::format_duration(Duration::ZERO), "0ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(u128, &str); 4] = [
        (1000 * 60 * 60 * 24, "d"),
        (1000 * 60 * 60, "h"),
        (1000 * 60, "m"),
        (1000, "s"),
    ];

    let mut result = String::new();
    let mut value = duration.as_millis();

    for (millis_per_unit, unit) in UNITS {
        let amount = value / millis_per_unit;
        if amount > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", amount, unit);
            value %= millis_per_unit;
        }
    }

    if value > 0 || result.is_empty() {
        if !result.is_empty() {
            result.push(' ');
        }
        let _ = write!(result, "{}ms", value);
    }

    result
}
