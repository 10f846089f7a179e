//! Display formatting shared by topic projections and dashboard actions.

use chrono::{DateTime, TimeZone};
use std::time::Duration;

/// Currency suffix appended to balances.
pub const CURRENCY: &str = "SWRM";

const KIB: f64 = 1024.0;
const MIB: f64 = 1_048_576.0;
const GIB: f64 = 1_073_741_824.0;

/// Render a byte count with a binary unit and one decimal place.
pub fn humanize_bytes(value: f64) -> String {
    if value > GIB - 1.0 {
        format!("{:.1} GB", value / GIB)
    } else if value > MIB - 1.0 {
        format!("{:.1} MB", value / MIB)
    } else if value > KIB - 1.0 {
        format!("{:.1} KB", value / KIB)
    } else {
        format!("{:.1} B", value)
    }
}

/// Keep at most four characters after the decimal point.
///
/// Text without a point, or with four or fewer characters after it, is
/// returned unchanged. The cut always lands on a character boundary.
pub fn truncate_balance(text: &str) -> String {
    let Some(point) = text.find('.') else {
        return text.to_string();
    };
    let fraction = &text[point + 1..];
    match fraction.char_indices().nth(4) {
        Some((cut, _)) => text[..point + 1 + cut].to_string(),
        None => text.to_string(),
    }
}

/// `DD-MM-YYYY h:mmAM/PM` in the given timezone.
pub fn format_settlement<Tz, In>(date: &DateTime<In>, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
    In: TimeZone,
{
    date.with_timezone(zone)
        .format("%d-%m-%Y %-I:%M%p")
        .to_string()
}

/// Percentage with two decimals and a trailing percent sign.
pub fn format_percentage(value: f64) -> String {
    format!("{value:.2} %")
}

/// Gigabytes with two decimals.
pub fn format_gigabytes(value: f64) -> String {
    format!("{value:.2} GB")
}

/// Elapsed time as words, largest unit first, e.g. `1 day 2 hours 5 seconds`.
pub fn format_uptime(elapsed: Duration) -> String {
    const UNITS: [(&str, u64); 6] = [
        ("year", 365 * 24 * 3600),
        ("week", 7 * 24 * 3600),
        ("day", 24 * 3600),
        ("hour", 3600),
        ("minute", 60),
        ("second", 1),
    ];

    let mut remaining = elapsed.as_secs();
    let mut parts = Vec::new();
    for (name, size) in UNITS {
        let count = remaining / size;
        remaining %= size;
        if count == 0 {
            continue;
        }
        let plural = if count == 1 { "" } else { "s" };
        parts.push(format!("{count} {name}{plural}"));
    }

    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};
    use proptest::prelude::*;

    #[test]
    fn humanize_thresholds() {
        assert_eq!(humanize_bytes(0.0), "0.0 B");
        assert_eq!(humanize_bytes(1023.0), "1023.0 B");
        assert_eq!(humanize_bytes(1024.0), "1.0 KB");
        assert_eq!(humanize_bytes(1_048_575.0), "1024.0 KB");
        assert_eq!(humanize_bytes(1_048_576.0), "1.0 MB");
        assert_eq!(humanize_bytes(1_073_741_824.0), "1.0 GB");
        assert_eq!(humanize_bytes(5.5 * GIB), "5.5 GB");
    }

    #[test]
    fn balance_truncation() {
        assert_eq!(truncate_balance("123.456789"), "123.4567");
        assert_eq!(truncate_balance("123.4567"), "123.4567");
        assert_eq!(truncate_balance("1.23"), "1.23");
        assert_eq!(truncate_balance("42"), "42");
    }

    #[test]
    fn balance_truncation_counts_characters_not_bytes() {
        assert_eq!(truncate_balance("1.a\u{e9}\u{e9}"), "1.a\u{e9}\u{e9}");
        assert_eq!(
            truncate_balance("1.\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}"),
            "1.\u{e9}\u{e9}\u{e9}\u{e9}"
        );
        assert_eq!(truncate_balance("\u{20ac}.12345"), "\u{20ac}.1234");
    }

    proptest! {
        #[test]
        fn balance_truncation_never_panics(text in "\\PC{0,12}") {
            let truncated = truncate_balance(&text);
            prop_assert!(text.starts_with(&truncated));
        }
    }

    #[test]
    fn settlement_uses_twelve_hour_clock() {
        let date = DateTime::parse_from_rfc3339("2024-03-05T14:07:00Z").unwrap();
        assert_eq!(format_settlement(&date, &Utc), "05-03-2024 2:07PM");

        let plus_ten = FixedOffset::east_opt(10 * 3600).unwrap();
        assert_eq!(format_settlement(&date, &plus_ten), "06-03-2024 12:07AM");
    }

    #[test]
    fn percentage_and_gigabytes() {
        assert_eq!(format_percentage(99.5), "99.50 %");
        assert_eq!(format_gigabytes(12.345), "12.35 GB");
    }

    #[test]
    fn uptime_words() {
        assert_eq!(format_uptime(Duration::ZERO), "0 seconds");
        assert_eq!(format_uptime(Duration::from_secs(1)), "1 second");
        assert_eq!(
            format_uptime(Duration::from_secs(86_400 + 2 * 3600 + 5)),
            "1 day 2 hours 5 seconds"
        );
        assert_eq!(
            format_uptime(Duration::from_secs(15 * 86_400 + 60)),
            "2 weeks 1 day 1 minute"
        );
    }

    proptest! {
        #[test]
        fn humanize_unit_rank_is_monotonic(a in 0.0f64..1e13, b in 0.0f64..1e13) {
            fn rank(text: &str) -> usize {
                ["B", "KB", "MB", "GB"]
                    .iter()
                    .position(|unit| text.ends_with(&format!(" {unit}")))
                    .unwrap()
            }
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(rank(&humanize_bytes(lo)) <= rank(&humanize_bytes(hi)));
        }
    }
}
