//! Elapsed-time display codec: seconds <-> "HH:MM:SS".
//!
//! Hours are zero-padded to two digits but never wrapped at 24h, so
//! `parse_hms(&format_hms(n)) == Some(n)` for every `n`.

pub const ZERO_DISPLAY: &str = "00:00:00";

pub fn format_hms(total_seconds: u64) -> String {
    let h = total_seconds / 3600;
    let m = (total_seconds % 3600) / 60;
    let s = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

/// Parse "HH:MM:SS" back into seconds.
/// Minutes and seconds must be < 60; hours may have more than two digits.
pub fn parse_hms(display: &str) -> Option<u64> {
    let mut parts = display.trim().split(':');
    let h = parse_field(parts.next()?)?;
    let m = parse_field(parts.next()?)?;
    let s = parse_field(parts.next()?)?;
    if parts.next().is_some() || m >= 60 || s >= 60 {
        return None;
    }
    h.checked_mul(3600)?.checked_add(m * 60 + s)
}

fn parse_field(field: &str) -> Option<u64> {
    if field.len() < 2 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), ZERO_DISPLAY);
        assert_eq!(format_hms(59), "00:00:59");
        assert_eq!(format_hms(90), "00:01:30");
        assert_eq!(format_hms(1800), "00:30:00");
        assert_eq!(format_hms(3661), "01:01:01");
        // No 24h wrap-around
        assert_eq!(format_hms(25 * 3600), "25:00:00");
        assert_eq!(format_hms(100 * 3600 + 5), "100:00:05");
    }

    #[test]
    fn test_parse_hms() {
        assert_eq!(parse_hms("00:00:00"), Some(0));
        assert_eq!(parse_hms("00:30:00"), Some(1800));
        assert_eq!(parse_hms("01:01:01"), Some(3661));
        assert_eq!(parse_hms("100:00:05"), Some(360_005));
        assert_eq!(parse_hms(" 00:00:07 "), Some(7));
    }

    #[test]
    fn test_parse_hms_rejects_malformed() {
        assert_eq!(parse_hms(""), None);
        assert_eq!(parse_hms("00:00"), None);
        assert_eq!(parse_hms("00:00:00:00"), None);
        assert_eq!(parse_hms("00:60:00"), None);
        assert_eq!(parse_hms("00:00:60"), None);
        assert_eq!(parse_hms("0:00:00"), None);
        assert_eq!(parse_hms("aa:bb:cc"), None);
        assert_eq!(parse_hms("-1:00:00"), None);
    }

    proptest! {
        #[test]
        fn prop_display_round_trips(secs in 0u64..10_000_000) {
            prop_assert_eq!(parse_hms(&format_hms(secs)), Some(secs));
        }
    }
}
