use std::time::Duration;

/// Parses an engine-printed size such as `1048 MB`, `512 B`, `3 KiB` or
/// `25165 kB` into bytes. ddrescue uses SI prefixes unless `--binary-prefixes`
/// is given; both are accepted.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "PB" => 1e15,
        "KiB" => 1024.0,
        "MiB" => 1024.0_f64.powi(2),
        "GiB" => 1024.0_f64.powi(3),
        "TiB" => 1024.0_f64.powi(4),
        "PiB" => 1024.0_f64.powi(5),
        _ => return None,
    };
    // Saturating float-to-int cast; sizes are never negative here.
    Some((number * multiplier).round() as u64)
}

/// Parses ddrescue (`1h 2m 3s`, `3m 10s`, `20s`, `n/a`) and PhotoRec
/// (`0h01m02s`, `0h10m00`) style durations.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || s == "n/a" {
        return None;
    }
    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut seen_unit = false;
    for c in s.chars() {
        match c {
            '0'..='9' => digits.push(c),
            'd' | 'h' | 'm' | 's' => {
                let value: u64 = digits.parse().ok()?;
                digits.clear();
                seen_unit = true;
                total += value
                    * match c {
                        'd' => 86_400,
                        'h' => 3_600,
                        'm' => 60,
                        _ => 1,
                    };
            },
            ' ' => {},
            _ => return None,
        }
    }
    // PhotoRec omits the trailing `s` on its estimate.
    if !digits.is_empty() {
        total += digits.parse::<u64>().ok()?;
    }
    seen_unit.then_some(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0 B", Some(0))]
    #[case("512 B", Some(512))]
    #[case("1048 MB", Some(1_048_000_000))]
    #[case("25165 kB", Some(25_165_000))]
    #[case("3 KiB", Some(3072))]
    #[case("1.5 GB", Some(1_500_000_000))]
    #[case("lots", None)]
    #[case("12 parsecs", None)]
    fn test_parse_size(#[case] input: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_size(input), expected);
    }

    #[rstest]
    #[case("20s", Some(20))]
    #[case("3m 10s", Some(190))]
    #[case("1h 2m 3s", Some(3723))]
    #[case("2d 1h", Some(176_400))]
    #[case("0h01m02s", Some(62))]
    #[case("0h10m00", Some(600))]
    #[case("n/a", None)]
    #[case("", None)]
    #[case("soon", None)]
    fn test_parse_duration(#[case] input: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_duration(input), expected.map(Duration::from_secs));
    }
}
