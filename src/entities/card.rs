// 💳 Card input - normalization and format checks
// Raw form input goes through these before any validation or detection.

/// Keep only ASCII digits, truncated to `max_len` when given
pub fn digits_only(raw: &str, max_len: Option<usize>) -> String {
    let digits = raw.chars().filter(|c| c.is_ascii_digit());
    match max_len {
        Some(max) => digits.take(max).collect(),
        None => digits.collect(),
    }
}

/// "4551234" -> "4551 234" (at most 16 digits)
pub fn format_card_number(raw: &str) -> String {
    let digits = digits_only(raw, Some(16));
    digits
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// "1227" -> "12/27"; fewer than 3 digits are returned as typed
pub fn format_expiry(raw: &str) -> String {
    let digits = digits_only(raw, Some(4));
    if digits.len() >= 3 {
        format!("{}/{}", &digits[..2], &digits[2..])
    } else {
        digits
    }
}

/// Last `visible` characters behind a mask: "**** 5678"
pub fn mask_tail(value: &str, visible: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    let start = chars.len().saturating_sub(visible);
    let tail: String = chars[start..].iter().collect();
    format!("**** {}", tail)
}

pub fn is_valid_card_number(raw: &str) -> bool {
    let cleaned: String = raw.chars().filter(|c| *c != ' ').collect();
    cleaned.len() == 16 && cleaned.chars().all(|c| c.is_ascii_digit())
}

/// `MM/YY` with a real month
pub fn is_valid_expiry(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 5 || bytes[2] != b'/' {
        return false;
    }
    let (month, year) = (&value[..2], &value[3..]);
    if !month.chars().chain(year.chars()).all(|c| c.is_ascii_digit()) {
        return false;
    }
    matches!(month.parse::<u8>(), Ok(1..=12))
}

pub fn is_valid_cvv(value: &str) -> bool {
    (3..=4).contains(&value.len()) && value.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_only() {
        assert_eq!(digits_only("12.345.678-9", None), "123456789");
        assert_eq!(digits_only("12.345.678-9", Some(8)), "12345678");
        assert_eq!(digits_only("abc", Some(3)), "");
    }

    #[test]
    fn test_format_card_number() {
        assert_eq!(format_card_number("4551234567890123"), "4551 2345 6789 0123");
        assert_eq!(format_card_number("4551-23"), "4551 23");
        assert_eq!(format_card_number("45512345678901239999"), "4551 2345 6789 0123");
        assert_eq!(format_card_number(""), "");
    }

    #[test]
    fn test_format_expiry() {
        assert_eq!(format_expiry("1227"), "12/27");
        assert_eq!(format_expiry("12/2"), "12/2");
        assert_eq!(format_expiry("12"), "12");
        assert_eq!(format_expiry("122799"), "12/27");
    }

    #[test]
    fn test_mask_tail() {
        assert_eq!(mask_tail("12345678", 4), "**** 5678");
        assert_eq!(mask_tail("12", 4), "**** 12");
    }

    #[test]
    fn test_card_validators() {
        assert!(is_valid_card_number("4551 2345 6789 0123"));
        assert!(!is_valid_card_number("4551 2345 6789"));
        assert!(!is_valid_card_number("4551 2345 6789 012a"));

        assert!(is_valid_expiry("01/30"));
        assert!(!is_valid_expiry("13/30"));
        assert!(!is_valid_expiry("00/30"));
        assert!(!is_valid_expiry("1/30"));
        assert!(!is_valid_expiry("12-30"));

        assert!(is_valid_cvv("123"));
        assert!(is_valid_cvv("1234"));
        assert!(!is_valid_cvv("12"));
        assert!(!is_valid_cvv("12a"));
    }
}
