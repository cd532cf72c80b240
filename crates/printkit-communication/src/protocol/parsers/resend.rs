//! Resend request parsing
//!
//! Accepted shapes: `Resend:100`, `Resend: N100`, `Resend: N:100`,
//! `rs 100`, `rs N100`. Trailing tokens (e.g. `expected checksum 109`)
//! are ignored.

/// Parse a resend request, returning the requested line number
pub fn parse(line: &str) -> Option<u32> {
    let line = line.trim();
    let rest = if let Some(rest) = line.strip_prefix("Resend:") {
        rest
    } else if let Some(rest) = line.strip_prefix("rs ") {
        rest
    } else {
        return None;
    };

    let first = rest.trim().split_whitespace().next()?;
    let digits = first
        .trim_start_matches('N')
        .trim_start_matches(':')
        .trim_start_matches('N');
    let digits: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_shapes() {
        assert_eq!(parse("Resend:100"), Some(100));
        assert_eq!(parse("Resend: 100"), Some(100));
        assert_eq!(parse("Resend: N100"), Some(100));
        assert_eq!(parse("Resend: N:100"), Some(100));
        assert_eq!(parse("rs 42"), Some(42));
        assert_eq!(parse("rs N42"), Some(42));
    }

    #[test]
    fn test_trailing_tokens_ignored() {
        assert_eq!(parse("Resend: 100 expected checksum 109"), Some(100));
    }

    #[test]
    fn test_non_resend() {
        assert_eq!(parse("ok"), None);
        assert_eq!(parse("Resend: nope"), None);
        assert_eq!(parse("rsx 100"), None);
    }
}
