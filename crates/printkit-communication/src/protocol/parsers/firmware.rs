//! `M115` reply and capability line parsing
//!
//! `M115` replies are whitespace-separated `KEY:VALUE` groups where a KEY
//! starts with a letter and continues with alphanumerics/underscores.
//! Values run until the next valid KEY start, so they may contain spaces
//! and colons (`FIRMWARE_NAME:Marlin 2.0.7.2 (Nov 27 2020 14:30:11)`).
//! Tokens that look like keys but start with `_` or a digit are folded
//! into the previous value.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn key_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?:^|\s)([A-Za-z][A-Za-z0-9_]*):").expect("static regex")
    })
}

/// Parse an `M115` reply line into its key/value groups
pub fn parse_m115(line: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    let regex = key_regex();

    let matches: Vec<(usize, usize, String)> = regex
        .captures_iter(line)
        .filter_map(|caps| {
            let key = caps.get(1)?;
            Some((key.start(), key.end() + 1, key.as_str().to_string()))
        })
        .collect();

    for (index, (_, value_start, key)) in matches.iter().enumerate() {
        let value_end = matches
            .get(index + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(line.len());
        let value = line[*value_start..value_end].trim().to_string();
        values.entry(key.clone()).or_insert(value);
    }

    values
}

/// Parse a `Cap:<NAME>:<0|1>` line
///
/// Exactly three colon-separated fields; the name must be an all-caps
/// identifier and the flag must be `0` or `1`. Anything else is ignored.
pub fn parse_capability(line: &str) -> Option<(String, bool)> {
    let mut fields = line.trim().split(':');
    if fields.next()? != "Cap" {
        return None;
    }
    let name = fields.next()?;
    let flag = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return None;
    }
    match flag {
        "0" => Some((name.to_string(), false)),
        "1" => Some((name.to_string(), true)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marlin_m115() {
        let values = parse_m115(
            "FIRMWARE_NAME:Marlin 2.0.7.2 (Nov 27 2020 14:30:11) SOURCE_CODE_URL:https://github.com/MarlinFirmware/Marlin PROTOCOL_VERSION:1.0 MACHINE_TYPE:Ender-3 EXTRUDER_COUNT:1",
        );
        assert_eq!(
            values.get("FIRMWARE_NAME").map(String::as_str),
            Some("Marlin 2.0.7.2 (Nov 27 2020 14:30:11)")
        );
        assert_eq!(
            values.get("SOURCE_CODE_URL").map(String::as_str),
            Some("https://github.com/MarlinFirmware/Marlin")
        );
        assert_eq!(values.get("EXTRUDER_COUNT").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_value_with_colon_not_split() {
        let values = parse_m115("SOURCE_CODE_URL:https://github.com/x PROTOCOL_VERSION:1.0");
        // "https" follows a colon, not whitespace, so it is not a key
        assert_eq!(values.len(), 2);
        assert_eq!(
            values.get("SOURCE_CODE_URL").map(String::as_str),
            Some("https://github.com/x")
        );
    }

    #[test]
    fn test_capability_valid() {
        assert_eq!(
            parse_capability("Cap:AUTOREPORT_TEMP:1"),
            Some(("AUTOREPORT_TEMP".to_string(), true))
        );
        assert_eq!(
            parse_capability("Cap:PROGRESS:0"),
            Some(("PROGRESS".to_string(), false))
        );
    }

    #[test]
    fn test_capability_malformed_ignored() {
        assert_eq!(parse_capability("Cap:AUTOREPORT_TEMP:2"), None);
        assert_eq!(parse_capability("Cap:lower_case:1"), None);
        assert_eq!(parse_capability("Cap:TOO:MANY:1"), None);
        assert_eq!(parse_capability("Cap:AUTOREPORT_TEMP"), None);
        assert_eq!(parse_capability("Nope:AUTOREPORT_TEMP:1"), None);
    }
}
