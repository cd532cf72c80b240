//! Position line parsing
//!
//! Accepts both the classic `X:.. Y:.. Z:.. E:..` shape and the
//! RepRapFirmware multi-extruder shape (`E0:.. E1:..`). Whitespace after
//! the colon is tolerated. A trailing `Count: ...` segment (stepper
//! counts) is ignored.

use printkit_core::PositionRecord;

/// Parse one position line into a partial record
pub fn parse(line: &str) -> Option<PositionRecord> {
    let mut record = PositionRecord::new();
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut index = 0;
    let mut any = false;

    while index < tokens.len() {
        let token = tokens[index];
        index += 1;

        // Everything from "Count" on is stepper state, not position
        if token == "Count" || token.starts_with("Count:") {
            break;
        }

        let Some((id, value_part)) = token.split_once(':') else {
            continue;
        };

        let value: f64 = if value_part.is_empty() {
            match tokens.get(index).and_then(|t| t.parse().ok()) {
                Some(value) => {
                    index += 1;
                    value
                }
                None => continue,
            }
        } else {
            match value_part.parse() {
                Ok(value) => value,
                Err(_) => continue,
            }
        };

        match id {
            "X" => record.x = Some(value),
            "Y" => record.y = Some(value),
            "Z" => record.z = Some(value),
            "E" => record.e = Some(value),
            "F" => record.f = Some(value),
            "T" => record.tool = Some(value as u8),
            other => {
                if let Some(extruder) = other
                    .strip_prefix('E')
                    .and_then(|n| n.parse::<u8>().ok())
                {
                    record.extruders.insert(extruder, value);
                } else {
                    continue;
                }
            }
        }
        any = true;
    }

    any.then_some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_shape() {
        let record = parse("X:10.00 Y:20.00 Z:0.30 E:12.50 Count X:800 Y:1600 Z:120").unwrap();
        assert_eq!(record.x, Some(10.0));
        assert_eq!(record.y, Some(20.0));
        assert_eq!(record.z, Some(0.3));
        assert_eq!(record.e, Some(12.5));
        assert!(record.extruders.is_empty());
    }

    #[test]
    fn test_reprapfirmware_multi_extruder() {
        let record = parse("X:10.0 Y:20.0 Z:0.3 E0:12.5 E1:0.0").unwrap();
        assert_eq!(record.e, None);
        assert_eq!(record.extruders.get(&0), Some(&12.5));
        assert_eq!(record.extruders.get(&1), Some(&0.0));
    }

    #[test]
    fn test_whitespace_after_colon() {
        let record = parse("X: 10.00 Y: 20.00 Z: 0.30").unwrap();
        assert_eq!(record.x, Some(10.0));
        assert_eq!(record.y, Some(20.0));
        assert_eq!(record.z, Some(0.3));
    }

    #[test]
    fn test_count_segment_ignored() {
        let record = parse("X:0.00 Y:0.00 Z:0.00 E:0.00 Count X:0 Y:0 Z:0").unwrap();
        // Count values must not clobber the positions
        assert_eq!(record.x, Some(0.0));
        assert_eq!(record.z, Some(0.0));
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert!(parse("no positions here").is_none());
    }
}
