//! Temperature line parsing
//!
//! Handles the reply shapes of every supported dialect:
//! - Marlin/Sprinter: `ok T:210.04 /210.00 B:52.00 /52.00 @:85`
//! - Smoothieware: bare `T:` without a tool index
//! - Klipper: `T0:` always, even on single-extruder machines
//! - RepRapFirmware: `T0:... T1:...` plus separate current-tool `T:`
//! - Repetier: `TargetExtr0:210` target-only updates
//!
//! Identifiers preceded by `@` (power indicators) and `B@` are ignored.
//! Only the first occurrence of an identifier wins; later duplicates on
//! the same line are dropped silently.

use printkit_core::{HeaterId, TemperatureReading};

/// Raw parse result before canonicalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTemperatures {
    /// Highest explicit tool index seen on the line (0 when none)
    pub max_tool: u8,
    /// Readings keyed by the raw identifier, first occurrence wins
    pub readings: Vec<(String, TemperatureReading)>,
    /// Repetier-style target-only updates (`TargetExtr<n>`, `TargetBed`)
    pub target_overrides: Vec<(HeaterId, f64)>,
}

impl ParsedTemperatures {
    /// Whether anything was parsed from the line
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty() && self.target_overrides.is_empty()
    }
}

/// Parse one temperature line
pub fn parse(line: &str) -> ParsedTemperatures {
    let mut result = ParsedTemperatures::default();
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut index = 0;

    while index < tokens.len() {
        let token = tokens[index];
        index += 1;

        let Some((id, value_part)) = token.split_once(':') else {
            continue;
        };
        if id.is_empty() || id.contains('@') {
            continue;
        }
        if id == "ok" || id == "W" {
            // "W:?" heat-up countdown and stray ok: prefixes
            continue;
        }

        // Repetier target-only shapes
        if let Some(tool) = id.strip_prefix("TargetExtr") {
            if let (Ok(tool), Ok(target)) = (tool.parse::<u8>(), value_part.parse::<f64>()) {
                result.target_overrides.push((HeaterId::Tool(tool), target));
                result.max_tool = result.max_tool.max(tool);
            }
            continue;
        }
        if id == "TargetBed" {
            if let Ok(target) = value_part.parse::<f64>() {
                result.target_overrides.push((HeaterId::Bed, target));
            }
            continue;
        }

        // Actual value: in this token, or the next one when "<id>:" stands alone
        let (actual, mut rest): (f64, Option<&str>) = if value_part.is_empty() {
            let Some(next) = tokens.get(index) else {
                continue;
            };
            match split_actual(next) {
                Some(pair) => {
                    index += 1;
                    pair
                }
                None => continue,
            }
        } else {
            match split_actual(value_part) {
                Some(pair) => pair,
                None => continue,
            }
        };

        // Target: inline after '/', or in following "/<target>" tokens
        let mut target: Option<f64> = rest.take().and_then(|t| t.parse().ok());
        if target.is_none() {
            if let Some(next) = tokens.get(index) {
                if let Some(stripped) = next.strip_prefix('/') {
                    if stripped.is_empty() {
                        // "T:210.04 / 210.00"
                        if let Some(value) = tokens.get(index + 1).and_then(|t| t.parse().ok()) {
                            target = Some(value);
                            index += 2;
                        }
                    } else if let Ok(value) = stripped.parse() {
                        target = Some(value);
                        index += 1;
                    }
                }
            }
        }

        if result.readings.iter().any(|(existing, _)| existing == id) {
            continue;
        }
        if let Some(tool) = id.strip_prefix('T').and_then(|t| t.parse::<u8>().ok()) {
            result.max_tool = result.max_tool.max(tool);
        }
        result
            .readings
            .push((id.to_string(), TemperatureReading::new(actual, target)));
    }

    result
}

/// Split `"210.04/210.00"` into the actual value and an optional
/// inline-target remainder
fn split_actual(text: &str) -> Option<(f64, Option<&str>)> {
    match text.split_once('/') {
        Some((actual, target)) => Some((actual.parse().ok()?, Some(target))),
        None => Some((text.parse().ok()?, None)),
    }
}

/// Map raw identifiers to heater ids relative to the current tool.
///
/// A bare `T` becomes `T<current_tool>` when no explicit `T<n>` appears in
/// the same result; otherwise the bare `T` is dropped in favor of the
/// explicit readings.
pub fn canonicalize(
    parsed: &ParsedTemperatures,
    current_tool: u8,
) -> Vec<(HeaterId, TemperatureReading)> {
    let has_explicit_tool = parsed
        .readings
        .iter()
        .any(|(id, _)| id.len() > 1 && id.starts_with('T') && id[1..].chars().all(|c| c.is_ascii_digit()));

    let mut out = Vec::with_capacity(parsed.readings.len());
    for (id, reading) in &parsed.readings {
        let heater = match id.as_str() {
            "T" => {
                if has_explicit_tool {
                    continue;
                }
                HeaterId::Tool(current_tool)
            }
            "B" => HeaterId::Bed,
            "C" => HeaterId::Chamber,
            other => {
                if let Some(tool) = other
                    .strip_prefix('T')
                    .and_then(|t| t.parse::<u8>().ok())
                {
                    HeaterId::Tool(tool)
                } else {
                    HeaterId::Custom(other.to_string())
                }
            }
        };
        if out.iter().any(|(existing, _)| *existing == heater) {
            continue;
        }
        out.push((heater, *reading));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(parsed: &ParsedTemperatures, id: &str) -> Option<TemperatureReading> {
        parsed
            .readings
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, r)| *r)
    }

    #[test]
    fn test_marlin_shape() {
        let parsed = parse("T:210.04 /210.00 B:52.00 /52.00 @:85 B@:31");
        assert_eq!(
            reading(&parsed, "T"),
            Some(TemperatureReading::new(210.04, Some(210.0)))
        );
        assert_eq!(
            reading(&parsed, "B"),
            Some(TemperatureReading::new(52.0, Some(52.0)))
        );
        assert_eq!(parsed.readings.len(), 2);
        assert_eq!(parsed.max_tool, 0);
    }

    #[test]
    fn test_smoothieware_shape_with_custom_identifier() {
        let parsed = parse("ok T:210.04 /210.00 B:52.00 /52.00 @:85 B@:31 pS_XYZ:5");
        assert_eq!(
            reading(&parsed, "T"),
            Some(TemperatureReading::new(210.04, Some(210.0)))
        );
        assert_eq!(
            reading(&parsed, "pS_XYZ"),
            Some(TemperatureReading::new(5.0, None))
        );
        assert!(reading(&parsed, "B@").is_none());
        assert_eq!(parsed.max_tool, 0);

        let canonical = canonicalize(&parsed, 0);
        assert!(canonical.contains(&(
            HeaterId::Tool(0),
            TemperatureReading::new(210.04, Some(210.0))
        )));
        assert!(canonical.contains(&(
            HeaterId::Custom("pS_XYZ".to_string()),
            TemperatureReading::new(5.0, None)
        )));
    }

    #[test]
    fn test_multi_extruder_drops_bare_t() {
        let parsed = parse("T:23.1 /0.0 T0:23.1 /0.0 T1:60.0 /200.0 B:22.0 /0.0");
        assert_eq!(parsed.max_tool, 1);

        let canonical = canonicalize(&parsed, 0);
        assert!(!canonical
            .iter()
            .any(|(id, _)| matches!(id, HeaterId::Custom(_))));
        assert!(canonical.contains(&(HeaterId::Tool(0), TemperatureReading::new(23.1, Some(0.0)))));
        assert!(canonical.contains(&(
            HeaterId::Tool(1),
            TemperatureReading::new(60.0, Some(200.0))
        )));
        // The bare T was dropped, not mapped over T0
        assert_eq!(
            canonical
                .iter()
                .filter(|(id, _)| *id == HeaterId::Tool(0))
                .count(),
            1
        );
    }

    #[test]
    fn test_bare_t_maps_to_current_tool() {
        let parsed = parse("T:210.0 /210.0");
        let canonical = canonicalize(&parsed, 1);
        assert_eq!(
            canonical,
            vec![(HeaterId::Tool(1), TemperatureReading::new(210.0, Some(210.0)))]
        );
    }

    #[test]
    fn test_duplicate_identifier_first_wins() {
        let parsed = parse("T:210.0 /210.0 T:999.0 /999.0");
        assert_eq!(
            reading(&parsed, "T"),
            Some(TemperatureReading::new(210.0, Some(210.0)))
        );
        assert_eq!(parsed.readings.len(), 1);
    }

    #[test]
    fn test_no_target_is_none() {
        let parsed = parse("T:23.5 B:22.0");
        assert_eq!(reading(&parsed, "T"), Some(TemperatureReading::new(23.5, None)));
        assert_eq!(reading(&parsed, "B"), Some(TemperatureReading::new(22.0, None)));
    }

    #[test]
    fn test_inline_slash_target() {
        let parsed = parse("T:210.04/210.00 B:52.00/52.00");
        assert_eq!(
            reading(&parsed, "T"),
            Some(TemperatureReading::new(210.04, Some(210.0)))
        );
    }

    #[test]
    fn test_spaced_slash_target() {
        let parsed = parse("T:210.04 / 210.00");
        assert_eq!(
            reading(&parsed, "T"),
            Some(TemperatureReading::new(210.04, Some(210.0)))
        );
    }

    #[test]
    fn test_repetier_target_override() {
        let parsed = parse("TargetExtr0:230 TargetBed:65");
        assert!(parsed.readings.is_empty());
        assert_eq!(
            parsed.target_overrides,
            vec![(HeaterId::Tool(0), 230.0), (HeaterId::Bed, 65.0)]
        );
    }

    #[test]
    fn test_garbage_is_dropped() {
        let parsed = parse("T:not-a-number B:22.0");
        assert!(reading(&parsed, "T").is_none());
        assert_eq!(reading(&parsed, "B"), Some(TemperatureReading::new(22.0, None)));
    }
}
