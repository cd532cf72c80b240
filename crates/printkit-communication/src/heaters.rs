//! Heater/axis model and send-time rewrites
//!
//! Tracks the host's view of tool selection, positioning mode, and the
//! last commanded X/Y/Z/E/F. Applies temperature offsets and the feedrate
//! multiplier to outgoing commands just before framing.

use crate::protocol::codec;
use printkit_core::{HeaterId, PositionRecord};
use std::collections::BTreeMap;

/// Effects of processing one outgoing line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendEffects {
    /// The line to actually transmit, after rewrites
    pub line: String,
    /// New Z height, when this line changed it
    pub z_change: Option<f64>,
    /// Tool switched to, when this line is a `T<n>`
    pub tool_change: Option<u8>,
    /// This line starts a heat-and-wait (`M109`/`M190`/`M191`)
    pub starts_heatup: bool,
    /// This line resets line numbering (`M110`); carries the new value
    pub line_number_reset: Option<u32>,
}

/// Host-side heater and axis model
#[derive(Debug)]
pub struct HeaterModel {
    current_tool: u8,
    relative: bool,
    extruder_relative: bool,
    g90_influences_extruder: bool,
    feedrate_multiplier: f64,
    flowrate_multiplier: f64,
    offsets: BTreeMap<HeaterId, f64>,
    tracked: PositionRecord,
}

impl HeaterModel {
    /// Create a model with neutral multipliers and no offsets
    pub fn new(g90_influences_extruder: bool) -> Self {
        Self {
            current_tool: 0,
            relative: false,
            extruder_relative: false,
            g90_influences_extruder,
            feedrate_multiplier: 100.0,
            flowrate_multiplier: 100.0,
            offsets: BTreeMap::new(),
            tracked: PositionRecord::new(),
        }
    }

    /// The currently selected tool
    pub fn current_tool(&self) -> u8 {
        self.current_tool
    }

    /// Last commanded positions, as tracked from sent moves
    pub fn tracked_position(&self) -> &PositionRecord {
        &self.tracked
    }

    /// Current feedrate multiplier in percent
    pub fn feedrate_multiplier(&self) -> f64 {
        self.feedrate_multiplier
    }

    /// Current flowrate multiplier in percent
    pub fn flowrate_multiplier(&self) -> f64 {
        self.flowrate_multiplier
    }

    /// Replace the temperature offset table
    pub fn set_offsets(&mut self, offsets: BTreeMap<HeaterId, f64>) {
        self.offsets = offsets;
    }

    /// Set the feedrate multiplier (percent)
    pub fn set_feedrate_multiplier(&mut self, percent: f64) {
        self.feedrate_multiplier = percent.clamp(1.0, 500.0);
    }

    /// Set the flowrate multiplier (percent)
    pub fn set_flowrate_multiplier(&mut self, percent: f64) {
        self.flowrate_multiplier = percent.clamp(1.0, 500.0);
    }

    /// Process one outgoing line: apply offsets/multipliers, track state
    pub fn process_outgoing(&mut self, line: &str) -> SendEffects {
        let mut effects = SendEffects {
            line: line.to_string(),
            ..Default::default()
        };
        let Some(code) = codec::command_code(line) else {
            return effects;
        };

        match code.as_str() {
            "G0" | "G1" | "G2" | "G3" => {
                if let Some(feedrate) = codec::parameter(line, 'F') {
                    let scaled = feedrate * self.feedrate_multiplier / 100.0;
                    if (scaled - feedrate).abs() > f64::EPSILON {
                        effects.line = codec::replace_parameter(&effects.line, 'F', scaled);
                    }
                    self.tracked.f = Some(scaled);
                }
                self.track_move(line, &mut effects);
            }
            "G90" => {
                self.relative = false;
                if self.g90_influences_extruder {
                    self.extruder_relative = false;
                }
            }
            "G91" => {
                self.relative = true;
                if self.g90_influences_extruder {
                    self.extruder_relative = true;
                }
            }
            "M82" => self.extruder_relative = false,
            "M83" => self.extruder_relative = true,
            "G92" => {
                for (axis, field) in [('X', 0), ('Y', 1), ('Z', 2), ('E', 3)] {
                    if let Some(value) = codec::parameter(line, axis) {
                        match field {
                            0 => self.tracked.x = Some(value),
                            1 => self.tracked.y = Some(value),
                            2 => self.tracked.z = Some(value),
                            _ => self.tracked.e = Some(value),
                        }
                    }
                }
            }
            "M104" | "M109" => {
                let tool = codec::parameter(line, 'T')
                    .map(|t| t as u8)
                    .unwrap_or(self.current_tool);
                effects.line = self.offset_temperature(&effects.line, HeaterId::Tool(tool));
                effects.starts_heatup = code == "M109";
            }
            "M140" | "M190" => {
                effects.line = self.offset_temperature(&effects.line, HeaterId::Bed);
                effects.starts_heatup = code == "M190";
            }
            "M141" | "M191" => {
                effects.line = self.offset_temperature(&effects.line, HeaterId::Chamber);
                effects.starts_heatup = code == "M191";
            }
            "M220" => {
                if let Some(percent) = codec::parameter(line, 'S') {
                    self.feedrate_multiplier = percent.clamp(1.0, 500.0);
                }
            }
            "M221" => {
                if let Some(percent) = codec::parameter(line, 'S') {
                    self.flowrate_multiplier = percent.clamp(1.0, 500.0);
                }
            }
            "M110" => {
                let n = codec::parameter(line, 'N').map(|n| n as u32).unwrap_or(0);
                effects.line_number_reset = Some(n);
            }
            _ => {
                if let Some(tool) = code
                    .strip_prefix('T')
                    .and_then(|t| t.parse::<u8>().ok())
                {
                    if tool != self.current_tool {
                        self.current_tool = tool;
                        effects.tool_change = Some(tool);
                    }
                }
            }
        }

        effects
    }

    fn track_move(&mut self, line: &str, effects: &mut SendEffects) {
        for axis in ['X', 'Y', 'Z', 'E'] {
            let Some(value) = codec::parameter(line, axis) else {
                continue;
            };
            let relative = if axis == 'E' {
                self.extruder_relative
            } else {
                self.relative
            };
            let field = match axis {
                'X' => &mut self.tracked.x,
                'Y' => &mut self.tracked.y,
                'Z' => &mut self.tracked.z,
                _ => &mut self.tracked.e,
            };
            let new = if relative {
                field.unwrap_or(0.0) + value
            } else {
                value
            };
            if axis == 'Z' && *field != Some(new) {
                effects.z_change = Some(new);
            }
            *field = Some(new);
        }
    }

    /// Shift the `S` parameter by the heater's offset; `S0` means "off"
    /// and is never shifted
    fn offset_temperature(&self, line: &str, heater: HeaterId) -> String {
        let Some(offset) = self.offsets.get(&heater).copied() else {
            return line.to_string();
        };
        if offset == 0.0 {
            return line.to_string();
        }
        let Some(target) = codec::parameter(line, 'S') else {
            return line.to_string();
        };
        if target <= 0.0 {
            return line.to_string();
        }
        codec::replace_parameter(line, 'S', target + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> HeaterModel {
        HeaterModel::new(false)
    }

    #[test]
    fn test_tool_offset_applied() {
        let mut model = model();
        model.set_offsets(BTreeMap::from([(HeaterId::Tool(0), 5.0)]));
        let effects = model.process_outgoing("M104 S210");
        assert_eq!(effects.line, "M104 S215");
    }

    #[test]
    fn test_zero_target_untouched() {
        let mut model = model();
        model.set_offsets(BTreeMap::from([
            (HeaterId::Tool(0), 5.0),
            (HeaterId::Bed, 10.0),
        ]));
        assert_eq!(model.process_outgoing("M104 S0").line, "M104 S0");
        assert_eq!(model.process_outgoing("M140 S0").line, "M140 S0");
    }

    #[test]
    fn test_bed_offset_on_m190_starts_heatup() {
        let mut model = model();
        model.set_offsets(BTreeMap::from([(HeaterId::Bed, 5.0)]));
        let effects = model.process_outgoing("M190 S60");
        assert_eq!(effects.line, "M190 S65");
        assert!(effects.starts_heatup);
    }

    #[test]
    fn test_offset_targets_explicit_tool() {
        let mut model = model();
        model.set_offsets(BTreeMap::from([(HeaterId::Tool(1), 3.0)]));
        assert_eq!(model.process_outgoing("M104 T1 S200").line, "M104 T1 S203");
        assert_eq!(model.process_outgoing("M104 S200").line, "M104 S200");
    }

    #[test]
    fn test_feedrate_multiplier_rewrites_f() {
        let mut model = model();
        model.set_feedrate_multiplier(150.0);
        let effects = model.process_outgoing("G1 X10 F1000");
        assert_eq!(effects.line, "G1 X10 F1500");
    }

    #[test]
    fn test_m220_tracks_multiplier() {
        let mut model = model();
        model.process_outgoing("M220 S80");
        assert_eq!(model.feedrate_multiplier(), 80.0);
    }

    #[test]
    fn test_z_change_detection() {
        let mut model = model();
        let effects = model.process_outgoing("G1 Z0.3 F300");
        assert_eq!(effects.z_change, Some(0.3));
        let effects = model.process_outgoing("G1 X10 Y10");
        assert_eq!(effects.z_change, None);
        let effects = model.process_outgoing("G1 Z0.5");
        assert_eq!(effects.z_change, Some(0.5));
    }

    #[test]
    fn test_relative_mode_tracking() {
        let mut model = model();
        model.process_outgoing("G1 Z1.0");
        model.process_outgoing("G91");
        let effects = model.process_outgoing("G1 Z0.5");
        assert_eq!(effects.z_change, Some(1.5));
    }

    #[test]
    fn test_g92_sets_logical_position() {
        let mut model = model();
        model.process_outgoing("G1 E100");
        model.process_outgoing("G92 E0");
        assert_eq!(model.tracked_position().e, Some(0.0));
    }

    #[test]
    fn test_tool_change_detected() {
        let mut model = model();
        let effects = model.process_outgoing("T1");
        assert_eq!(effects.tool_change, Some(1));
        assert_eq!(model.current_tool(), 1);
        // Re-selecting the same tool is not a change
        let effects = model.process_outgoing("T1");
        assert_eq!(effects.tool_change, None);
    }

    #[test]
    fn test_m110_signals_reset() {
        let mut model = model();
        let effects = model.process_outgoing("M110 N0");
        assert_eq!(effects.line_number_reset, Some(0));
    }

    #[test]
    fn test_g90_influences_extruder_flag() {
        let mut model = HeaterModel::new(true);
        model.process_outgoing("G1 E10");
        model.process_outgoing("G91");
        model.process_outgoing("G1 E5");
        assert_eq!(model.tracked_position().e, Some(15.0));

        let mut model = HeaterModel::new(false);
        model.process_outgoing("G1 E10");
        model.process_outgoing("G91");
        model.process_outgoing("G1 E5");
        assert_eq!(model.tracked_position().e, Some(5.0));
    }
}
