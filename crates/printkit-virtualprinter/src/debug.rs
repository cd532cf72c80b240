//! `!!DEBUG` fault-injection channel
//!
//! Lines of the form `!!DEBUG:<command>` never reach the simulated
//! firmware; they arm faults used to exercise the host's recovery paths.

/// Armed faults and their trigger points
#[derive(Debug, Clone, Default)]
pub struct DebugState {
    /// Swallow the responses of the next command
    pub drop_next_answer: bool,
    /// Stop responding entirely
    pub awol: bool,
    /// Fail reads and writes as if the port vanished
    pub connection_dropped: bool,
    /// Emit a line-number mismatch when this N arrives
    pub lineno_mismatch_at: Option<u32>,
    /// Emit a checksum mismatch when this N arrives
    pub checksum_mismatch_at: Option<u32>,
    /// Emit a missing-lineno error when this N arrives
    pub missing_lineno_at: Option<u32>,
    /// Percentage of incoming numbered lines answered with a resend
    pub resend_ratio: u8,
}

/// Result of interpreting a debug line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugCommand {
    /// The line was a recognized debug command and has been applied
    Applied,
    /// The line was not a debug command
    NotDebug,
    /// The line looked like a debug command but was not understood
    Unknown(String),
}

impl DebugState {
    /// Interpret `line` as a debug command, mutating the armed faults
    pub fn interpret(&mut self, line: &str) -> DebugCommand {
        let Some(command) = line.strip_prefix("!!DEBUG:") else {
            return DebugCommand::NotDebug;
        };
        let command = command.trim();

        match command {
            "dont_answer" => self.drop_next_answer = true,
            "trigger_resend_lineno" => self.lineno_mismatch_at = Some(100),
            "trigger_resend_checksum" => self.checksum_mismatch_at = Some(115),
            "trigger_missing_lineno" => self.missing_lineno_at = Some(110),
            "go_awol" => self.awol = true,
            "drop_connection" => self.connection_dropped = true,
            "reset" => *self = Self::default(),
            other => {
                if let Some(ratio) = other
                    .strip_prefix("set_resend_ratio")
                    .map(|rest| rest.trim_start_matches([':', ' ']))
                    .and_then(|rest| rest.parse::<u8>().ok())
                {
                    self.resend_ratio = ratio.min(100);
                } else {
                    return DebugCommand::Unknown(other.to_string());
                }
            }
        }
        DebugCommand::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_debug() {
        let mut state = DebugState::default();
        assert_eq!(state.interpret("G28"), DebugCommand::NotDebug);
    }

    #[test]
    fn test_trigger_commands() {
        let mut state = DebugState::default();
        assert_eq!(
            state.interpret("!!DEBUG:trigger_resend_lineno"),
            DebugCommand::Applied
        );
        assert_eq!(state.lineno_mismatch_at, Some(100));

        state.interpret("!!DEBUG:trigger_resend_checksum");
        assert_eq!(state.checksum_mismatch_at, Some(115));

        state.interpret("!!DEBUG:trigger_missing_lineno");
        assert_eq!(state.missing_lineno_at, Some(110));
    }

    #[test]
    fn test_resend_ratio_forms() {
        let mut state = DebugState::default();
        state.interpret("!!DEBUG:set_resend_ratio:25");
        assert_eq!(state.resend_ratio, 25);
        state.interpret("!!DEBUG:set_resend_ratio 40");
        assert_eq!(state.resend_ratio, 40);
        state.interpret("!!DEBUG:set_resend_ratio:250");
        assert_eq!(state.resend_ratio, 100);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut state = DebugState::default();
        state.interpret("!!DEBUG:go_awol");
        state.interpret("!!DEBUG:set_resend_ratio:10");
        state.interpret("!!DEBUG:reset");
        assert!(!state.awol);
        assert_eq!(state.resend_ratio, 0);
    }

    #[test]
    fn test_unknown_command() {
        let mut state = DebugState::default();
        assert!(matches!(
            state.interpret("!!DEBUG:frobnicate"),
            DebugCommand::Unknown(_)
        ));
    }
}
