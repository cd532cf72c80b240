//! Regex feedback controls
//!
//! User-defined `{name, regex, template}` rules matched against every
//! incoming line. All rules are compiled into one alternation for a cheap
//! first pass; the matching rule's own regex then provides the capture
//! groups for template rendering. The matcher is rebuilt whenever the rule
//! list changes; nothing is registered globally.

use printkit_core::FeedbackControl;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug)]
struct CompiledControl {
    name: String,
    regex: Regex,
    template: String,
}

/// Compiled set of feedback controls
#[derive(Debug, Default)]
pub struct FeedbackMatcher {
    controls: Vec<CompiledControl>,
    combined: Option<Regex>,
}

impl FeedbackMatcher {
    /// Compile a rule list. Invalid regexes are logged and skipped.
    pub fn compile(controls: &[FeedbackControl]) -> Self {
        let mut compiled = Vec::new();
        for control in controls {
            match Regex::new(&control.regex) {
                Ok(regex) => compiled.push(CompiledControl {
                    name: control.name.clone(),
                    regex,
                    template: control.template.clone(),
                }),
                Err(e) => {
                    tracing::warn!(
                        "ignoring feedback control '{}': invalid regex: {}",
                        control.name,
                        e
                    );
                }
            }
        }

        let combined = if compiled.is_empty() {
            None
        } else {
            let alternation = compiled
                .iter()
                .enumerate()
                .map(|(index, control)| format!("(?P<fb_{}>{})", index, control.regex.as_str()))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&alternation) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!("feedback alternation failed to compile: {}", e);
                    None
                }
            }
        };

        Self {
            controls: compiled,
            combined,
        }
    }

    /// Whether any rules are active
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Match a line; returns the rule name and the rendered template
    pub fn match_line(&self, line: &str) -> Option<(String, String)> {
        let index = match &self.combined {
            Some(combined) => {
                let captures = combined.captures(line)?;
                (0..self.controls.len())
                    .find(|index| captures.name(&format!("fb_{}", index)).is_some())?
            }
            // Duplicate group names across rules break the alternation;
            // fall back to scanning each rule
            None => (0..self.controls.len())
                .find(|index| self.controls[*index].regex.is_match(line))?,
        };
        let control = &self.controls[index];
        let own_captures = control.regex.captures(line)?;
        let formatted = render_template(&control.template, &own_captures);
        Some((control.name.clone(), formatted))
    }
}

fn template_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{(\d+|[A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"))
}

/// Substitute `{0}`, `{1}`, ... with positional groups and `{name}` with
/// named groups
fn render_template(template: &str, captures: &regex::Captures<'_>) -> String {
    template_regex()
        .replace_all(template, |token: &regex::Captures<'_>| {
            let key = &token[1];
            if let Ok(index) = key.parse::<usize>() {
                captures
                    .get(index + 1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            } else {
                captures
                    .name(key)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| token[0].to_string())
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(name: &str, regex: &str, template: &str) -> FeedbackControl {
        FeedbackControl {
            name: name.to_string(),
            regex: regex.to_string(),
            template: template.to_string(),
        }
    }

    #[test]
    fn test_positional_template() {
        let matcher = FeedbackMatcher::compile(&[control(
            "print_time",
            r"echo:Print time: (\d+)h (\d+)m",
            "{0} hours {1} minutes",
        )]);
        let (name, formatted) = matcher
            .match_line("echo:Print time: 2h 13m")
            .unwrap();
        assert_eq!(name, "print_time");
        assert_eq!(formatted, "2 hours 13 minutes");
    }

    #[test]
    fn test_named_template() {
        let matcher = FeedbackMatcher::compile(&[control(
            "fan",
            r"Fan speed: (?P<speed>\d+)",
            "fan at {speed} RPM",
        )]);
        let (_, formatted) = matcher.match_line("Fan speed: 4200").unwrap();
        assert_eq!(formatted, "fan at 4200 RPM");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let matcher = FeedbackMatcher::compile(&[
            control("a", r"alpha (\d+)", "a={0}"),
            control("b", r"beta (\d+)", "b={0}"),
        ]);
        let (name, formatted) = matcher.match_line("beta 7").unwrap();
        assert_eq!(name, "b");
        assert_eq!(formatted, "b=7");
    }

    #[test]
    fn test_invalid_regex_skipped() {
        let matcher = FeedbackMatcher::compile(&[
            control("bad", r"([unclosed", "x"),
            control("good", r"ping (\d+)", "pong {0}"),
        ]);
        assert!(!matcher.is_empty());
        assert!(matcher.match_line("ping 1").is_some());
    }

    #[test]
    fn test_no_rules_no_match() {
        let matcher = FeedbackMatcher::compile(&[]);
        assert!(matcher.match_line("anything").is_none());
    }
}
