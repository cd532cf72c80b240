//! G-code script rendering
//!
//! Named scripts are injected at connection and print lifecycle events.
//! `{day}`, `{date}` and `{time}` resolve to the current clock; every
//! other placeholder is looked up in a caller-supplied profile map,
//! including indexed forms like `{print_temperature[1]}`. Unknown
//! placeholders are left untouched.

use crate::protocol::codec;
use chrono::Local;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Values available to script placeholders
#[derive(Debug, Clone, Default)]
pub struct ScriptContext {
    /// Profile-derived values (`layer_height`, `print_temperature`,
    /// `print_temperature[0]`, `profile_string`, ...)
    pub profile: BTreeMap<String, String>,
}

impl ScriptContext {
    /// An empty context; only the clock placeholders resolve
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one profile value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.profile.insert(key.into(), value.into());
    }
}

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:\[\d+\])?)\}").expect("static regex")
    })
}

/// Render a script into sendable lines: placeholders substituted,
/// comments stripped, blank lines dropped
pub fn render(script: &str, context: &ScriptContext) -> Vec<String> {
    let now = Local::now();
    let regex = placeholder_regex();

    script
        .lines()
        .map(|line| {
            regex
                .replace_all(line, |caps: &regex::Captures<'_>| {
                    let key = &caps[1];
                    match key {
                        "day" => now.format("%A").to_string(),
                        "date" => now.format("%d-%m-%Y").to_string(),
                        "time" => now.format("%H:%M:%S").to_string(),
                        other => context
                            .profile
                            .get(other)
                            .cloned()
                            .unwrap_or_else(|| caps[0].to_string()),
                    }
                })
                .into_owned()
        })
        .map(|line| codec::strip_comment(&line))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
