//! Outgoing frame codec
//!
//! Line-number prefix and XOR checksum framing, comment stripping with
//! escape handling, and optional uppercasing of the command word.

/// XOR of all bytes of `N<n> <payload>`, as an 8-bit value
pub fn checksum(payload: &str, line_number: u32) -> u8 {
    let framed = format!("N{} {}", line_number, payload);
    framed.bytes().fold(0, |acc, b| acc ^ b)
}

/// Frame a payload with line number and checksum: `N<n> <payload>*<cs>`
pub fn frame(payload: &str, line_number: u32) -> String {
    format!(
        "N{} {}*{}",
        line_number,
        payload,
        checksum(payload, line_number)
    )
}

/// Strip a `;` comment, honoring `\;` as a literal semicolon and `\\` as a
/// literal backslash. Trailing whitespace left by the comment is removed.
pub fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(';') => out.push(';'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            ';' => break,
            _ => out.push(c),
        }
    }
    out.trim_end().to_string()
}

/// Uppercase the first whitespace-delimited token unless it is on the
/// blacklist (commands like `M117` whose argument is free text)
pub fn uppercase_command(line: &str, blacklist: &[String]) -> String {
    let trimmed = line.trim_start();
    let Some(first) = trimmed.split_whitespace().next() else {
        return line.to_string();
    };
    let upper = first.to_ascii_uppercase();
    if blacklist.iter().any(|b| b.eq_ignore_ascii_case(&upper)) {
        return line.to_string();
    }
    line.replacen(first, &upper, 1)
}

/// The G/M-code word of a command (`"G1"`, `"M104"`), uppercased
pub fn command_code(line: &str) -> Option<String> {
    line.split_whitespace()
        .next()
        .map(|w| w.to_ascii_uppercase())
}

/// Extract a numeric parameter like `S210` or `N100` from a command
pub fn parameter(line: &str, letter: char) -> Option<f64> {
    for token in line.split_whitespace().skip(1) {
        let mut chars = token.chars();
        if chars.next()?.eq_ignore_ascii_case(&letter) {
            if let Ok(value) = chars.as_str().parse() {
                return Some(value);
            }
        }
    }
    None
}

/// Replace a numeric parameter's value, preserving the rest of the line.
/// Returns the line unchanged when the parameter is absent.
pub fn replace_parameter(line: &str, letter: char, value: f64) -> String {
    let mut out = Vec::new();
    let mut replaced = false;
    for (index, token) in line.split_whitespace().enumerate() {
        let is_param = index > 0
            && token
                .chars()
                .next()
                .is_some_and(|c| c.eq_ignore_ascii_case(&letter))
            && token[1..].parse::<f64>().is_ok();
        if is_param && !replaced {
            let prefix = token.chars().next().unwrap_or(letter);
            out.push(format_parameter(prefix, value));
            replaced = true;
        } else {
            out.push(token.to_string());
        }
    }
    out.join(" ")
}

fn format_parameter(letter: char, value: f64) -> String {
    if (value.fract()).abs() < f64::EPSILON {
        format!("{}{}", letter, value as i64)
    } else {
        format!("{}{:.4}", letter, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_value() {
        // N0 M110 N0 checksums to 125 on real firmware
        assert_eq!(checksum("M110 N0", 0), 125);
    }

    #[test]
    fn test_frame_shape() {
        assert_eq!(frame("M110 N0", 0), "N0 M110 N0*125");
        let framed = frame("G28", 3);
        assert!(framed.starts_with("N3 G28*"));
    }

    #[test]
    fn test_strip_comment() {
        assert_eq!(strip_comment("G1 X10 ; move"), "G1 X10");
        assert_eq!(strip_comment("; pure comment"), "");
        assert_eq!(strip_comment("M117 hello \\; world"), "M117 hello ; world");
        assert_eq!(strip_comment("M117 a\\\\b"), "M117 a\\b");
        assert_eq!(strip_comment("G28"), "G28");
    }

    #[test]
    fn test_strip_comment_trailing_newline_equivalence() {
        for line in ["G1 X1 ; c", "G28", "\\;only", ""] {
            let with_newline = format!("{}\n", line);
            assert_eq!(
                strip_comment(&with_newline).trim_end(),
                strip_comment(line).trim_end()
            );
        }
    }

    #[test]
    fn test_uppercase_command() {
        let blacklist = vec!["M117".to_string(), "M118".to_string()];
        assert_eq!(uppercase_command("g28 x y", &blacklist), "G28 x y");
        assert_eq!(
            uppercase_command("m117 hello there", &blacklist),
            "m117 hello there"
        );
    }

    #[test]
    fn test_parameter_extraction() {
        assert_eq!(parameter("M104 S210", 'S'), Some(210.0));
        assert_eq!(parameter("M104 s210.5", 'S'), Some(210.5));
        assert_eq!(parameter("G1 X10 F1500", 'F'), Some(1500.0));
        assert_eq!(parameter("G28", 'S'), None);
        // The command word itself is not a parameter
        assert_eq!(parameter("M204 S100", 'M'), None);
    }

    #[test]
    fn test_replace_parameter() {
        assert_eq!(replace_parameter("M104 S210", 'S', 215.0), "M104 S215");
        assert_eq!(
            replace_parameter("G1 X10 F1500 E2.5", 'F', 1800.0),
            "G1 X10 F1800 E2.5"
        );
        assert_eq!(replace_parameter("G28", 'S', 1.0), "G28");
    }
}
