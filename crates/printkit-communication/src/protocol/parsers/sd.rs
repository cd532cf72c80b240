//! SD listing entry parsing
//!
//! Between `Begin file list` and `End file list` the firmware prints one
//! file per line: `NAME.GCO [size] [0xTIMESTAMP] ["Long Name.gcode"]`.

use printkit_core::SdFile;

/// Parse one listing entry
pub fn parse_file_entry(line: &str) -> Option<SdFile> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    // A quoted segment is the long filename
    let (bare, long_name) = match line.find('"') {
        Some(start) => {
            let rest = &line[start + 1..];
            let end = rest.find('"')?;
            (
                line[..start].trim(),
                Some(rest[..end].to_string()),
            )
        }
        None => (line, None),
    };

    let mut tokens = bare.split_whitespace();
    let name = tokens.next()?.to_string();

    let mut size = None;
    let mut timestamp = None;
    for token in tokens {
        if token.starts_with("0x") {
            timestamp = Some(token.to_string());
        } else if size.is_none() {
            size = token.parse().ok();
        }
    }

    Some(SdFile {
        name,
        size,
        long_name,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_only() {
        let entry = parse_file_entry("BENCHY.GCO").unwrap();
        assert_eq!(entry.name, "BENCHY.GCO");
        assert_eq!(entry.size, None);
    }

    #[test]
    fn test_name_and_size() {
        let entry = parse_file_entry("BENCHY.GCO 1024").unwrap();
        assert_eq!(entry.size, Some(1024));
    }

    #[test]
    fn test_full_shape() {
        let entry = parse_file_entry("BENCHY~1.GCO 3145728 0x52936b0 \"3D Benchy.gcode\"").unwrap();
        assert_eq!(entry.name, "BENCHY~1.GCO");
        assert_eq!(entry.size, Some(3145728));
        assert_eq!(entry.timestamp.as_deref(), Some("0x52936b0"));
        assert_eq!(entry.long_name.as_deref(), Some("3D Benchy.gcode"));
    }

    #[test]
    fn test_empty_line() {
        assert!(parse_file_entry("   ").is_none());
    }
}
