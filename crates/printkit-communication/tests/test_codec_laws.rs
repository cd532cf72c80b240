//! Property tests for the frame codec and resend parser

use printkit_communication::protocol::codec;
use printkit_communication::protocol::parsers::resend;
use proptest::prelude::*;

proptest! {
    /// checksum(P, N) == XOR of all bytes of "N<N> P"
    #[test]
    fn checksum_law(payload in "[ -~]{0,80}", n in 0u32..1_000_000) {
        let framed = format!("N{} {}", n, payload);
        let expected = framed.bytes().fold(0u8, |acc, b| acc ^ b);
        prop_assert_eq!(codec::checksum(&payload, n), expected);
    }

    /// The framed line always parses back into its parts
    #[test]
    fn frame_shape_law(payload in "[ -~&&[^*]]{1,60}", n in 0u32..100_000) {
        let framed = codec::frame(&payload, n);
        let (body, checksum) = framed.rsplit_once('*').unwrap();
        prop_assert_eq!(body, format!("N{} {}", n, payload));
        let parsed: u8 = checksum.parse().unwrap();
        prop_assert_eq!(parsed, codec::checksum(&payload, n));
    }

    /// strip_comment(x + "\n") == strip_comment(x) modulo trailing
    /// whitespace
    #[test]
    fn strip_comment_newline_law(line in "[ -~]{0,60}") {
        let with_newline = format!("{}\n", line);
        prop_assert_eq!(
            codec::strip_comment(&with_newline).trim_end().to_string(),
            codec::strip_comment(&line).trim_end().to_string()
        );
    }

    /// Escaped semicolons survive comment stripping
    #[test]
    fn escaped_semicolon_law(before in "[ -~&&[^;\\\\]]{0,20}", after in "[ -~&&[^;\\\\]]{0,20}") {
        let input = format!("{}\\;{}", before, after);
        let stripped = codec::strip_comment(&input);
        let expected = format!("{};{}", before, after);
        prop_assert_eq!(stripped, expected.trim_end());
    }

    /// Every accepted resend shape parses to its line number
    #[test]
    fn resend_shapes_law(n in 0u32..2_000_000) {
        for shape in [
            format!("Resend:{}", n),
            format!("Resend: {}", n),
            format!("Resend: N{}", n),
            format!("Resend: N:{}", n),
            format!("rs {}", n),
            format!("rs N{}", n),
            format!("Resend: {} expected checksum 109", n),
        ] {
            prop_assert_eq!(resend::parse(&shape), Some(n));
        }
    }
}

#[test]
fn monotonic_numbering() {
    // Framing a run of payloads with incrementing N yields gapless numbers
    let mut current_line = 0u32;
    let mut seen = Vec::new();
    for payload in ["G28", "G1 X10", "G1 X20", "M105"] {
        current_line += 1;
        let framed = codec::frame(payload, current_line);
        let n: u32 = framed[1..framed.find(' ').unwrap()].parse().unwrap();
        seen.push(n);
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
}
