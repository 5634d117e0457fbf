//! Filename sanitization utilities

/// Sanitize a filename for safe filesystem usage
///
/// Replaces filesystem-unsafe characters with visually similar Unicode alternatives
/// that are safe to use in filenames across all major operating systems.
/// Trailing dots and spaces are dropped since Windows strips them silently.
///
/// - `AC/DC - T.N.T.` becomes `AC⧸DC - T.N.T`
/// - `Intro: Part 1` becomes `Intro꞉ Part 1`
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' => '⧸',  // U+29F8 Big Solidus
            '\\' => '⧹', // U+29F9 Big Reverse Solidus
            ':' => '꞉',  // U+A789 Modifier Letter Colon
            '*' => '⁎',  // U+204E Low Asterisk
            '?' => '？', // U+FF1F Fullwidth Question Mark
            '"' => '″',  // U+2033 Double Prime
            '<' => '‹',  // U+2039
            '>' => '›',  // U+203A
            '|' => '｜', // U+FF5C Fullwidth Vertical Line
            c if c.is_control() => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .trim_end_matches(['.', ' '])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_artist_separator() {
        assert_eq!(sanitize_filename("AC/DC - Thunderstruck"), "AC⧸DC - Thunderstruck");
    }

    #[test]
    fn test_sanitize_colon_and_question() {
        assert_eq!(sanitize_filename("Intro: Why?"), "Intro꞉ Why？");
    }

    #[test]
    fn test_trailing_dots_dropped() {
        assert_eq!(sanitize_filename("Band - T.N.T."), "Band - T.N.T");
        assert_eq!(sanitize_filename("Wait... "), "Wait");
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(sanitize_filename("A\tB\0C"), "A_B_C");
    }

    #[test]
    fn test_plain_name_untouched() {
        assert_eq!(sanitize_filename("  Band - Song  "), "Band - Song");
    }
}
