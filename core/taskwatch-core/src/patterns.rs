//! Compiled regex patterns for cleaning terminal output.
//!
//! Compiled once on first use.

use once_cell::sync::Lazy;
use regex::Regex;

/// ESC followed by a single Fe byte, or a full CSI sequence.
pub static RE_ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B(?:[@-Z\\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap());

pub fn strip_ansi(text: &str) -> String {
    RE_ANSI_ESCAPE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[1;32mok\x1b[0m done"), "ok done");
    }

    #[test]
    fn strips_cursor_movement_and_private_modes() {
        assert_eq!(strip_ansi("\x1b[?2004hprompt$ \x1b[K"), "prompt$ ");
        assert_eq!(strip_ansi("a\x1b[2Ab"), "ab");
    }

    #[test]
    fn strips_two_byte_escapes() {
        assert_eq!(strip_ansi("\x1bMline\x1b="), "line\x1b=");
        assert_eq!(strip_ansi("x\x1b\\y"), "xy");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(strip_ansi("plain $ text"), "plain $ text");
    }
}
