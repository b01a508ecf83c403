//! term_colors highlights the identifiers that show up in the service's log lines, so that
//! tags, paths and commands stand out from the surrounding prose.
//!
//! Every helper accepts anything [Display](std::fmt::Display)able and hands back an owned,
//! painted string. Whether the escape codes are actually honoured is up to the terminal
//! (and `RUST_LOG_STYLE`).

use ansi_term::{ANSIString, Color, Style};
use std::fmt::Display;

/// Image tags and record ids.
pub fn tag<T: Display>(input: T) -> ANSIString<'static> {
    Color::Cyan.bold().paint(input.to_string())
}

/// Filesystem paths.
pub fn path<T: Display>(input: T) -> ANSIString<'static> {
    Color::Blue.paint(input.to_string())
}

/// External commands, as they were run.
pub fn command<T: Display>(input: T) -> ANSIString<'static> {
    Color::Purple.paint(input.to_string())
}

pub fn success<T: Display>(input: T) -> ANSIString<'static> {
    Color::Green.paint(input.to_string())
}

pub fn failure<T: Display>(input: T) -> ANSIString<'static> {
    Color::Red.bold().paint(input.to_string())
}

/// Anomalies that were tolerated rather than fixed.
pub fn anomaly<T: Display>(input: T) -> ANSIString<'static> {
    Color::RGB(243, 113, 33).paint(input.to_string())
}

pub fn bold<T: Display>(input: T) -> ANSIString<'static> {
    Style::new().bold().paint(input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn painted_text_survives() {
        let painted = tag("22.04-latest").to_string();
        assert!(painted.contains("22.04-latest"));
        assert!(painted.starts_with('\u{1b}'));
    }

    #[test]
    fn unpainted_content_is_unchanged() {
        assert_eq!(&*path("/data/22.04-latest"), "/data/22.04-latest");
    }
}
