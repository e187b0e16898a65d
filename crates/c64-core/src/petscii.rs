//! PETSCII control codes and text sanitizing for the C64 character set.
//!
//! Reference: <https://sta.c64.org/cbm64pet.html>

use std::sync::LazyLock;

use regex::Regex;

// Colours
pub const WHITE: u8 = 5;
pub const RED: u8 = 28;
pub const GREEN: u8 = 30;
pub const BLUE: u8 = 31;
pub const ORANGE: u8 = 129;
pub const BLACK: u8 = 144;
pub const PINK: u8 = 150;
pub const DARK_GREY: u8 = 151;
pub const GREY: u8 = 152;
pub const LIGHT_GREEN: u8 = 153;
pub const LIGHT_BLUE: u8 = 154;
pub const LIGHT_GREY: u8 = 155;
pub const PURPLE: u8 = 156;
pub const YELLOW: u8 = 158;
pub const CYAN: u8 = 159;

// Cursor control
pub const CURSOR_DOWN: u8 = 17;
pub const CURSOR_RIGHT: u8 = 29;
pub const CURSOR_UP: u8 = 145;
pub const CURSOR_LEFT: u8 = 157;

// Display control
pub const REVERSE_ON: u8 = 18;
pub const REVERSE_OFF: u8 = 146;
pub const CLEAR: u8 = 147;
pub const HOME: u8 = 19;
pub const DELETE: u8 = 20;
pub const RETURN: u8 = 13;

pub const UP_UNDERSCORE: u8 = 163;

/// Screen width in characters.
pub const COLUMNS: usize = 40;

/// Default maximum length of a cleaned chat line.
pub const MAX_MESSAGE_LEN: usize = 256;

static ALLOWED_RUNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[,.\-_0-9a-zA-Z:;!?*~$&#@(){}+=<>\[\]'/"% ]+"#).expect("valid pattern")
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid pattern"));

/// Reduce arbitrary text to what the C64 can display: runs of allowed
/// characters joined by single spaces, lowercased, at most `max_len`
/// characters (with a trailing `...` when cut).
pub fn clean_message(input: &str, max_len: usize) -> String {
    let runs: Vec<&str> = ALLOWED_RUNS
        .find_iter(input.trim())
        .map(|m| m.as_str())
        .filter(|run| !run.trim().is_empty())
        .collect();

    let joined = runs.join(" ").trim().to_lowercase();
    let mut cleaned = WHITESPACE.replace_all(&joined, " ").into_owned();

    if cleaned.len() > max_len {
        // Only ASCII survives the filter, so byte offsets are char offsets.
        cleaned.truncate(max_len);
        cleaned.push_str("...");
    }
    cleaned
}

/// `text` in `color`, underlined on the next row with up-underscore glyphs.
pub fn draw_underscore(text: &str, color: u8, underscore_color: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2 + 4);
    out.push(color);
    out.extend_from_slice(text.as_bytes());
    out.push(RETURN);
    out.push(underscore_color);
    out.extend(std::iter::repeat(UP_UNDERSCORE).take(text.len()));
    out.push(RETURN);
    out.push(color);
    out
}

/// Sequence that walks the cursor back over the current row and deletes it.
pub fn erase_line() -> Vec<u8> {
    let mut out = Vec::with_capacity(COLUMNS * 2 + 2);
    out.push(RETURN);
    out.extend(std::iter::repeat(CURSOR_LEFT).take(COLUMNS));
    out.push(RETURN);
    out.extend(std::iter::repeat(DELETE).take(COLUMNS));
    out
}
