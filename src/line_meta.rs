//! # Line Metadata
//!
//! Static lookup from a line planning number to the colors and short name the
//! clock shows for it. Lines not listed fall back to a neutral green tile with
//! the raw identifier as its name.

/// Background fill for lines without an entry in the table.
pub const FALLBACK_COLOR: &str = "#006600";

/// Label color for lines without an entry in the table.
pub const FALLBACK_TEXT_COLOR: &str = "#ffffff";

/// Presentation of one transit line on the display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineMetadata {
    /// Tile background color (`#rrggbb`)
    pub color: String,
    /// Color of the line label drawn on the tile
    pub text_color: String,
    /// Short label, at most two characters to fit the tile
    pub display_name: String,
}

impl LineMetadata {
    fn known(color: &str, text_color: &str, display_name: &str) -> Self {
        LineMetadata {
            color: color.to_string(),
            text_color: text_color.to_string(),
            display_name: display_name.to_string(),
        }
    }

    /// Look up a line by exact identifier.
    ///
    /// # Example
    /// ```
    /// use departure_board_lib::LineMetadata;
    ///
    /// assert_eq!(LineMetadata::lookup("42").display_name, "2k");
    /// assert_eq!(LineMetadata::lookup("N5").color, "#006600");
    /// ```
    pub fn lookup(line: &str) -> Self {
        match line {
            "2" => Self::known("#fcc203", "#000000", "2"),
            "42" => Self::known("#fcc203", "#000000", "2k"),
            "3" => Self::known("#7f1a6b", "#ffffff", "3"),
            "34" => Self::known("#7f1a6b", "#ffffff", "34"),
            "4" => Self::known("#dc7a09", "#ffffff", "4"),
            "11" => Self::known("#77503c", "#ffffff", "11"),
            other => Self::known(FALLBACK_COLOR, FALLBACK_TEXT_COLOR, other),
        }
    }
}
