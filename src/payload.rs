//! # AWTRIX Custom App Payloads
//!
//! JSON bodies published to `{prefix}/custom/arrivals{i}`. A populated slot is
//! a list of draw instructions on the clock's 32×8 matrix:
//!
//! ```text
//!  x: 0        9 11
//!     ┌────────┐
//!     │  2k    │  8 min
//!     └────────┘       · ← crawl pixel on row 7
//! ```
//!
//! Instruction tags follow the AWTRIX custom app API: `df` fill rectangle,
//! `dl` line, `dt` text, `dp` pixel.

use serde::Serialize;

use crate::{DepartureEntry, Punctuality, SlotValue};

pub const NEUTRAL_COLOR: &str = "#ffffff";
pub const LATE_COLOR: &str = "#800000";
pub const EARLY_COLOR: &str = "#00cc00";
pub const BLANK_COLOR: &str = "#000000";
pub const CRAWL_COLOR: &str = "#dddddd";

/// Number of crawl pixel positions along the bottom of the line tile.
pub const CRAWL_PERIOD: usize = 9;

pub const LOADING_TEXT: &str = "Loading...";

/// Seconds a loading message stays on screen when rendered by the tick.
const LOADING_DURATION_SECS: u32 = 3;

/// Column where the minutes label starts.
const MINUTES_X: i32 = 11;

/// A single AWTRIX drawing primitive.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DrawInstruction {
    /// `[x, y, width, height, color]`
    #[serde(rename = "df")]
    FillRect(i32, i32, i32, i32, String),
    /// `[x0, y0, x1, y1, color]`
    #[serde(rename = "dl")]
    Line(i32, i32, i32, i32, String),
    /// `[x, y, text, color]`
    #[serde(rename = "dt")]
    Text(i32, i32, String, String),
    /// `[x, y, color]`
    #[serde(rename = "dp")]
    Pixel(i32, i32, String),
}

/// Body of one custom app update.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AppPayload {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<u32>,
        pos: usize,
    },
    Draw {
        pos: usize,
        draw: Vec<DrawInstruction>,
    },
}

impl AppPayload {
    /// Placeholder published once per slot at startup.
    pub fn startup_loading(pos: usize) -> Self {
        AppPayload::Text {
            text: LOADING_TEXT.to_string(),
            duration: None,
            pos,
        }
    }

    /// Render a slot at position `pos` with the crawl pixel at `crawl`.
    pub fn for_slot(pos: usize, value: &SlotValue, crawl: usize) -> Self {
        match value {
            SlotValue::Loading => AppPayload::Text {
                text: LOADING_TEXT.to_string(),
                duration: Some(LOADING_DURATION_SECS),
                pos,
            },
            SlotValue::Empty => AppPayload::Draw {
                pos,
                draw: vec![
                    DrawInstruction::FillRect(0, 0, 9, 7, BLANK_COLOR.to_string()),
                    DrawInstruction::Text(1, 1, "-".to_string(), NEUTRAL_COLOR.to_string()),
                    DrawInstruction::Text(
                        MINUTES_X,
                        1,
                        "-- min".to_string(),
                        NEUTRAL_COLOR.to_string(),
                    ),
                    crawl_pixel(crawl),
                ],
            },
            SlotValue::Populated(entry) => AppPayload::Draw {
                pos,
                draw: departure_instructions(entry, crawl),
            },
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Color of the minutes label for a punctuality class.
pub fn time_color(punctuality: Punctuality) -> &'static str {
    match punctuality {
        Punctuality::Late => LATE_COLOR,
        Punctuality::Early => EARLY_COLOR,
        Punctuality::OnTime => NEUTRAL_COLOR,
    }
}

fn crawl_pixel(crawl: usize) -> DrawInstruction {
    DrawInstruction::Pixel(crawl as i32, 7, CRAWL_COLOR.to_string())
}

fn departure_instructions(entry: &DepartureEntry, crawl: usize) -> Vec<DrawInstruction> {
    // Single characters sit centered on the tile
    let label_x = if entry.line.display_name.chars().count() == 1 { 3 } else { 1 };

    vec![
        DrawInstruction::FillRect(0, 0, 9, 7, entry.line.color.clone()),
        DrawInstruction::Line(0, 7, 8, 7, NEUTRAL_COLOR.to_string()),
        DrawInstruction::Text(
            label_x,
            1,
            entry.line.display_name.clone(),
            entry.line.text_color.clone(),
        ),
        DrawInstruction::Text(
            MINUTES_X,
            1,
            format!("{} min", entry.timing.display_minutes()),
            time_color(entry.punctuality).to_string(),
        ),
        crawl_pixel(crawl),
    ]
}

/// Body sent to `{prefix}/switch` to bring the first slot to the front.
#[derive(Clone, Debug, Serialize)]
pub struct SwitchPayload {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loading_payloads() {
        assert_eq!(
            serde_json::to_value(AppPayload::startup_loading(2)).unwrap(),
            json!({ "text": "Loading...", "pos": 2 })
        );
        assert_eq!(
            serde_json::to_value(AppPayload::for_slot(4, &SlotValue::Loading, 0)).unwrap(),
            json!({ "text": "Loading...", "duration": 3, "pos": 4 })
        );
    }

    #[test]
    fn empty_slot_draws_blank_tile_and_crawl() {
        assert_eq!(
            serde_json::to_value(AppPayload::for_slot(1, &SlotValue::Empty, 5)).unwrap(),
            json!({
                "pos": 1,
                "draw": [
                    { "df": [0, 0, 9, 7, "#000000"] },
                    { "dt": [1, 1, "-", "#ffffff"] },
                    { "dt": [11, 1, "-- min", "#ffffff"] },
                    { "dp": [5, 7, "#dddddd"] }
                ]
            })
        );
    }

    #[test]
    fn time_colors_follow_punctuality() {
        assert_eq!(time_color(Punctuality::Late), "#800000");
        assert_eq!(time_color(Punctuality::Early), "#00cc00");
        assert_eq!(time_color(Punctuality::OnTime), "#ffffff");
    }
}
