//! # Departure Board Core Library
//!
//! This library turns a periodically refreshed feed of public-transit arrival
//! predictions into a small set of display "slots" on an AWTRIX pixel clock.
//! Each slot is an individual custom app on the clock; the clock pages through
//! them on its own and reports which one is currently visible.
//!
//! ## Data Flow
//! 1. **Poll**: [`polling::PollingSource`] fetches one snapshot per refresh tick
//!    and broadcasts it to every board
//! 2. **Transform**: each [`board::BoardPipeline`] extracts its stops, derives
//!    timing, sorts, filters, limits, enriches and classifies
//! 3. **Store**: the board writes its entries into its own slot range
//! 4. **Render**: [`renderer::PagingRenderer`] publishes the visible slots on a
//!    fixed tick, independent of the refresh cadence
//!
//! ## Core Types
//! - [`DepartureEntry`]: one display-ready arrival
//! - [`Punctuality`]: on-time / late / early classification
//! - [`SlotValue`]: what a single physical slot currently holds

use std::fmt;

use chrono::{DateTime, Duration, Utc};
pub mod board;
pub mod config;
pub mod line_meta;
pub mod ovapi;
pub mod payload;
pub mod polling;
pub mod renderer;
pub mod timing;
pub mod transport;

pub use line_meta::LineMetadata;
pub use ovapi::RawPass;

/// Delay in seconds at or above which a departure counts as late.
pub const LATE_THRESHOLD_SECS: i64 = 120;

/// Delay in seconds at or below which a departure counts as early.
pub const EARLY_THRESHOLD_SECS: i64 = -60;

/// Punctuality of a single departure, derived from its delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Punctuality {
    OnTime,
    Late,
    Early,
}

impl Punctuality {
    /// Classify a delay (expected minus target).
    ///
    /// Late is checked first, so the two thresholds never overlap.
    ///
    /// # Example
    /// ```
    /// use chrono::Duration;
    /// use departure_board_lib::Punctuality;
    ///
    /// assert_eq!(Punctuality::classify(Duration::seconds(120)), Punctuality::Late);
    /// assert_eq!(Punctuality::classify(Duration::seconds(-59)), Punctuality::OnTime);
    /// ```
    pub fn classify(delay: Duration) -> Self {
        let delay_ms = delay.num_milliseconds();
        if delay_ms >= LATE_THRESHOLD_SECS * 1000 {
            Punctuality::Late
        } else if delay_ms <= EARLY_THRESHOLD_SECS * 1000 {
            Punctuality::Early
        } else {
            Punctuality::OnTime
        }
    }
}

/// Timing derived for one pass relative to a fixed evaluation instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Absolute expected arrival, used for ordering
    pub expected_at: DateTime<Utc>,
    /// Time from "now" until the expected arrival (negative when overdue)
    pub duration_to_arrival: Duration,
    /// Expected minus target arrival (negative when early)
    pub delay: Duration,
}

impl Timing {
    /// Minutes until arrival as a fraction, used by the cutoff filter.
    pub fn minutes_to_arrival(&self) -> f64 {
        self.duration_to_arrival.num_milliseconds() as f64 / 60_000.0
    }

    /// Whole minutes until arrival, truncated toward zero, as shown on the display.
    pub fn display_minutes(&self) -> i64 {
        self.duration_to_arrival.num_seconds() / 60
    }
}

/// A display-ready departure: the raw pass plus everything derived from it.
///
/// Assembled once at the end of a pipeline pass and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct DepartureEntry {
    pub pass: RawPass,
    pub timing: Timing,
    pub line: LineMetadata,
    pub punctuality: Punctuality,
}

impl fmt::Display for DepartureEntry {
    /// Console form, e.g. `[2 ] 8 min (+30s)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:<2}] {} min ({})",
            self.line.display_name,
            self.timing.display_minutes(),
            timing::format_signed_seconds(self.timing.delay)
        )
    }
}

/// Contents of one physical display slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SlotValue {
    /// Nothing has been written yet
    #[default]
    Loading,
    /// A board wrote to this slot but had no departure for it
    Empty,
    Populated(DepartureEntry),
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotValue::Loading => f.write_str("[..] Loading..."),
            SlotValue::Empty => f.write_str("[--] -- min (+0s)"),
            SlotValue::Populated(entry) => fmt::Display::fmt(entry, f),
        }
    }
}
