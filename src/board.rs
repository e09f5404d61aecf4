//! # Departure Board Pipeline
//!
//! Turns one raw snapshot into the ordered, display-ready entries for a board:
//!
//! 1. **Extract**: passes of the board's stops, flattened in stop order
//! 2. **Derive timing**: one "now" per batch, so entries in a batch agree
//! 3. **Sort**: by expected arrival, stable
//! 4. **Cutoff**: keep `cutoff ≤ minutes < 100`
//! 5. **Limit**: first `max_items`
//! 6. **Enrich**: line colors and short name
//! 7. **Classify**: punctuality from delay
//!
//! Every stage is a plain function over the in-flight list so each one can be
//! tested on its own; [`BoardPipeline::process`] chains them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::ovapi::{RawPass, Snapshot};
use crate::renderer::SlotWriter;
use crate::{timing, DepartureEntry, LineMetadata, Punctuality, SlotValue, Timing};

/// Departures further out than this many minutes are never shown.
pub const HORIZON_MINUTES: f64 = 100.0;

/// A pass with its timing derived, not yet enriched.
#[derive(Clone, Debug, PartialEq)]
pub struct TimedPass {
    pub pass: RawPass,
    pub timing: Timing,
}

/// Stage 1: passes for `stop_codes`, in stop order then document order.
///
/// Stop codes missing from the snapshot contribute nothing. Pass records that
/// do not decode are dropped with a warning.
pub fn extract(snapshot: &Snapshot, stop_codes: &[String]) -> Vec<RawPass> {
    stop_codes
        .iter()
        .filter_map(|code| snapshot.get(code))
        .flat_map(|stop| stop.passes.iter())
        .filter_map(|(id, record)| match RawPass::deserialize(record) {
            Ok(pass) => Some(pass),
            Err(e) => {
                log::warn!("dropping malformed pass {id}: {e}");
                None
            }
        })
        .collect()
}

/// Stage 2: timing relative to a single `now` for the whole batch.
pub fn derive_timing(passes: Vec<RawPass>, now: DateTime<Utc>, zone: Tz) -> Vec<TimedPass> {
    passes
        .into_iter()
        .filter_map(|pass| {
            match timing::derive(
                now,
                &pass.expected_arrival_time,
                &pass.target_arrival_time,
                zone,
            ) {
                Ok(timing) => Some(TimedPass { pass, timing }),
                Err(e) => {
                    log::warn!(
                        "dropping pass of line {} at {}: {e}",
                        pass.line_planning_number,
                        pass.timing_point_code
                    );
                    None
                }
            }
        })
        .collect()
}

/// Stage 3: ascending expected arrival; equal instants keep their input order.
pub fn sort_by_arrival(mut passes: Vec<TimedPass>) -> Vec<TimedPass> {
    passes.sort_by_key(|p| p.timing.expected_at);
    passes
}

/// Stage 4: keep entries arriving in `[cutoff_minutes, 100)` minutes.
pub fn within_cutoff(passes: Vec<TimedPass>, cutoff_minutes: f64) -> Vec<TimedPass> {
    passes
        .into_iter()
        .filter(|p| {
            let minutes = p.timing.minutes_to_arrival();
            minutes >= cutoff_minutes && minutes < HORIZON_MINUTES
        })
        .collect()
}

/// Stage 5: the first `max_items` entries.
pub fn limit<T>(mut items: Vec<T>, max_items: usize) -> Vec<T> {
    items.truncate(max_items);
    items
}

/// Stages 6 and 7: attach line metadata and punctuality.
pub fn enrich_and_classify(passes: Vec<TimedPass>) -> Vec<DepartureEntry> {
    passes
        .into_iter()
        .map(|TimedPass { pass, timing }| DepartureEntry {
            line: LineMetadata::lookup(&pass.line_planning_number),
            punctuality: Punctuality::classify(timing.delay),
            pass,
            timing,
        })
        .collect()
}

/// One logical board: a set of stops, a cutoff, and a maximum length.
#[derive(Clone, Debug)]
pub struct BoardPipeline {
    name: String,
    stop_codes: Vec<String>,
    cutoff_minutes: f64,
    max_items: usize,
    zone: Tz,
}

impl BoardPipeline {
    pub fn new(
        name: impl Into<String>,
        stop_codes: Vec<String>,
        cutoff_minutes: f64,
        max_items: usize,
        zone: Tz,
    ) -> Self {
        BoardPipeline {
            name: name.into(),
            stop_codes,
            cutoff_minutes,
            max_items,
            zone,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop_codes(&self) -> &[String] {
        &self.stop_codes
    }

    /// Run every stage over one snapshot, evaluated at `now`.
    pub fn process(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Vec<DepartureEntry> {
        let passes = extract(snapshot, &self.stop_codes);
        let timed = derive_timing(passes, now, self.zone);
        let sorted = sort_by_arrival(timed);
        let upcoming = within_cutoff(sorted, self.cutoff_minutes);
        enrich_and_classify(limit(upcoming, self.max_items))
    }

    /// Consume snapshots until the feed closes, writing each board into `writer`.
    ///
    /// A lagging board skips straight to the newest snapshot.
    pub fn spawn(
        self,
        mut snapshots: broadcast::Receiver<Arc<Snapshot>>,
        writer: SlotWriter,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match snapshots.recv().await {
                    Ok(snapshot) => {
                        let entries = self.process(&snapshot, Utc::now());
                        match writer.write_board(entries) {
                            Ok(values) => self.log_board(&values),
                            Err(e) => log::error!("board {}: {e}", self.name),
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("board {} skipped {skipped} snapshots", self.name);
                    }
                    Err(RecvError::Closed) => {
                        log::info!("board {}: feed closed", self.name);
                        break;
                    }
                }
            }
        })
    }

    fn log_board(&self, values: &[SlotValue]) {
        for value in values {
            log::info!("{}: {value}", self.name);
        }
    }
}
