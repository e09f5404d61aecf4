//! # Paging Renderer
//!
//! Multiplexes the boards onto the clock's custom apps. The clock cycles
//! through `arrivals0`, `arrivals1`, ... on its own and reports the app on
//! screen; only that app and the next one are redrawn each tick, so the
//! broker is not flooded with frames nobody can see.
//!
//! ## Slots
//! The renderer owns a fixed array of [`SlotValue`]s. Boards reserve disjoint
//! ranges of it at setup ([`PagingRenderer::reserve`]) and afterwards write
//! only through their [`SlotWriter`]. The render tick reads whatever was last
//! written and never waits on a board.
//!
//! ## Tick
//! Every tick (250 ms by default) advances the crawl pixel one step along the
//! bottom of the line tile and publishes the visible slots:
//! - no app reported: slot 0 only
//! - `arrivals{p}` on screen: slots `p` and `p + 1`
//!
//! Slots not visible this tick keep whatever the clock last received.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::payload::{AppPayload, SwitchPayload, CRAWL_PERIOD};
use crate::transport::{Delivery, Inbox, Topics, Transport, TransportError};
use crate::{DepartureEntry, SlotValue};

/// App name prefix the clock reports for our slots.
const APP_PREFIX: &str = "arrivals";

/// Rejected slot write or reservation. Nothing is written when this is returned.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlotRangeError {
    #[error("slots {start}..{end} exceed the display's {total} slots")]
    OutOfBounds {
        start: usize,
        end: usize,
        total: usize,
    },

    #[error("slots {start}..{end} overlap slots {other_start}..{other_end} reserved earlier")]
    Overlap {
        start: usize,
        end: usize,
        other_start: usize,
        other_end: usize,
    },

    #[error("{len} departures do not fit a board of {capacity} slots")]
    Overflow { len: usize, capacity: usize },
}

/// Interpret the clock's "current app" report.
///
/// # Example
/// ```
/// use departure_board_lib::renderer::parse_active_page;
///
/// assert_eq!(parse_active_page("arrivals3"), Some(3));
/// assert_eq!(parse_active_page("someOtherApp"), None);
/// ```
pub fn parse_active_page(current_app: &str) -> Option<usize> {
    current_app.trim().strip_prefix(APP_PREFIX)?.parse().ok()
}

/// Slot indices drawn this tick for a given active page.
pub fn visible_slots(active_page: Option<usize>, total: usize) -> Vec<usize> {
    let window = match active_page {
        None => vec![0],
        Some(page) => std::iter::once(page).chain(page.checked_add(1)).collect(),
    };
    window.into_iter().filter(|&i| i < total).collect()
}

/// Fixed-length slot array shared by the boards and the render tick.
pub struct SlotTable {
    total: usize,
    values: RwLock<Vec<SlotValue>>,
    reserved: Mutex<Vec<Range<usize>>>,
}

impl SlotTable {
    pub fn new(total: usize) -> Self {
        SlotTable {
            total,
            values: RwLock::new(vec![SlotValue::Loading; total]),
            reserved: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn bounds(&self, start: usize, len: usize) -> Result<Range<usize>, SlotRangeError> {
        match start.checked_add(len) {
            Some(end) if end <= self.total => Ok(start..end),
            _ => Err(SlotRangeError::OutOfBounds {
                start,
                end: start.saturating_add(len),
                total: self.total,
            }),
        }
    }

    /// Write `values[i]` into slot `start + i`.
    pub fn update(&self, values: Vec<SlotValue>, start: usize) -> Result<(), SlotRangeError> {
        let range = self.bounds(start, values.len())?;
        let mut slots = self.values.write().unwrap_or_else(PoisonError::into_inner);
        for (slot, value) in slots[range].iter_mut().zip(values) {
            *slot = value;
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<SlotValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Copy of every slot, in index order.
    pub fn values(&self) -> Vec<SlotValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Claim `start..start + len` for one writer.
    pub fn reserve(self: &Arc<Self>, start: usize, len: usize) -> Result<SlotWriter, SlotRangeError> {
        let range = self.bounds(start, len)?;
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(other) = reserved
            .iter()
            .find(|other| range.start < other.end && other.start < range.end)
        {
            return Err(SlotRangeError::Overlap {
                start: range.start,
                end: range.end,
                other_start: other.start,
                other_end: other.end,
            });
        }

        reserved.push(range.clone());
        Ok(SlotWriter {
            table: Arc::clone(self),
            range,
        })
    }
}

/// Exclusive writer for one reserved slot range.
pub struct SlotWriter {
    table: Arc<SlotTable>,
    range: Range<usize>,
}

impl SlotWriter {
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Write a board's departures into the range, padding the tail with `Empty`.
    ///
    /// Returns the values written.
    pub fn write_board(&self, entries: Vec<DepartureEntry>) -> Result<Vec<SlotValue>, SlotRangeError> {
        let capacity = self.range.len();
        if entries.len() > capacity {
            return Err(SlotRangeError::Overflow {
                len: entries.len(),
                capacity,
            });
        }

        let values: Vec<SlotValue> = entries
            .into_iter()
            .map(SlotValue::Populated)
            .chain(std::iter::repeat(SlotValue::Empty))
            .take(capacity)
            .collect();
        self.table.update(values.clone(), self.range.start)?;
        Ok(values)
    }
}

/// Settings for one physical display.
#[derive(Clone, Debug)]
pub struct RendererOptions {
    pub prefix: String,
    pub slots: usize,
    pub render_interval: Duration,
}

/// Background tasks of a started renderer.
pub struct RendererHandle {
    render: JoinHandle<Result<(), TransportError>>,
    feedback: JoinHandle<()>,
}

impl RendererHandle {
    /// Resolve when the render tick stops, which only happens on a publish failure.
    pub async fn wait(&mut self) -> Result<(), TransportError> {
        match (&mut self.render).await {
            Ok(result) => result,
            Err(e) => Err(TransportError::Task(e.to_string())),
        }
    }
}

/// Pages the slot array onto one clock.
pub struct PagingRenderer<T> {
    transport: Arc<T>,
    topics: Topics,
    slots: Arc<SlotTable>,
    active_page: Mutex<Option<usize>>,
    crawl: AtomicUsize,
    render_interval: Duration,
}

impl<T: Transport> PagingRenderer<T> {
    pub fn new(transport: Arc<T>, options: RendererOptions) -> Self {
        PagingRenderer {
            transport,
            topics: Topics::new(options.prefix),
            slots: Arc::new(SlotTable::new(options.slots)),
            active_page: Mutex::new(None),
            crawl: AtomicUsize::new(0),
            render_interval: options.render_interval,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Claim a disjoint slot range for one board.
    pub fn reserve(&self, start: usize, len: usize) -> Result<SlotWriter, SlotRangeError> {
        self.slots.reserve(start, len)
    }

    /// Write `values` starting at `start`. Fails without writing if the range
    /// runs past the end of the display.
    pub fn update_slots(&self, values: Vec<SlotValue>, start: usize) -> Result<(), SlotRangeError> {
        self.slots.update(values, start)
    }

    /// Takes effect on the next tick.
    pub fn set_active_page(&self, page: Option<usize>) {
        *self.active_page.lock().unwrap_or_else(PoisonError::into_inner) = page;
    }

    pub fn active_page(&self) -> Option<usize> {
        *self.active_page.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the crawl pixel and build the payloads for the visible slots.
    pub fn render_frame(&self) -> Vec<AppPayload> {
        let previous = self
            .crawl
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |pos| {
                Some((pos + 1) % CRAWL_PERIOD)
            })
            .unwrap_or_default();
        let crawl = (previous + 1) % CRAWL_PERIOD;

        let values = self.slots.values.read().unwrap_or_else(PoisonError::into_inner);
        visible_slots(self.active_page(), self.slots.len())
            .into_iter()
            .map(|index| AppPayload::for_slot(index, &values[index], crawl))
            .collect()
    }

    async fn render(&self) -> Result<(), TransportError> {
        for payload in self.render_frame() {
            let index = match &payload {
                AppPayload::Text { pos, .. } | AppPayload::Draw { pos, .. } => *pos,
            };
            self.transport
                .publish(&self.topics.slot(index), payload.to_json()?, Delivery::AtMostOnce)
                .await?;
        }
        Ok(())
    }

    async fn run_ticks(self: Arc<Self>) -> Result<(), TransportError> {
        let mut ticker = tokio::time::interval(self.render_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            // First tick completes immediately
            ticker.tick().await;
            self.render().await?;
        }
    }

    async fn follow_feedback(self: Arc<Self>, mut inbox: Inbox) {
        while let Some(message) = inbox.recv().await {
            let current_app = String::from_utf8_lossy(&message);
            let page = parse_active_page(&current_app);
            log::debug!("clock shows {current_app:?}, active page {page:?}");
            self.set_active_page(page);
        }
    }

    /// Subscribe to feedback, show a loading placeholder on every slot, start
    /// the render tick and bring the first slot to the front.
    pub async fn start(self: &Arc<Self>) -> Result<RendererHandle, TransportError> {
        let inbox = self.transport.subscribe(&self.topics.current_app()).await?;

        for index in 0..self.slots.len() {
            self.transport
                .publish(
                    &self.topics.slot(index),
                    AppPayload::startup_loading(index).to_json()?,
                    Delivery::ExactlyOnce,
                )
                .await?;
        }

        let feedback = tokio::spawn(Arc::clone(self).follow_feedback(inbox));
        let render = tokio::spawn(Arc::clone(self).run_ticks());

        let switch = SwitchPayload {
            name: format!("{APP_PREFIX}0"),
        };
        let switched = match serde_json::to_vec(&switch) {
            Ok(body) => {
                self.transport
                    .publish(&self.topics.switch(), body, Delivery::AtMostOnce)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = switched {
            feedback.abort();
            render.abort();
            return Err(e);
        }

        log::info!(
            "rendering {} slots every {:?}",
            self.slots.len(),
            self.render_interval
        );
        Ok(RendererHandle { render, feedback })
    }

    /// Stop listening for feedback, cancel the tick and clear the clock.
    ///
    /// The tick task is awaited until it has actually exited before the clear
    /// goes out, so a publish already in flight on another worker cannot land
    /// after it.
    pub async fn stop(&self, mut handle: RendererHandle) -> Result<(), TransportError> {
        let unsubscribed = self.transport.unsubscribe(&self.topics.current_app()).await;
        handle.feedback.abort();
        handle.render.abort();
        // A handle already drained by `wait` must not be polled again
        if !handle.render.is_finished() {
            // Cancellation surfaces as a JoinError
            let _ = (&mut handle.render).await;
        }

        self.clear().await?;
        unsubscribed
    }

    /// Remove every slot app from the clock.
    pub async fn clear(&self) -> Result<(), TransportError> {
        self.transport
            .publish(&self.topics.clear(), Vec::new(), Delivery::AtMostOnce)
            .await
    }
}
