//! # Snapshot Polling
//!
//! One producer, many boards: a single timer fetches a snapshot for the union
//! of every board's stops and broadcasts it, so the API is hit once per tick
//! no matter how many boards are listening.
//!
//! Each tick's fetch runs as its own task. A slow fetch does not hold back the
//! next tick, and snapshots are broadcast in the order fetches complete, so an
//! old response that arrives late can overwrite fresher data on the display.
//!
//! The first failed fetch ends the poller with that error. Dropping the
//! sender closes the channel, which ends every board.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::ovapi::{DepartureSource, FeedError, Snapshot};

/// Snapshots buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 4;

/// Periodic fetcher fanning snapshots out to every subscribed board.
pub struct PollingSource<S> {
    source: Arc<S>,
    stop_codes: Vec<String>,
    interval: Duration,
    sender: broadcast::Sender<Arc<Snapshot>>,
}

impl<S: DepartureSource> PollingSource<S> {
    pub fn new(source: Arc<S>, stop_codes: Vec<String>, interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        PollingSource {
            source,
            stop_codes,
            interval,
            sender,
        }
    }

    /// New receiver for one board. Subscribe before [`PollingSource::spawn`]
    /// to see the first snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.sender.subscribe()
    }

    /// Start polling. The first tick fires immediately.
    pub fn spawn(self) -> JoinHandle<Result<(), FeedError>> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> Result<(), FeedError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let source = Arc::clone(&self.source);
                    let stop_codes = self.stop_codes.clone();
                    in_flight.spawn(async move { source.fetch(&stop_codes).await });
                }
                Some(joined) = in_flight.join_next() => {
                    let snapshot = joined.map_err(|e| FeedError::Task(e.to_string()))??;
                    log::debug!("snapshot with {} stops", snapshot.len());
                    if self.sender.send(Arc::new(snapshot)).is_err() {
                        log::warn!("snapshot dropped, no boards subscribed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ovapi::StopDepartures;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast::error::RecvError;

    /// Returns one stop per call until `fail_after` calls, then fails.
    struct CountingSource {
        calls: AtomicUsize,
        fail_after: usize,
    }

    impl DepartureSource for CountingSource {
        async fn fetch(&self, stop_codes: &[String]) -> Result<Snapshot, FeedError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_after {
                return Err(FeedError::InvalidUrl("offline".to_string()));
            }
            Ok(stop_codes
                .iter()
                .map(|code| (code.clone(), StopDepartures::default()))
                .collect())
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_same_fetch() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail_after: usize::MAX,
        });
        let poller = PollingSource::new(
            Arc::clone(&source),
            vec!["A".to_string(), "B".to_string()],
            Duration::from_secs(3600),
        );
        let mut first = poller.subscribe();
        let mut second = poller.subscribe();
        let handle = poller.spawn();

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn fetch_failure_ends_the_feed_for_everyone() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail_after: 0,
        });
        let poller = PollingSource::new(source, vec!["A".to_string()], Duration::from_millis(10));
        let mut board = poller.subscribe();

        let result = poller.spawn().await.unwrap();
        assert!(matches!(result, Err(FeedError::InvalidUrl(_))));
        assert!(matches!(board.recv().await, Err(RecvError::Closed)));
    }
}
