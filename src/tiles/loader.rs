//! Asynchronous tile loader
//!
//! Fetches run as tasks on a tokio runtime. A task never touches the cache:
//! it pushes its outcome onto a channel, and the next `sync` on the update
//! thread drains that channel. Every fetch carries a ticket with a cancel
//! flag; an outcome is applied only if its ticket is still the live one for
//! its key and the flag is unset.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{trace, warn};

use super::cache::TileCache;
use super::cell_key::CellKey;
use super::decode::{DecodedTile, TileDecoder};
use super::source::{TileTransport, UrlTemplate};
use super::{TileError, TileState};

#[derive(Debug, Clone)]
pub struct TileLoaderOptions {
    pub template: UrlTemplate,
    pub cache_limit: usize,
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    pub requested: u64,
    pub loaded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Outcomes that arrived after their fetch was cancelled or superseded.
    pub dropped_results: u64,
    pub evicted: u64,
}

struct FetchTicket {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

struct FetchOutcome {
    key: CellKey,
    ticket: u64,
    cancelled: Arc<AtomicBool>,
    result: Result<DecodedTile, TileError>,
}

pub struct TileLoader {
    transport: Arc<dyn TileTransport>,
    decoder: Arc<dyn TileDecoder>,
    template: UrlTemplate,
    runtime: Handle,
    fetch_timeout: Duration,
    max_concurrent: usize,
    cache: TileCache,
    in_flight: HashMap<CellKey, FetchTicket>,
    queue: VecDeque<CellKey>,
    queued: HashSet<CellKey>,
    failed: HashMap<CellKey, TileError>,
    generation: Option<u64>,
    next_ticket: u64,
    sender: UnboundedSender<FetchOutcome>,
    receiver: UnboundedReceiver<FetchOutcome>,
    stats: LoaderStats,
}

impl TileLoader {
    pub fn new(
        options: TileLoaderOptions,
        transport: Arc<dyn TileTransport>,
        decoder: Arc<dyn TileDecoder>,
        runtime: Handle,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            transport,
            decoder,
            template: options.template,
            runtime,
            fetch_timeout: options.fetch_timeout,
            max_concurrent: options.max_concurrent_fetches.max(1),
            cache: TileCache::new(options.cache_limit),
            in_flight: HashMap::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            failed: HashMap::new(),
            generation: None,
            next_ticket: 0,
            sender,
            receiver,
            stats: LoaderStats::default(),
        }
    }

    /// Bring the loader in line with `needed`: apply finished fetches, cancel
    /// what is no longer needed, request what is missing and evict.
    ///
    /// `generation` identifies the needed-set computation; failed keys are
    /// retried only when it changes.
    pub fn sync(&mut self, needed: &BTreeSet<CellKey>, generation: u64, tick: u64) {
        self.drain(tick);

        if self.generation != Some(generation) {
            self.generation = Some(generation);
            self.failed.clear();
        } else {
            self.failed.retain(|key, _| needed.contains(key));
        }

        let stale: Vec<CellKey> = self
            .in_flight
            .keys()
            .chain(self.queue.iter())
            .filter(|key| !needed.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            self.cancel(&key);
        }

        for key in needed {
            self.request(key);
        }
        self.pump();

        self.cache.touch(needed, tick);
        self.stats.evicted += self.cache.evict(needed, tick).len() as u64;
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn failure(&self, key: &CellKey) -> Option<&TileError> {
        self.failed.get(key)
    }

    pub fn is_in_flight(&self, key: &CellKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn state(&self, key: &CellKey) -> TileState {
        if self.cache.contains(key) {
            TileState::Loaded
        } else if self.in_flight.contains_key(key) {
            TileState::Loading
        } else if self.queued.contains(key) {
            TileState::Queued
        } else if self.failed.contains_key(key) {
            TileState::Failed
        } else {
            TileState::Empty
        }
    }

    fn request(&mut self, key: &CellKey) {
        if self.cache.contains(key)
            || self.in_flight.contains_key(key)
            || self.queued.contains(key)
            || self.failed.contains_key(key)
        {
            return;
        }
        trace!(cell = %key, "tile requested");
        self.queued.insert(key.clone());
        self.queue.push_back(key.clone());
    }

    /// Cancelling is silent: the flag is raised and whatever the task
    /// eventually sends is dropped on arrival.
    fn cancel(&mut self, key: &CellKey) {
        if let Some(ticket) = self.in_flight.remove(key) {
            ticket.cancelled.store(true, Ordering::Release);
            self.stats.cancelled += 1;
            trace!(cell = %key, ticket = ticket.id, "fetch cancelled");
        }
        if self.queued.remove(key) {
            self.queue.retain(|queued| queued != key);
        }
    }

    fn pump(&mut self) {
        while self.in_flight.len() < self.max_concurrent {
            let Some(key) = self.queue.pop_front() else {
                break;
            };
            self.queued.remove(&key);
            self.spawn_fetch(key);
        }
    }

    fn spawn_fetch(&mut self, key: CellKey) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.in_flight.insert(
            key.clone(),
            FetchTicket {
                id: ticket,
                cancelled: cancelled.clone(),
            },
        );
        self.stats.requested += 1;

        let url = self.template.url_for(&key);
        let transport = self.transport.clone();
        let decoder = self.decoder.clone();
        let sender = self.sender.clone();
        let deadline = self.fetch_timeout;
        self.runtime.spawn(async move {
            let fetched = match tokio::time::timeout(deadline, transport.fetch(&url)).await {
                Ok(result) => result,
                Err(_) => Err(TileError::Timeout(deadline)),
            };
            let result = if cancelled.load(Ordering::Acquire) {
                // skip decoding work nobody will use
                Err(TileError::Cancelled)
            } else {
                fetched.and_then(|bytes| decoder.decode(&key, &bytes))
            };
            // the loader may already be gone
            let _ = sender.send(FetchOutcome {
                key,
                ticket,
                cancelled,
                result,
            });
        });
    }

    fn drain(&mut self, tick: u64) {
        while let Ok(outcome) = self.receiver.try_recv() {
            let live = self
                .in_flight
                .get(&outcome.key)
                .is_some_and(|t| t.id == outcome.ticket);
            if !live || outcome.cancelled.load(Ordering::Acquire) {
                self.stats.dropped_results += 1;
                trace!(cell = %outcome.key, ticket = outcome.ticket, "dropping stale fetch result");
                continue;
            }
            self.in_flight.remove(&outcome.key);
            match outcome.result {
                Ok(tile) => {
                    self.stats.loaded += 1;
                    self.cache.insert(outcome.key, Arc::new(tile), tick);
                }
                Err(err) => {
                    self.stats.failed += 1;
                    warn!(cell = %outcome.key, "tile load failed: {err}");
                    self.failed.insert(outcome.key, err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::decode::{encode_png, RasterTileDecoder};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct Immediate {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TileTransport for Immediate {
        async fn fetch(&self, _url: &str) -> Result<Bytes, TileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(encode_png(2, 2, [1, 2, 3, 255])))
        }
    }

    struct Gated {
        gate: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TileTransport for Gated {
        async fn fetch(&self, _url: &str) -> Result<Bytes, TileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(Bytes::from(encode_png(2, 2, [1, 2, 3, 255])))
        }
    }

    struct Failing;

    #[async_trait]
    impl TileTransport for Failing {
        async fn fetch(&self, _url: &str) -> Result<Bytes, TileError> {
            Err(TileError::FetchFailed {
                status: Some(404),
                reason: "Not Found".into(),
            })
        }
    }

    fn options(limit: usize, concurrent: usize) -> TileLoaderOptions {
        TileLoaderOptions {
            template: UrlTemplate::new("mem://{z}/{x}/{y}").unwrap(),
            cache_limit: limit,
            fetch_timeout: Duration::from_secs(5),
            max_concurrent_fetches: concurrent,
        }
    }

    fn loader(transport: Arc<dyn TileTransport>, limit: usize, concurrent: usize) -> TileLoader {
        TileLoader::new(
            options(limit, concurrent),
            transport,
            Arc::new(RasterTileDecoder),
            Handle::current(),
        )
    }

    fn keys(list: &[&str]) -> BTreeSet<CellKey> {
        list.iter().map(|k| CellKey::new(*k).unwrap()).collect()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn completion_is_observed_on_a_later_sync() {
        let transport = Arc::new(Immediate { calls: AtomicUsize::new(0) });
        let mut loader = loader(transport.clone(), 16, 4);
        let needed = keys(&["0", "1"]);

        loader.sync(&needed, 1, 1);
        assert_eq!(loader.in_flight_count(), 2);
        assert!(loader.cache().is_empty());

        settle().await;
        loader.sync(&needed, 1, 2);
        assert_eq!(loader.cache().len(), 2);
        assert_eq!(loader.state(&CellKey::new("0").unwrap()), TileState::Loaded);

        loader.sync(&needed, 1, 3);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn in_flight_key_is_not_refetched() {
        let transport = Arc::new(Gated {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let mut loader = loader(transport.clone(), 16, 4);
        let needed = keys(&["2"]);
        loader.sync(&needed, 1, 1);
        settle().await;
        loader.sync(&needed, 2, 2);
        loader.sync(&needed, 3, 3);
        settle().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.in_flight_count(), 1);

        transport.gate.notify_waiters();
        settle().await;
        loader.sync(&needed, 3, 4);
        assert_eq!(loader.cache().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_fetch_result_is_dropped() {
        let transport = Arc::new(Gated {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let mut loader = loader(transport.clone(), 16, 4);
        loader.sync(&keys(&["3"]), 1, 1);
        settle().await;

        loader.sync(&keys(&["0"]), 2, 2);
        assert_eq!(loader.stats().cancelled, 1);
        settle().await;

        transport.gate.notify_waiters();
        settle().await;
        loader.sync(&keys(&["0"]), 2, 3);
        assert!(!loader.cache().contains(&CellKey::new("3").unwrap()));
        assert_eq!(loader.stats().dropped_results, 1);
        assert_eq!(loader.cache().len(), 1);
    }

    #[tokio::test]
    async fn failure_is_isolated_and_retried_on_new_generation() {
        let mut loader = loader(Arc::new(Failing), 16, 4);
        let needed = keys(&["1"]);
        let key = CellKey::new("1").unwrap();
        loader.sync(&needed, 1, 1);
        settle().await;
        loader.sync(&needed, 1, 2);
        assert_eq!(loader.state(&key), TileState::Failed);
        assert!(matches!(
            loader.failure(&key),
            Some(TileError::FetchFailed { status: Some(404), .. })
        ));

        loader.sync(&needed, 1, 3);
        assert_eq!(loader.stats().requested, 1);

        loader.sync(&needed, 2, 4);
        assert_eq!(loader.state(&key), TileState::Loading);
        assert_eq!(loader.stats().requested, 2);
    }

    #[tokio::test]
    async fn concurrency_cap_queues_the_rest() {
        let transport = Arc::new(Gated {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let mut loader = loader(transport.clone(), 16, 2);
        let needed = keys(&["0", "1", "2", "3"]);
        loader.sync(&needed, 1, 1);
        assert_eq!(loader.in_flight_count(), 2);
        assert_eq!(loader.queued_count(), 2);
        assert_eq!(loader.state(&CellKey::new("3").unwrap()), TileState::Queued);
        settle().await;

        transport.gate.notify_waiters();
        settle().await;
        loader.sync(&needed, 1, 2);
        assert_eq!(loader.cache().len(), 2);
        assert_eq!(loader.in_flight_count(), 2);
        assert_eq!(loader.queued_count(), 0);
    }

    #[tokio::test]
    async fn stalled_fetch_times_out() {
        let transport = Arc::new(Gated {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let mut opts = options(16, 4);
        opts.fetch_timeout = Duration::from_millis(10);
        let decoder = Arc::new(RasterTileDecoder);
        let mut loader = TileLoader::new(opts, transport, decoder, Handle::current());
        let needed = keys(&["0"]);
        loader.sync(&needed, 1, 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        loader.sync(&needed, 1, 2);
        assert!(matches!(
            loader.failure(&CellKey::new("0").unwrap()),
            Some(TileError::Timeout(_))
        ));
    }
}
