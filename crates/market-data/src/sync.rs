//! Snapshot/update synchronization for per-market order books.
//!
//! Exchanges that stream book deltas need a snapshot to seed the local
//! replica, and many of them number their deltas so that lost messages can
//! be detected. [`BookSynchronizer`] implements that protocol once for every
//! adapter:
//!
//! ```text
//! AwaitingSnapshot { buffered } --snapshot--> Synced { book, last_seq }
//!          ^                                        |
//!          +-------------- sequence gap ------------+
//! ```
//!
//! Updates received before the snapshot are buffered and replayed once it
//! arrives. How sequence numbers are validated is an exchange property,
//! expressed as a [`SequencePolicy`].

use std::collections::{HashMap, VecDeque};

use crate::orderbook::{OrderBook, OrderBookError, SyncedBook};

/// Maximum number of updates buffered per market while awaiting a snapshot.
pub const MAX_BUFFERED_UPDATES: usize = 1024;

/// How an exchange's update sequence numbers are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePolicy {
    /// The exchange provides no usable ordering; every update is applied.
    Unsequenced,
    /// Each update must carry exactly `previous + step`.
    Contiguous { step: u64 },
    /// Each update must be strictly greater than the previous one.
    Monotonic,
}

/// Result of offering an update to the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Applied to the book; the caller may emit it.
    Applied,
    /// Held until the market's snapshot arrives.
    Buffered,
    /// Already covered by the current snapshot; dropped.
    Stale,
    /// Sequence discontinuity. The market's book and buffer were discarded;
    /// the caller must request a fresh snapshot.
    Gap { expected: u64, received: u64 },
}

enum MarketState<B: SyncedBook> {
    AwaitingSnapshot {
        buffered: VecDeque<(Option<u64>, B::Update)>,
    },
    Synced {
        book: B,
        last_seq: Option<u64>,
    },
}

impl<B: SyncedBook> MarketState<B> {
    fn awaiting() -> Self {
        MarketState::AwaitingSnapshot {
            buffered: VecDeque::new(),
        }
    }
}

/// Per-market book state machine, keyed by exchange symbol.
pub struct BookSynchronizer<B: SyncedBook = OrderBook> {
    policy: SequencePolicy,
    markets: HashMap<String, MarketState<B>>,
}

impl<B: SyncedBook> BookSynchronizer<B> {
    pub fn new(policy: SequencePolicy) -> Self {
        Self {
            policy,
            markets: HashMap::new(),
        }
    }

    pub fn policy(&self) -> SequencePolicy {
        self.policy
    }

    /// Seed `market_id` from a snapshot.
    ///
    /// Replaces any previous book, resets the last sequence to `seq`, and
    /// replays buffered updates that are newer than the snapshot. The
    /// replayed updates are returned in order for emission. On an invalid
    /// snapshot the market is left awaiting a snapshot.
    pub fn on_snapshot(
        &mut self,
        market_id: &str,
        snapshot: &B::Snapshot,
        seq: Option<u64>,
    ) -> Result<Vec<B::Update>, OrderBookError> {
        let previous = self
            .markets
            .insert(market_id.to_string(), MarketState::awaiting());

        let mut book = B::default();
        book.apply_snapshot(snapshot)?;

        let buffered = match previous {
            Some(MarketState::AwaitingSnapshot { buffered }) => buffered,
            _ => VecDeque::new(),
        };

        let mut last_seq = seq;
        let mut replayed = Vec::new();

        if self.policy == SequencePolicy::Unsequenced {
            // Without ordering there is no way to tell which buffered updates
            // the snapshot already covers.
            if !buffered.is_empty() {
                tracing::debug!(
                    market = market_id,
                    dropped = buffered.len(),
                    "discarding unsequenced updates buffered before snapshot"
                );
            }
        } else {
            for (update_seq, update) in buffered {
                match check_sequence(self.policy, last_seq, update_seq) {
                    Check::Apply => {
                        book.apply_update(&update)?;
                        if update_seq.is_some() {
                            last_seq = update_seq;
                        }
                        replayed.push(update);
                    }
                    Check::Stale => {}
                    Check::Gap { expected, received } => {
                        // The next live update will report the gap.
                        tracing::debug!(
                            market = market_id,
                            expected,
                            received,
                            "buffered updates do not continue the snapshot"
                        );
                        break;
                    }
                }
            }
        }

        self.markets
            .insert(market_id.to_string(), MarketState::Synced { book, last_seq });
        Ok(replayed)
    }

    /// Offer an update for `market_id` carrying sequence `seq`.
    pub fn on_update(
        &mut self,
        market_id: &str,
        update: &B::Update,
        seq: Option<u64>,
    ) -> Result<SyncOutcome, OrderBookError> {
        let policy = self.policy;
        let state = self
            .markets
            .entry(market_id.to_string())
            .or_insert_with(MarketState::awaiting);

        match state {
            MarketState::AwaitingSnapshot { buffered } => {
                if buffered.len() >= MAX_BUFFERED_UPDATES {
                    buffered.pop_front();
                    tracing::warn!(
                        market = market_id,
                        capacity = MAX_BUFFERED_UPDATES,
                        "update buffer full while awaiting snapshot, dropping oldest"
                    );
                }
                buffered.push_back((seq, update.clone()));
                Ok(SyncOutcome::Buffered)
            }
            MarketState::Synced { book, last_seq } => match check_sequence(policy, *last_seq, seq) {
                Check::Apply => {
                    book.apply_update(update)?;
                    if seq.is_some() {
                        *last_seq = seq;
                    }
                    Ok(SyncOutcome::Applied)
                }
                Check::Stale => Ok(SyncOutcome::Stale),
                Check::Gap { expected, received } => {
                    tracing::warn!(
                        market = market_id,
                        expected_seq = expected,
                        received_seq = received,
                        "sequence gap detected, awaiting fresh snapshot"
                    );
                    *state = MarketState::awaiting();
                    Ok(SyncOutcome::Gap { expected, received })
                }
            },
        }
    }

    /// Returns `true` once `market_id` has an applied snapshot.
    pub fn is_synced(&self, market_id: &str) -> bool {
        matches!(self.markets.get(market_id), Some(MarketState::Synced { .. }))
    }

    /// The current replica for `market_id`, if synced.
    pub fn book(&self, market_id: &str) -> Option<&B> {
        match self.markets.get(market_id)? {
            MarketState::Synced { book, .. } => Some(book),
            MarketState::AwaitingSnapshot { .. } => None,
        }
    }

    /// Last applied sequence for `market_id`, if synced and sequenced.
    pub fn last_sequence(&self, market_id: &str) -> Option<u64> {
        match self.markets.get(market_id)? {
            MarketState::Synced { last_seq, .. } => *last_seq,
            MarketState::AwaitingSnapshot { .. } => None,
        }
    }

    /// Number of updates currently buffered for `market_id`.
    pub fn buffered_len(&self, market_id: &str) -> usize {
        match self.markets.get(market_id) {
            Some(MarketState::AwaitingSnapshot { buffered }) => buffered.len(),
            _ => 0,
        }
    }

    /// Forget `market_id` entirely.
    pub fn reset(&mut self, market_id: &str) {
        self.markets.remove(market_id);
    }

    /// Forget every market. Called on reconnect.
    pub fn clear(&mut self) {
        self.markets.clear();
    }
}

enum Check {
    Apply,
    Stale,
    Gap { expected: u64, received: u64 },
}

fn check_sequence(policy: SequencePolicy, last: Option<u64>, seq: Option<u64>) -> Check {
    let (last, seq) = match (last, seq) {
        (Some(last), Some(seq)) => (last, seq),
        // Nothing to compare against.
        _ => return Check::Apply,
    };
    match policy {
        SequencePolicy::Unsequenced => Check::Apply,
        SequencePolicy::Monotonic => {
            if seq <= last {
                Check::Stale
            } else {
                Check::Apply
            }
        }
        SequencePolicy::Contiguous { step } => {
            let expected = last.saturating_add(step);
            if seq <= last {
                Check::Stale
            } else if seq == expected {
                Check::Apply
            } else {
                Check::Gap {
                    expected,
                    received: seq,
                }
            }
        }
    }
}
