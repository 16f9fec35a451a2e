//! Local order book replicas for level-2 and level-3 feeds.
//!
//! [`OrderBook`] keeps aggregated price levels. Bids are stored with
//! [`std::cmp::Reverse`] keys so that iteration over the underlying
//! [`BTreeMap`] yields prices in descending order (highest bid first).
//! Asks use natural ordering (lowest ask first).
//!
//! Keys are parsed [`Decimal`]s; values keep the exchange's original
//! [`Level2Point`] so emitted levels carry the exact wire strings.
//!
//! [`Level3Book`] keeps individual resting orders keyed by order id.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use rust_decimal::Decimal;

use cxfeed_core::types::decimal::parse_decimal;
use cxfeed_core::types::{
    Level2Point, Level2Snapshot, Level2Update, Level3Point, Level3Snapshot, Level3Update,
};

/// Errors that can occur during order book operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderBookError {
    /// The book has not received an initial snapshot.
    #[error("book not initialized, apply a snapshot first")]
    NotInitialized,
    /// A level whose price or size is not a decimal number.
    #[error("invalid level: price {price:?}, size {size:?}")]
    InvalidLevel { price: String, size: String },
}

/// A book that can be seeded by a snapshot and advanced by updates.
///
/// Implemented by [`OrderBook`] and [`Level3Book`] so the sequence
/// synchronizer is shared between both granularities.
pub trait SyncedBook: Default {
    type Snapshot;
    type Update: Clone;

    fn apply_snapshot(&mut self, snapshot: &Self::Snapshot) -> Result<(), OrderBookError>;

    fn apply_update(&mut self, update: &Self::Update) -> Result<(), OrderBookError>;
}

/// Parsed price and zero-size flag for one level.
fn parse_level(price: &str, size: &str) -> Result<(Decimal, bool), OrderBookError> {
    let invalid = || OrderBookError::InvalidLevel {
        price: price.to_string(),
        size: size.to_string(),
    };
    let p = parse_decimal(price).ok_or_else(invalid)?;
    let s = parse_decimal(size).ok_or_else(invalid)?;
    Ok((p, s.is_zero()))
}

/// Validate a whole side before any mutation so a bad level leaves the book
/// untouched.
fn parse_side(points: &[Level2Point]) -> Result<Vec<(Decimal, bool)>, OrderBookError> {
    points
        .iter()
        .map(|p| parse_level(&p.price, &p.size))
        .collect()
}

/// L2 order book maintaining price levels for bids and asks.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    /// Bid levels: Reverse(price) -> level. Highest bid comes first in iteration.
    bids: BTreeMap<Reverse<Decimal>, Level2Point>,
    /// Ask levels: price -> level. Lowest ask comes first in iteration.
    asks: BTreeMap<Decimal, Level2Point>,
    /// Whether the book has received its initial snapshot.
    initialized: bool,
}

impl OrderBook {
    /// Create a new, empty, uninitialized order book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the book has received an initial snapshot.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Replace the entire book contents with the given levels.
    ///
    /// Zero-size levels in a snapshot are skipped. Sets the book as
    /// initialized.
    pub fn apply_snapshot_levels(
        &mut self,
        bids: &[Level2Point],
        asks: &[Level2Point],
    ) -> Result<(), OrderBookError> {
        let parsed_bids = parse_side(bids)?;
        let parsed_asks = parse_side(asks)?;

        self.bids.clear();
        self.asks.clear();

        for ((price, zero), point) in parsed_bids.into_iter().zip(bids) {
            if !zero {
                self.bids.insert(Reverse(price), point.clone());
            }
        }
        for ((price, zero), point) in parsed_asks.into_iter().zip(asks) {
            if !zero {
                self.asks.insert(price, point.clone());
            }
        }

        self.initialized = true;
        Ok(())
    }

    /// Apply incremental levels to the book.
    ///
    /// - If size is zero for a price level, that level is removed.
    /// - Otherwise the level is inserted or replaced.
    /// - The book must be initialized (snapshot applied) before deltas.
    pub fn apply_update_levels(
        &mut self,
        bids: &[Level2Point],
        asks: &[Level2Point],
    ) -> Result<(), OrderBookError> {
        if !self.initialized {
            return Err(OrderBookError::NotInitialized);
        }

        let parsed_bids = parse_side(bids)?;
        let parsed_asks = parse_side(asks)?;

        for ((price, zero), point) in parsed_bids.into_iter().zip(bids) {
            if zero {
                self.bids.remove(&Reverse(price));
            } else {
                self.bids.insert(Reverse(price), point.clone());
            }
        }
        for ((price, zero), point) in parsed_asks.into_iter().zip(asks) {
            if zero {
                self.asks.remove(&price);
            } else {
                self.asks.insert(price, point.clone());
            }
        }

        Ok(())
    }

    /// Returns the highest bid level, if any.
    pub fn best_bid(&self) -> Option<&Level2Point> {
        self.bids.values().next()
    }

    /// Returns the lowest ask level, if any.
    pub fn best_ask(&self) -> Option<&Level2Point> {
        self.asks.values().next()
    }

    /// Returns the spread: best_ask - best_bid.
    ///
    /// Returns `None` if either side of the book is empty.
    pub fn spread(&self) -> Option<Decimal> {
        let bid = self.bids.keys().next()?.0;
        let ask = *self.asks.keys().next()?;
        Some(ask - bid)
    }

    /// Returns the mid-price: (best_bid + best_ask) / 2.
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.bids.keys().next()?.0;
        let ask = *self.asks.keys().next()?;
        Some((bid + ask) / Decimal::TWO)
    }

    /// Returns the top N bid levels in descending price order (highest first).
    pub fn bid_depth(&self, levels: usize) -> Vec<Level2Point> {
        self.bids.values().take(levels).cloned().collect()
    }

    /// Returns the top N ask levels in ascending price order (lowest first).
    pub fn ask_depth(&self, levels: usize) -> Vec<Level2Point> {
        self.asks.values().take(levels).cloned().collect()
    }

    /// Returns `true` if the book is crossed (best_bid >= best_ask).
    ///
    /// A crossed book indicates a desynchronized replica.
    pub fn is_crossed(&self) -> bool {
        match (self.bids.keys().next(), self.asks.keys().next()) {
            (Some(Reverse(bid)), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Returns `(bid_level_count, ask_level_count)`.
    pub fn level_count(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Full contents as `(bids, asks)`, best levels first.
    pub fn snapshot(&self) -> (Vec<Level2Point>, Vec<Level2Point>) {
        (
            self.bids.values().cloned().collect(),
            self.asks.values().cloned().collect(),
        )
    }
}

impl SyncedBook for OrderBook {
    type Snapshot = Level2Snapshot;
    type Update = Level2Update;

    fn apply_snapshot(&mut self, snapshot: &Level2Snapshot) -> Result<(), OrderBookError> {
        self.apply_snapshot_levels(&snapshot.bids, &snapshot.asks)
    }

    fn apply_update(&mut self, update: &Level2Update) -> Result<(), OrderBookError> {
        self.apply_update_levels(&update.bids, &update.asks)
    }
}

/// Per-order book for level-3 feeds.
#[derive(Debug, Clone, Default)]
pub struct Level3Book {
    bids: BTreeMap<String, Level3Point>,
    asks: BTreeMap<String, Level3Point>,
    initialized: bool,
}

impl Level3Book {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns `(bid_order_count, ask_order_count)`.
    pub fn order_count(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Look up a resting order on either side.
    pub fn order(&self, order_id: &str) -> Option<&Level3Point> {
        self.bids.get(order_id).or_else(|| self.asks.get(order_id))
    }

    fn validate(points: &[Level3Point]) -> Result<Vec<bool>, OrderBookError> {
        points
            .iter()
            .map(|p| parse_level(&p.price, &p.size).map(|(_, zero)| zero))
            .collect()
    }

    fn upsert(side: &mut BTreeMap<String, Level3Point>, points: &[Level3Point], zeros: Vec<bool>) {
        for (point, zero) in points.iter().zip(zeros) {
            if zero {
                side.remove(&point.order_id);
            } else {
                side.insert(point.order_id.clone(), point.clone());
            }
        }
    }
}

impl SyncedBook for Level3Book {
    type Snapshot = Level3Snapshot;
    type Update = Level3Update;

    fn apply_snapshot(&mut self, snapshot: &Level3Snapshot) -> Result<(), OrderBookError> {
        let bid_zeros = Self::validate(&snapshot.bids)?;
        let ask_zeros = Self::validate(&snapshot.asks)?;
        self.bids.clear();
        self.asks.clear();
        Self::upsert(&mut self.bids, &snapshot.bids, bid_zeros);
        Self::upsert(&mut self.asks, &snapshot.asks, ask_zeros);
        self.initialized = true;
        Ok(())
    }

    fn apply_update(&mut self, update: &Level3Update) -> Result<(), OrderBookError> {
        if !self.initialized {
            return Err(OrderBookError::NotInitialized);
        }
        let bid_zeros = Self::validate(&update.bids)?;
        let ask_zeros = Self::validate(&update.asks)?;
        Self::upsert(&mut self.bids, &update.bids, bid_zeros);
        Self::upsert(&mut self.asks, &update.asks, ask_zeros);
        Ok(())
    }
}
