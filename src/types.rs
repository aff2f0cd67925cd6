use serde::{Deserialize, Serialize};

/*
    Core data types shared by the book, engine, simulator and live loop.

    Prices are u64 ticks and sizes u64 base units everywhere inside the
    crate. Decimal conversion only happens at the file boundary.
*/

// One tick / one size unit = 1e-8 of the quote / base asset.
pub const PRICE_SCALE: f64 = 1e8;
pub const SIZE_SCALE: f64 = 1e8;

pub fn price_to_ticks(price: f64) -> u64 {
    (price * PRICE_SCALE).round() as u64
}

pub fn ticks_to_price(ticks: u64) -> f64 {
    ticks as f64 / PRICE_SCALE
}

pub fn size_to_units(size: f64) -> u64 {
    (size * SIZE_SCALE).round() as u64
}

pub fn units_to_size(units: u64) -> f64 {
    units as f64 / SIZE_SCALE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

// Exchange orders stand in for aggregated venue liquidity at a level;
// Maker orders are the strategy's own quotes. The simulator reconciles
// depth deltas against Exchange orders only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Exchange,
    Maker,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub oid: String,
    pub side: Side,
    pub price: u64,
    pub size: u64,
    // Assigned by the book store at insertion, never reused. Defines
    // intra-level time priority; not a wall clock.
    pub seq: u64,
    pub origin: Origin,
    pub ts: u64,
    // Immediate-or-cancel: any unmatched remainder is discarded.
    pub ioc: bool,
}

impl Order {
    pub fn new(
        oid: impl Into<String>,
        side: Side,
        price: u64,
        size: u64,
        origin: Origin,
        ts: u64,
    ) -> Self {
        Order {
            oid: oid.into(),
            side,
            price,
            size,
            seq: 0,
            origin,
            ts,
            ioc: false,
        }
    }

    pub fn ioc(mut self) -> Self {
        self.ioc = true;
        self
    }

    pub fn fill(&mut self, other: &mut Order) -> u64 {
        let fill_size = self.size.min(other.size);
        self.size -= fill_size;
        other.size -= fill_size;
        fill_size
    }
}

// Emitted when matching reduces a maker. Price is always the maker's
// resting price, timestamp the taker's logical time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub taker_oid: String,
    pub maker_oid: String,
    pub price: u64,
    pub size: u64,
    pub ts: u64,
    pub taker_origin: Origin,
    pub maker_origin: Origin,
}

// Book events consumed by the simulator, in non-decreasing ts order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // The venue reports the aggregated resting size at (side, price).
    Depth {
        side: Side,
        price: u64,
        aggregate: u64,
        ts: u64,
    },
    // A taker of `side` consumed resting liquidity.
    Trade {
        side: Side,
        price: u64,
        size: u64,
        ts: u64,
    },
    // Pure clock advance.
    Tick { ts: u64 },
}

impl Event {
    pub fn ts(&self) -> u64 {
        match self {
            Event::Depth { ts, .. } | Event::Trade { ts, .. } | Event::Tick { ts } => *ts,
        }
    }
}

// An open quote the strategy currently has resting in the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub oid: String,
    pub side: Side,
    pub price: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteIntent {
    pub side: Side,
    pub price: u64,
    pub size: u64,
}

// What a strategy wants done in one step. Cancels always run before
// inserts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteAction {
    pub cancels: Vec<String>,
    pub inserts: Vec<QuoteIntent>,
}

impl QuoteAction {
    pub fn none() -> Self {
        QuoteAction::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cancels.is_empty() && self.inserts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackPressureStrategy {
    Block,
    Drop,
}

#[derive(Debug, Clone)]
pub enum Command<T> {
    Operation(T),
    Shutdown,
}

impl<T> From<T> for Command<T> {
    fn from(op: T) -> Self {
        Command::Operation(op)
    }
}

// Iterate a side in best-price-first order regardless of which way the
// underlying map sorts.
pub enum Either<A, B> {
    Ascending(A),
    Descending(B),
}

impl<A, B, T> Iterator for Either<A, B>
where
    A: Iterator<Item = T>,
    B: Iterator<Item = T>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self {
            Either::Ascending(iter) => iter.next(),
            Either::Descending(iter) => iter.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_reduces_both_sides() {
        let mut taker = Order::new("t", Side::Buy, 100, 7, Origin::Maker, 0);
        let mut maker = Order::new("m", Side::Sell, 100, 5, Origin::Exchange, 0);

        let filled = taker.fill(&mut maker);
        assert_eq!(filled, 5);
        assert_eq!(taker.size, 2);
        assert_eq!(maker.size, 0);
    }

    #[test]
    fn test_tick_round_trip() {
        assert_eq!(price_to_ticks(50_000.123_456_78), 5_000_012_345_678);
        assert_eq!(ticks_to_price(5_000_012_345_678), 50_000.123_456_78);
        assert_eq!(size_to_units(0.001), 100_000);
    }
}
