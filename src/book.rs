use std::collections::{BTreeMap, HashMap};

use slab::Slab;

use crate::{
    error::Error,
    types::{Either, Order, Origin, Side},
};

/*
    Book store: two sorted sides of price levels, each level an intrusive
    doubly-linked FIFO queue threaded through a slab. The slab key is the
    stable handle the oid index points at, so cancel is O(1) after the
    map lookup and never leaves a stale index entry behind.
*/

#[derive(Debug, Clone)]
pub struct Slot {
    pub order: Order,
    next: Option<usize>,
    prev: Option<usize>,
}

impl Slot {
    fn new(order: Order) -> Self {
        Slot {
            order,
            next: None,
            prev: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LevelInfo {
    head: Option<usize>,
    tail: Option<usize>,
    pub total_size: u64,
    pub total_count: usize,
}

impl LevelInfo {
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub price: u64,
    pub total_size: u64,
    pub total_count: usize,
}

#[derive(Debug, Clone)]
pub struct TopNLevels {
    pub n: usize,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

#[derive(Debug, Default)]
pub struct BookStore {
    slab: Slab<Slot>,
    map: HashMap<String, usize>, // oid -> slab key
    bids: BTreeMap<u64, LevelInfo>,
    asks: BTreeMap<u64, LevelInfo>,
    next_seq: u64,
}

impl BookStore {
    pub fn new() -> Self {
        BookStore::default()
    }

    // Rests an order at the back of its level. The caller (the matching
    // engine) has already established that the order does not cross.
    pub fn insert_resting(&mut self, mut order: Order) -> Result<(), Error> {
        if order.oid.is_empty() {
            return Err(Error::InvalidOrder("empty order id".to_string()));
        }
        if order.price == 0 {
            return Err(Error::InvalidOrder(format!(
                "non-positive price for order {}",
                order.oid
            )));
        }
        if order.size == 0 {
            return Err(Error::InvalidOrder(format!(
                "non-positive size for order {}",
                order.oid
            )));
        }
        if self.map.contains_key(&order.oid) {
            return Err(Error::InvalidOrder(format!(
                "duplicate order id {}",
                order.oid
            )));
        }

        self.next_seq += 1;
        order.seq = self.next_seq;

        let oid = order.oid.clone();
        let key = self.slab.insert(Slot::new(order));
        self.map.insert(oid, key);

        let slot = &mut self.slab[key];
        let book = match slot.order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let level = book.entry(slot.order.price).or_default();

        match level.tail {
            Some(tail) => {
                level.total_count += 1;
                level.total_size += slot.order.size;

                slot.prev = Some(tail);
                self.slab[tail].next = Some(key);
                level.tail = Some(key);
            }
            None => {
                level.head = Some(key);
                level.tail = Some(key);
                level.total_count = 1;
                level.total_size = slot.order.size;
            }
        }

        Ok(())
    }

    // Idempotent: a second cancel of the same id returns false.
    pub fn cancel(&mut self, oid: &str) -> bool {
        let Some(key) = self.map.get(oid).copied() else {
            return false;
        };
        // map and slab are updated together, so the key is live
        self.unlink_key(key).is_ok()
    }

    // Detaches a slot from its level queue, purges the oid index, and
    // drops the level if it became empty. The only removal path.
    pub(crate) fn unlink_key(&mut self, key: usize) -> Result<Order, Error> {
        let slot = self
            .slab
            .try_remove(key)
            .ok_or_else(|| Error::EngineFault(format!("dangling slab key {key}")))?;

        if let Some(prev) = slot.prev {
            self.slab[prev].next = slot.next;
        }
        if let Some(next) = slot.next {
            self.slab[next].prev = slot.prev;
        }

        self.map.remove(&slot.order.oid);

        let book = match slot.order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let level = book.get_mut(&slot.order.price).ok_or_else(|| {
            Error::EngineFault(format!("missing level for order {}", slot.order.oid))
        })?;

        if level.head == Some(key) {
            level.head = slot.next;
        }
        if level.tail == Some(key) {
            level.tail = slot.prev;
        }
        level.total_count -= 1;
        level.total_size -= slot.order.size;

        if level.is_empty() {
            book.remove(&slot.order.price);
        }

        Ok(slot.order)
    }

    // Shrinks a resident order in place, keeping the level totals in sync.
    pub(crate) fn reduce_key(&mut self, key: usize, by: u64) -> Result<(), Error> {
        let slot = self
            .slab
            .get_mut(key)
            .ok_or_else(|| Error::EngineFault(format!("dangling slab key {key}")))?;
        if by == 0 || by > slot.order.size {
            return Err(Error::EngineFault(format!(
                "reduce of {by} exceeds size {} for order {}",
                slot.order.size, slot.order.oid
            )));
        }
        slot.order.size -= by;

        let (side, price) = (slot.order.side, slot.order.price);
        let book = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let level = book
            .get_mut(&price)
            .ok_or_else(|| Error::EngineFault(format!("missing level at {price}")))?;
        level.total_size -= by;

        Ok(())
    }

    pub fn find(&self, oid: &str) -> Option<&Order> {
        self.map
            .get(oid)
            .and_then(|key| self.slab.get(*key))
            .map(|slot| &slot.order)
    }

    pub fn contains(&self, oid: &str) -> bool {
        self.map.contains_key(oid)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn best_bid(&self) -> Option<(u64, u64)> {
        self.bids
            .last_key_value()
            .map(|(price, level)| (*price, level.total_size))
    }

    pub fn best_ask(&self) -> Option<(u64, u64)> {
        self.asks
            .first_key_value()
            .map(|(price, level)| (*price, level.total_size))
    }

    pub(crate) fn best_price(&self, side: Side) -> Option<u64> {
        match side {
            Side::Buy => self.bids.last_key_value().map(|(price, _)| *price),
            Side::Sell => self.asks.first_key_value().map(|(price, _)| *price),
        }
    }

    // Top-n levels, best price first.
    pub fn depth(&self, side: Side, n: usize) -> Vec<(u64, u64)> {
        let iter = match side {
            Side::Sell => Either::Ascending(self.asks.iter()),
            Side::Buy => Either::Descending(self.bids.iter().rev()),
        };
        iter.take(n)
            .map(|(price, level)| (*price, level.total_size))
            .collect()
    }

    pub fn depth_len(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.bids.len(),
            Side::Sell => self.asks.len(),
        }
    }

    pub(crate) fn level_front(&self, side: Side, price: u64) -> Option<usize> {
        let book = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        book.get(&price).and_then(|level| level.head)
    }

    // Slab keys of a level front to back, in arrival order.
    pub(crate) fn level_keys(&self, side: Side, price: u64) -> Vec<usize> {
        let mut keys = Vec::new();
        let mut curr = self.level_front(side, price);
        while let Some(key) = curr {
            keys.push(key);
            curr = self.slab.get(key).and_then(|slot| slot.next);
        }
        keys
    }

    pub(crate) fn order_at(&self, key: usize) -> Option<&Order> {
        self.slab.get(key).map(|slot| &slot.order)
    }

    pub fn aggregate_at(&self, side: Side, price: u64) -> u64 {
        let book = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        book.get(&price).map(|level| level.total_size).unwrap_or(0)
    }

    // Aggregated venue liquidity at a level, i.e. the level total minus
    // any of our own quotes resting there.
    pub fn exchange_size_at(&self, side: Side, price: u64) -> u64 {
        self.level_keys(side, price)
            .iter()
            .filter_map(|key| self.order_at(*key))
            .filter(|order| order.origin == Origin::Exchange)
            .map(|order| order.size)
            .sum()
    }

    pub fn snapshot(&self, n: usize) -> TopNLevels {
        let (bids, asks) = rayon::join(
            || self.snapshot_side(Side::Buy, n),
            || self.snapshot_side(Side::Sell, n),
        );

        TopNLevels { n, bids, asks }
    }

    fn snapshot_side(&self, side: Side, n: usize) -> Vec<Level> {
        let iter = match side {
            Side::Sell => Either::Ascending(self.asks.iter()),
            Side::Buy => Either::Descending(self.bids.iter().rev()),
        };
        iter.take(n)
            .map(|(price, level)| Level {
                price: *price,
                total_size: level.total_size,
                total_count: level.total_count,
            })
            .collect()
    }

    // Order-insensitive digest of resident orders, for replay comparison.
    pub fn checksum(&self) -> u64 {
        self.slab.iter().fold(0u64, |acc, (_, slot)| {
            acc.wrapping_add(slot.order.price)
                .wrapping_add(slot.order.size)
                .wrapping_add(slot.order.seq)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(oid: &str, side: Side, price: u64, size: u64) -> Order {
        Order::new(oid, side, price, size, Origin::Exchange, 0)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut book = BookStore::new();
        book.insert_resting(order("a", Side::Buy, 100, 15)).unwrap();
        book.insert_resting(order("b", Side::Sell, 101, 5)).unwrap();
        book.insert_resting(order("c", Side::Buy, 98, 15)).unwrap();

        assert!(book.contains("a"));
        assert_eq!(book.depth_len(Side::Buy), 2); // 100 and 98
        assert_eq!(book.depth_len(Side::Sell), 1); // 101
        assert_eq!(book.best_bid(), Some((100, 15)));
        assert_eq!(book.best_ask(), Some((101, 5)));
        assert_eq!(book.find("c").unwrap().size, 15);
    }

    #[test]
    fn test_insert_rejects_malformed() {
        let mut book = BookStore::new();
        assert!(matches!(
            book.insert_resting(order("", Side::Buy, 100, 1)),
            Err(Error::InvalidOrder(_))
        ));
        assert!(matches!(
            book.insert_resting(order("x", Side::Buy, 0, 1)),
            Err(Error::InvalidOrder(_))
        ));
        assert!(matches!(
            book.insert_resting(order("x", Side::Buy, 100, 0)),
            Err(Error::InvalidOrder(_))
        ));

        book.insert_resting(order("x", Side::Buy, 100, 1)).unwrap();
        assert!(matches!(
            book.insert_resting(order("x", Side::Buy, 99, 1)),
            Err(Error::InvalidOrder(_))
        ));
        // failed inserts leave no trace
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut book = BookStore::new();
        book.insert_resting(order("x", Side::Buy, 99, 2)).unwrap();

        assert!(book.cancel("x"));
        assert!(!book.cancel("x"));
        assert!(book.is_empty());
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.depth_len(Side::Buy), 0); // level removed with last order
    }

    #[test]
    fn test_insert_cancel_restores_state() {
        let mut book = BookStore::new();
        book.insert_resting(order("a", Side::Sell, 101, 5)).unwrap();
        let before = book.checksum();

        book.insert_resting(order("b", Side::Sell, 102, 3)).unwrap();
        assert!(book.cancel("b"));

        assert_eq!(book.checksum(), before);
        assert_eq!(book.depth(Side::Sell, 10), vec![(101, 5)]);
    }

    #[test]
    fn test_fifo_seq_within_level() {
        let mut book = BookStore::new();
        book.insert_resting(order("a", Side::Sell, 100, 5)).unwrap();
        book.insert_resting(order("b", Side::Sell, 100, 5)).unwrap();
        book.insert_resting(order("c", Side::Sell, 100, 5)).unwrap();

        let keys = book.level_keys(Side::Sell, 100);
        let seqs: Vec<u64> = keys
            .iter()
            .map(|key| book.order_at(*key).unwrap().seq)
            .collect();
        assert_eq!(seqs.len(), 3);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(book.order_at(keys[0]).unwrap().oid, "a");
        assert_eq!(book.aggregate_at(Side::Sell, 100), 15);
    }

    #[test]
    fn test_cancel_middle_of_level() {
        let mut book = BookStore::new();
        book.insert_resting(order("a", Side::Sell, 100, 5)).unwrap();
        book.insert_resting(order("b", Side::Sell, 100, 7)).unwrap();
        book.insert_resting(order("c", Side::Sell, 100, 9)).unwrap();

        assert!(book.cancel("b"));

        let keys = book.level_keys(Side::Sell, 100);
        let oids: Vec<&str> = keys
            .iter()
            .map(|key| book.order_at(*key).unwrap().oid.as_str())
            .collect();
        assert_eq!(oids, vec!["a", "c"]);
        assert_eq!(book.aggregate_at(Side::Sell, 100), 14);
    }

    #[test]
    fn test_exchange_size_excludes_maker() {
        let mut book = BookStore::new();
        book.insert_resting(order("x1", Side::Buy, 100, 5)).unwrap();
        book.insert_resting(Order::new("m1", Side::Buy, 100, 2, Origin::Maker, 0))
            .unwrap();
        book.insert_resting(order("x2", Side::Buy, 100, 3)).unwrap();

        assert_eq!(book.aggregate_at(Side::Buy, 100), 10);
        assert_eq!(book.exchange_size_at(Side::Buy, 100), 8);
    }

    #[test]
    fn test_depth_and_snapshot_ordering() {
        let mut book = BookStore::new();
        book.insert_resting(order("a", Side::Buy, 100, 15)).unwrap();
        book.insert_resting(order("b", Side::Buy, 98, 15)).unwrap();
        book.insert_resting(order("c", Side::Buy, 100, 20)).unwrap();
        book.insert_resting(order("d", Side::Sell, 101, 5)).unwrap();
        book.insert_resting(order("e", Side::Sell, 102, 10)).unwrap();

        assert_eq!(book.depth(Side::Buy, 3), vec![(100, 35), (98, 15)]);
        assert_eq!(book.depth(Side::Sell, 1), vec![(101, 5)]);

        let snapshot = book.snapshot(3);
        assert_eq!(snapshot.bids[0].price, 100);
        assert_eq!(snapshot.bids[0].total_size, 35);
        assert_eq!(snapshot.bids[0].total_count, 2);
        assert_eq!(snapshot.asks[0].price, 101);
        assert_eq!(snapshot.asks[1].price, 102);
    }
}
