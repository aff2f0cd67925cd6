use crate::{
    book::BookStore,
    error::Error,
    types::{Fill, Order, Origin, Side},
};

/*
    Matching engine: the single authority that mutates the book. Takers go
    through `submit` and match under price-time priority; exchange depth
    edits go through `rest_exchange`/`shrink_exchange` and bypass matching.
*/

#[derive(Debug, Default)]
pub struct MatchEngine {
    book: BookStore,
}

impl MatchEngine {
    pub fn new() -> Self {
        MatchEngine::default()
    }

    pub fn book(&self) -> &BookStore {
        &self.book
    }

    // Greedy price-time match against the opposite side, then rest the
    // remainder (or drop it for IOC orders). Fills price at the maker's
    // resting price and stamp the taker's logical time.
    //
    // An Err(EngineFault) means the book state is undefined; the caller
    // must abort the run.
    pub fn submit(&mut self, mut order: Order) -> Result<Vec<Fill>, Error> {
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
        if self.book.contains(&order.oid) {
            return Err(Error::InvalidOrder(format!(
                "duplicate order id {}",
                order.oid
            )));
        }

        let mut fills = Vec::new();
        let opposite = order.side.opposite();

        while order.size > 0 {
            let Some(best) = self.book.best_price(opposite) else {
                break;
            };
            let crosses = match order.side {
                Side::Buy => best <= order.price,
                Side::Sell => best >= order.price,
            };
            if !crosses {
                break;
            }

            // walk the level front to back; the level is removed by the
            // last unlink, at which point we re-fetch the next best
            while order.size > 0 {
                let Some(front) = self.book.level_front(opposite, best) else {
                    break;
                };
                let maker = self
                    .book
                    .order_at(front)
                    .ok_or_else(|| {
                        Error::EngineFault(format!("level head {front} not in slab"))
                    })?
                    .clone();

                if maker.size == 0 {
                    // cannot occur while resident; drop it and keep going
                    self.book.unlink_key(front)?;
                    continue;
                }

                let match_size = order.size.min(maker.size);
                fills.push(Fill {
                    taker_oid: order.oid.clone(),
                    maker_oid: maker.oid.clone(),
                    price: maker.price,
                    size: match_size,
                    ts: order.ts,
                    taker_origin: order.origin,
                    maker_origin: maker.origin,
                });

                order.size -= match_size;
                if match_size == maker.size {
                    self.book.unlink_key(front)?;
                } else {
                    self.book.reduce_key(front, match_size)?;
                }
            }
        }

        if order.size > 0 && !order.ioc {
            self.book.insert_resting(order)?;
        }

        Ok(fills)
    }

    pub fn cancel(&mut self, oid: &str) -> bool {
        self.book.cancel(oid)
    }

    // Appends synthetic venue liquidity at the back of a level.
    pub fn rest_exchange(
        &mut self,
        oid: String,
        side: Side,
        price: u64,
        size: u64,
        ts: u64,
    ) -> Result<(), Error> {
        self.book
            .insert_resting(Order::new(oid, side, price, size, Origin::Exchange, ts))
    }

    // Absorbs a shrink in venue liquidity at a level, front to back,
    // touching Exchange orders only. Returns the size actually removed,
    // which falls short of `deficit` when the rest of the level is our
    // own quotes.
    pub fn shrink_exchange(
        &mut self,
        side: Side,
        price: u64,
        mut deficit: u64,
    ) -> Result<u64, Error> {
        let keys = self.book.level_keys(side, price);
        let mut removed = 0;

        for key in keys {
            if deficit == 0 {
                break;
            }
            let order = self
                .book
                .order_at(key)
                .ok_or_else(|| Error::EngineFault(format!("dangling level key {key}")))?
                .clone();
            if order.origin != Origin::Exchange {
                continue;
            }

            if order.size <= deficit {
                deficit -= order.size;
                removed += order.size;
                self.book.unlink_key(key)?;
            } else {
                self.book.reduce_key(key, deficit)?;
                removed += deficit;
                deficit = 0;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resting(engine: &mut MatchEngine, oid: &str, side: Side, price: u64, size: u64) {
        engine
            .book
            .insert_resting(Order::new(oid, side, price, size, Origin::Exchange, 0))
            .unwrap();
    }

    fn taker(oid: &str, side: Side, price: u64, size: u64) -> Order {
        Order::new(oid, side, price, size, Origin::Exchange, 7)
    }

    #[test]
    fn test_fifo_at_a_level() {
        let mut engine = MatchEngine::new();
        resting(&mut engine, "a", Side::Sell, 100, 5);
        resting(&mut engine, "b", Side::Sell, 100, 5);

        let fills = engine.submit(taker("t", Side::Buy, 100, 7)).unwrap();

        assert_eq!(fills.len(), 2);
        assert_eq!((fills[0].maker_oid.as_str(), fills[0].price, fills[0].size), ("a", 100, 5));
        assert_eq!((fills[1].maker_oid.as_str(), fills[1].price, fills[1].size), ("b", 100, 2));
        assert_eq!(fills[0].ts, 7); // taker's time

        // book: b@100 size 3 remains
        assert!(!engine.book.contains("a"));
        assert_eq!(engine.book.find("b").unwrap().size, 3);
        assert!(!engine.book.contains("t"));
    }

    #[test]
    fn test_price_improvement_to_taker() {
        let mut engine = MatchEngine::new();
        resting(&mut engine, "a", Side::Sell, 100, 10);

        let fills = engine.submit(taker("t", Side::Buy, 105, 4)).unwrap();

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, 100); // maker's price, not 105
        assert_eq!(fills[0].size, 4);
        assert_eq!(engine.book.find("a").unwrap().size, 6);
    }

    #[test]
    fn test_no_cross_rests() {
        let mut engine = MatchEngine::new();
        resting(&mut engine, "a", Side::Sell, 101, 1);

        let fills = engine.submit(taker("t", Side::Buy, 100, 1)).unwrap();

        assert!(fills.is_empty());
        assert_eq!(engine.book.best_bid(), Some((100, 1)));
        assert_eq!(engine.book.best_ask(), Some((101, 1)));
    }

    #[test]
    fn test_sweep_multiple_levels() {
        let mut engine = MatchEngine::new();
        resting(&mut engine, "a", Side::Buy, 100, 3);
        resting(&mut engine, "b", Side::Buy, 99, 3);
        resting(&mut engine, "c", Side::Buy, 98, 3);

        let fills = engine.submit(taker("t", Side::Sell, 99, 7)).unwrap();

        // sweeps 100 then 99, never 98
        assert_eq!(fills.len(), 2);
        assert_eq!((fills[0].price, fills[0].size), (100, 3));
        assert_eq!((fills[1].price, fills[1].size), (99, 3));
        // remainder rests at 99 rather than crossing into 98
        assert_eq!(engine.book.find("t").unwrap().size, 1);
        assert_eq!(engine.book.best_ask(), Some((99, 1)));
        assert_eq!(engine.book.best_bid(), Some((98, 3)));
    }

    #[test]
    fn test_empty_book_rests_full_order() {
        let mut engine = MatchEngine::new();
        let fills = engine.submit(taker("t", Side::Buy, 100, 5)).unwrap();

        assert!(fills.is_empty());
        assert_eq!(engine.book.best_bid(), Some((100, 5)));
        assert_eq!(engine.book.best_ask(), None);
    }

    #[test]
    fn test_ioc_discards_remainder() {
        let mut engine = MatchEngine::new();
        resting(&mut engine, "a", Side::Sell, 100, 2);

        let fills = engine
            .submit(taker("t", Side::Buy, 100, 5).ioc())
            .unwrap();

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].size, 2);
        assert!(!engine.book.contains("t")); // remainder discarded
        assert!(engine.book.is_empty());
    }

    #[test]
    fn test_exact_consume_removes_level() {
        let mut engine = MatchEngine::new();
        resting(&mut engine, "a", Side::Sell, 100, 4);

        let fills = engine.submit(taker("t", Side::Buy, 100, 4)).unwrap();

        assert_eq!(fills.len(), 1);
        assert_eq!(engine.book.best_ask(), None);
        assert_eq!(engine.book.depth_len(Side::Sell), 0);
        assert!(!engine.book.contains("t")); // fully filled, nothing rests
    }

    #[test]
    fn test_size_conservation() {
        let mut engine = MatchEngine::new();
        resting(&mut engine, "a", Side::Sell, 100, 3);
        resting(&mut engine, "b", Side::Sell, 101, 3);

        let fills = engine.submit(taker("t", Side::Buy, 101, 10)).unwrap();

        let matched: u64 = fills.iter().map(|f| f.size).sum();
        assert_eq!(matched, 6);
        // remainder rests for the difference
        assert_eq!(engine.book.find("t").unwrap().size, 4);
    }

    #[test]
    fn test_same_origin_match_permitted() {
        let mut engine = MatchEngine::new();
        engine
            .book
            .insert_resting(Order::new("m1", Side::Sell, 100, 5, Origin::Maker, 0))
            .unwrap();

        let fills = engine
            .submit(Order::new("m2", Side::Buy, 100, 5, Origin::Maker, 1))
            .unwrap();

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].taker_origin, Origin::Maker);
        assert_eq!(fills[0].maker_origin, Origin::Maker);
    }

    #[test]
    fn test_submit_rejects_malformed() {
        let mut engine = MatchEngine::new();
        resting(&mut engine, "a", Side::Sell, 100, 5);

        assert!(matches!(
            engine.submit(taker("", Side::Buy, 100, 1)),
            Err(Error::InvalidOrder(_))
        ));
        assert!(matches!(
            engine.submit(taker("a", Side::Buy, 100, 1)),
            Err(Error::InvalidOrder(_))
        ));
        // book untouched by rejected submits
        assert_eq!(engine.book.find("a").unwrap().size, 5);
    }

    #[test]
    fn test_shrink_exchange_skips_maker() {
        let mut engine = MatchEngine::new();
        resting(&mut engine, "x1", Side::Buy, 100, 2);
        engine
            .book
            .insert_resting(Order::new("m1", Side::Buy, 100, 4, Origin::Maker, 0))
            .unwrap();
        resting(&mut engine, "x2", Side::Buy, 100, 3);

        // shrink 4: removes all of x1 and 2 of x2, never touches m1
        let removed = engine.shrink_exchange(Side::Buy, 100, 4).unwrap();
        assert_eq!(removed, 4);
        assert!(!engine.book.contains("x1"));
        assert_eq!(engine.book.find("m1").unwrap().size, 4);
        assert_eq!(engine.book.find("x2").unwrap().size, 1);

        // deficit larger than remaining exchange size stops at the makers
        let removed = engine.shrink_exchange(Side::Buy, 100, 10).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(engine.book.aggregate_at(Side::Buy, 100), 4);
    }
}
