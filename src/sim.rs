use crate::{
    book::{BookStore, TopNLevels},
    engine::MatchEngine,
    error::Error,
    features::FeatureExtractor,
    strategy::Strategy,
    types::{Event, Fill, Order, Origin, Quote, QuoteAction, Side, PRICE_SCALE, SIZE_SCALE},
};

/*
    Replay simulator: drives the engine, features and a strategy over a
    timestamped event stream. Strictly single-threaded; given the same
    stream, strategy and parameters it produces identical fill logs and
    final book state.

    Per step: clock -> event application -> features -> strategy ->
    cancels -> inserts -> fill recording.
*/

pub struct Simulator {
    engine: MatchEngine,
    features: FeatureExtractor,
    strategy: Box<dyn Strategy>,
    clock: u64,
    inventory: i64, // size units, signed
    cash: i128,     // price ticks * size units
    fills: Vec<Fill>,
    open_quotes: Vec<Quote>,
    events_processed: u64,
    synth_seq: u64,
    taker_seq: u64,
    quote_seq: u64,
}

#[derive(Debug, Clone)]
pub struct SimReport {
    pub events: u64,
    pub fill_count: usize,
    pub maker_fill_count: usize,
    pub total_pnl: f64,      // quote units, marked to mid
    pub final_position: f64, // base units
    pub avg_fill_size: f64,  // base units, over maker fills
    pub book_checksum: u64,
    pub top_levels: TopNLevels,
}

impl Simulator {
    pub fn new(strategy: Box<dyn Strategy>, vol_window: usize) -> Self {
        Simulator {
            engine: MatchEngine::new(),
            features: FeatureExtractor::new(vol_window),
            strategy,
            clock: 0,
            inventory: 0,
            cash: 0,
            fills: Vec::new(),
            open_quotes: Vec::new(),
            events_processed: 0,
            synth_seq: 0,
            taker_seq: 0,
            quote_seq: 0,
        }
    }

    pub fn book(&self) -> &BookStore {
        self.engine.book()
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn inventory(&self) -> i64 {
        self.inventory
    }

    pub fn open_quotes(&self) -> &[Quote] {
        &self.open_quotes
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    // One full step. Returns the action the strategy took so a live host
    // can mirror it out to a gateway.
    pub fn step(&mut self, event: Event) -> Result<QuoteAction, Error> {
        let ts = event.ts();
        if ts < self.clock {
            return Err(Error::Protocol(format!(
                "out of order event: {ts} < {}",
                self.clock
            )));
        }
        self.clock = ts;

        match event {
            Event::Depth {
                side,
                price,
                aggregate,
                ..
            } => self.apply_depth(side, price, aggregate)?,
            Event::Trade {
                side, price, size, ..
            } => self.apply_trade(side, price, size)?,
            Event::Tick { .. } => {}
        }
        self.events_processed += 1;

        let features = self.features.on_step(self.engine.book());
        let action = self
            .strategy
            .on_step(&features, self.inventory, &self.open_quotes, self.clock);
        self.apply_action(&action)?;

        Ok(action)
    }

    pub fn run(
        &mut self,
        feed: impl IntoIterator<Item = Result<Event, Error>>,
    ) -> Result<SimReport, Error> {
        for event in feed {
            self.step(event?)?;
        }
        Ok(self.report())
    }

    // Reconcile the venue's reported aggregate at (side, price) against
    // the Exchange-origin liquidity we hold there. Maker orders keep
    // their queue position untouched.
    fn apply_depth(&mut self, side: Side, price: u64, aggregate: u64) -> Result<(), Error> {
        if price == 0 {
            return Err(Error::Protocol("zero price in depth event".to_string()));
        }

        let current = self.engine.book().exchange_size_at(side, price);
        if aggregate > current {
            self.resolve_cross(side, price)?;
            self.synth_seq += 1;
            self.engine.rest_exchange(
                format!("x{}", self.synth_seq),
                side,
                price,
                aggregate - current,
                self.clock,
            )?;
        } else if aggregate < current {
            self.engine.shrink_exchange(side, price, current - aggregate)?;
        }
        Ok(())
    }

    // L2 feeds occasionally report transiently crossed levels. Trust the
    // newest update: clear stale exchange liquidity it crosses on the
    // opposite side before resting the new size.
    fn resolve_cross(&mut self, side: Side, price: u64) -> Result<(), Error> {
        let opposite = side.opposite();
        loop {
            let Some(best) = self.engine.book().best_price(opposite) else {
                break;
            };
            let crossed = match side {
                Side::Buy => best <= price,
                Side::Sell => best >= price,
            };
            if !crossed {
                break;
            }
            let stale = self.engine.book().exchange_size_at(opposite, best);
            if stale == 0 {
                // only our own quotes left at the crossed level
                break;
            }
            self.engine.shrink_exchange(opposite, best, stale)?;
        }
        Ok(())
    }

    // A trade event is aggressor flow: submit it as an IOC taker so any
    // remainder beyond our book's liquidity evaporates instead of
    // resting phantom size.
    fn apply_trade(&mut self, side: Side, price: u64, size: u64) -> Result<(), Error> {
        if price == 0 || size == 0 {
            return Err(Error::Protocol(
                "zero price or size in trade event".to_string(),
            ));
        }
        self.taker_seq += 1;
        let order = Order::new(
            format!("t{}", self.taker_seq),
            side,
            price,
            size,
            Origin::Exchange,
            self.clock,
        )
        .ioc();
        let fills = self.engine.submit(order)?;
        self.record_fills(side, &fills);
        Ok(())
    }

    fn apply_action(&mut self, action: &QuoteAction) -> Result<(), Error> {
        // cancels run before inserts within a step
        for oid in &action.cancels {
            self.engine.cancel(oid);
            self.open_quotes.retain(|q| q.oid != *oid);
        }

        for intent in &action.inserts {
            self.quote_seq += 1;
            let oid = format!("m{}", self.quote_seq);
            let order = Order::new(
                oid.clone(),
                intent.side,
                intent.price,
                intent.size,
                Origin::Maker,
                self.clock,
            );
            let fills = self.engine.submit(order)?;
            self.record_fills(intent.side, &fills);

            let filled: u64 = fills
                .iter()
                .filter(|f| f.taker_oid == oid)
                .map(|f| f.size)
                .sum();
            if filled < intent.size {
                self.open_quotes.push(Quote {
                    oid,
                    side: intent.side,
                    price: intent.price,
                    size: intent.size - filled,
                });
            }
        }
        Ok(())
    }

    // Appends to the fill log in matching order and books our own legs
    // into inventory and cash.
    fn record_fills(&mut self, taker_side: Side, fills: &[Fill]) {
        for fill in fills {
            if fill.taker_origin == Origin::Maker {
                self.book_position(taker_side, fill);
            }
            if fill.maker_origin == Origin::Maker {
                self.book_position(taker_side.opposite(), fill);
                self.shrink_open_quote(&fill.maker_oid, fill.size);
            }
        }
        self.fills.extend_from_slice(fills);
    }

    fn book_position(&mut self, our_side: Side, fill: &Fill) {
        let notional = fill.price as i128 * fill.size as i128;
        match our_side {
            Side::Buy => {
                self.inventory += fill.size as i64;
                self.cash -= notional;
            }
            Side::Sell => {
                self.inventory -= fill.size as i64;
                self.cash += notional;
            }
        }
    }

    fn shrink_open_quote(&mut self, oid: &str, by: u64) {
        if let Some(quote) = self.open_quotes.iter_mut().find(|q| q.oid == oid) {
            quote.size = quote.size.saturating_sub(by);
        }
        self.open_quotes.retain(|q| q.size > 0);
    }

    // Mark price for the residual position: mid when both sides exist,
    // else whatever single side is left, else zero.
    fn mark_price(&self) -> f64 {
        let book = self.engine.book();
        match (book.best_bid(), book.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => (bid + ask) as f64 / 2.0,
            (Some((bid, _)), None) => bid as f64,
            (None, Some((ask, _))) => ask as f64,
            (None, None) => 0.0,
        }
    }

    pub fn report(&self) -> SimReport {
        let maker_fills: Vec<&Fill> = self
            .fills
            .iter()
            .filter(|f| f.taker_origin == Origin::Maker || f.maker_origin == Origin::Maker)
            .collect();
        let maker_volume: u64 = maker_fills.iter().map(|f| f.size).sum();

        let equity_ticks = self.cash as f64 + self.inventory as f64 * self.mark_price();

        SimReport {
            events: self.events_processed,
            fill_count: self.fills.len(),
            maker_fill_count: maker_fills.len(),
            total_pnl: equity_ticks / (PRICE_SCALE * SIZE_SCALE),
            final_position: self.inventory as f64 / SIZE_SCALE,
            avg_fill_size: if maker_fills.is_empty() {
                0.0
            } else {
                maker_volume as f64 / maker_fills.len() as f64 / SIZE_SCALE
            },
            book_checksum: self.engine.book().checksum(),
            top_levels: self.engine.book().snapshot(5),
        }
    }
}
