use crate::{
    features::Features,
    types::{Quote, QuoteAction, QuoteIntent, Side},
};

/*
    Quoting strategies. A strategy is a capability: given features,
    inventory and its open quotes it returns the cancels and inserts it
    wants this step. It never sees the book itself.
*/

pub trait Strategy: Send {
    fn on_step(
        &mut self,
        features: &Features,
        inventory: i64,
        open_quotes: &[Quote],
        clock: u64,
    ) -> QuoteAction;
}

// Fixed spread around mid, requoted from scratch every step.
#[derive(Debug, Clone)]
pub struct NaiveMaker {
    pub spread: u64, // ticks
    pub size: u64,
}

impl NaiveMaker {
    pub fn new(spread: u64, size: u64) -> Self {
        NaiveMaker { spread, size }
    }
}

impl Strategy for NaiveMaker {
    fn on_step(
        &mut self,
        features: &Features,
        _inventory: i64,
        open_quotes: &[Quote],
        _clock: u64,
    ) -> QuoteAction {
        // no mid, nothing to quote around: pass and keep what's resting
        let Some(mid) = features.mid else {
            return QuoteAction::none();
        };

        let mut action = QuoteAction {
            cancels: open_quotes.iter().map(|q| q.oid.clone()).collect(),
            inserts: Vec::new(),
        };

        let half = self.spread as f64 / 2.0;
        let bid = (mid - half).floor() as u64;
        let mut ask = (mid + half).ceil() as u64;
        if bid == 0 {
            return action;
        }
        if ask <= bid {
            ask = bid + 1;
        }

        action.inserts.push(QuoteIntent {
            side: Side::Buy,
            price: bid,
            size: self.size,
        });
        action.inserts.push(QuoteIntent {
            side: Side::Sell,
            price: ask,
            size: self.size,
        });
        action
    }
}

// Fill probability by distance from mid, in ticks. Index d is the
// probability of a quote d ticks away filling; lookups past the end
// clamp to the last entry.
#[derive(Debug, Clone)]
pub struct FillProbTable {
    probs: Vec<f64>,
}

impl FillProbTable {
    pub fn new(probs: Vec<f64>) -> Self {
        let probs = if probs.is_empty() { vec![0.0] } else { probs };
        FillProbTable { probs }
    }

    pub fn from_decay(levels: usize, decay: f64) -> Self {
        FillProbTable::new((0..levels.max(1)).map(|d| (-(d as f64) * decay).exp()).collect())
    }

    pub fn prob(&self, distance: u64) -> f64 {
        let idx = (distance as usize).min(self.probs.len() - 1);
        self.probs[idx]
    }
}

// How quote size scales as inventory approaches the maximum position:
// linear tapering, or a sigmoid for a sharper transition around neutral.
#[derive(Debug, Clone, Copy)]
pub enum SizeScaling {
    Linear,
    Sigmoid { steepness: f64 },
}

// Inventory-aware sizing: neutral inventory quotes the base size on both
// sides; a long position shrinks the bid and grows the ask, symmetric
// when short, dropping the shrinking side entirely at the max position.
#[derive(Debug, Clone)]
pub struct SizeFn {
    pub base_size: u64,
    pub max_position: u64, // size units, normalizes inventory to [-1, 1]
    pub scaling: SizeScaling,
}

impl SizeFn {
    pub fn linear(base_size: u64, max_position: u64) -> Self {
        SizeFn {
            base_size,
            max_position: max_position.max(1),
            scaling: SizeScaling::Linear,
        }
    }

    pub fn sigmoid(base_size: u64, max_position: u64, steepness: f64) -> Self {
        SizeFn {
            base_size,
            max_position: max_position.max(1),
            scaling: SizeScaling::Sigmoid { steepness },
        }
    }

    pub fn normalized(&self, inventory: i64) -> f64 {
        (inventory as f64 / self.max_position as f64).clamp(-1.0, 1.0)
    }

    // (bid_size, ask_size) for the current inventory.
    pub fn sizes(&self, inventory: i64) -> (u64, u64) {
        let norm = self.normalized(inventory);
        let scaled = match self.scaling {
            SizeScaling::Linear => norm,
            // at the extremes the sigmoid pins to the linear value so the
            // shedding side still zeroes out
            SizeScaling::Sigmoid { .. } if norm.abs() >= 1.0 => norm,
            SizeScaling::Sigmoid { steepness } => 2.0 / (1.0 + (-norm * steepness).exp()) - 1.0,
        };
        let bid = (self.base_size as f64 * (1.0 - scaled)).round() as u64;
        let ask = (self.base_size as f64 * (1.0 + scaled)).round() as u64;
        (bid, ask)
    }
}

// Expected-value maker: picks the half-spread maximizing
// p(d) * d - |inventory| * k, then shifts both quotes toward reducing
// the inventory and sizes them through the supplied size function.
#[derive(Debug, Clone)]
pub struct EvMaker {
    pub max_half_spread: u64, // ticks
    pub skew_k: f64,          // ticks of centre shift at full inventory
    pub size_fn: SizeFn,
    pub table: FillProbTable,
}

impl EvMaker {
    pub fn new(max_half_spread: u64, skew_k: f64, size_fn: SizeFn, table: FillProbTable) -> Self {
        EvMaker {
            max_half_spread: max_half_spread.max(1),
            skew_k,
            size_fn,
            table,
        }
    }

    fn best_distance(&self, penalty: f64) -> u64 {
        let mut best_d = 1;
        let mut best_ev = f64::NEG_INFINITY;
        for d in 1..=self.max_half_spread {
            let ev = self.table.prob(d) * d as f64 - penalty;
            if ev > best_ev {
                best_ev = ev;
                best_d = d;
            }
        }
        best_d
    }
}

impl Strategy for EvMaker {
    fn on_step(
        &mut self,
        features: &Features,
        inventory: i64,
        open_quotes: &[Quote],
        _clock: u64,
    ) -> QuoteAction {
        let Some(mid) = features.mid else {
            return QuoteAction::none();
        };

        let mut action = QuoteAction {
            cancels: open_quotes.iter().map(|q| q.oid.clone()).collect(),
            inserts: Vec::new(),
        };

        let inv_norm = self.size_fn.normalized(inventory);
        let distance = self.best_distance(inv_norm.abs() * self.skew_k);

        // long: centre shifts down, bid pulled back, ask pulled closer;
        // symmetric when short
        let shift = -inv_norm * self.skew_k;
        let bid = (mid + shift - distance as f64).floor();
        let mut ask = (mid + shift + distance as f64).ceil() as u64;
        if bid < 1.0 {
            return action;
        }
        let bid = bid as u64;
        if ask <= bid {
            ask = bid + 1;
        }

        let (bid_size, ask_size) = self.size_fn.sizes(inventory);

        if bid_size > 0 {
            action.inserts.push(QuoteIntent {
                side: Side::Buy,
                price: bid,
                size: bid_size,
            });
        }
        if ask_size > 0 {
            action.inserts.push(QuoteIntent {
                side: Side::Sell,
                price: ask,
                size: ask_size,
            });
        }
        action
    }
}
