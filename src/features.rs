use crate::{book::BookStore, types::Side};

/*
    Feature extraction: pure functions of the current book plus a bounded
    ring of mid-price samples, one sample per event step. Values are in
    ticks; nothing here mutates the book.
*/

#[derive(Debug, Clone, Default)]
pub struct Features {
    pub best_bid: Option<(u64, u64)>,
    pub best_ask: Option<(u64, u64)>,
    // Mid and microprice in ticks; None while either side is empty.
    pub mid: Option<f64>,
    pub microprice: Option<f64>,
    pub imbalance_1: f64,
    pub imbalance_2: f64,
    pub imbalance_5: f64,
    pub volatility: f64,
}

#[derive(Debug)]
pub struct FeatureExtractor {
    window: usize,
    samples: Vec<f64>,
    pos: usize,
}

impl FeatureExtractor {
    pub fn new(window: usize) -> Self {
        FeatureExtractor {
            window: window.max(2),
            samples: Vec::new(),
            pos: 0,
        }
    }

    pub fn on_step(&mut self, book: &BookStore) -> Features {
        let best_bid = book.best_bid();
        let best_ask = book.best_ask();

        let mid = match (best_bid, best_ask) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) as f64 / 2.0),
            _ => None,
        };
        if let Some(mid) = mid {
            self.push(mid);
        }

        let microprice = match (best_bid, best_ask) {
            (Some((bid_px, bid_sz)), Some((ask_px, ask_sz))) => {
                let total = (bid_sz + ask_sz) as f64;
                if total > 0.0 {
                    Some((bid_px as f64 * ask_sz as f64 + ask_px as f64 * bid_sz as f64) / total)
                } else {
                    mid
                }
            }
            _ => None,
        };

        let bids = book.depth(Side::Buy, 5);
        let asks = book.depth(Side::Sell, 5);

        Features {
            best_bid,
            best_ask,
            mid,
            microprice,
            imbalance_1: imbalance(&bids, &asks, 1),
            imbalance_2: imbalance(&bids, &asks, 2),
            imbalance_5: imbalance(&bids, &asks, 5),
            volatility: self.volatility(),
        }
    }

    // Fixed-capacity ring: oldest samples are overwritten.
    fn push(&mut self, sample: f64) {
        if self.samples.len() < self.window {
            self.samples.push(sample);
        } else {
            self.samples[self.pos] = sample;
        }
        self.pos = (self.pos + 1) % self.window;
    }

    // Sample standard deviation of the ring; 0 below 2 samples.
    fn volatility(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.samples.iter().sum::<f64>() / n as f64;
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f64>()
            / (n - 1) as f64;
        variance.sqrt()
    }
}

fn imbalance(bids: &[(u64, u64)], asks: &[(u64, u64)], n: usize) -> f64 {
    let bid_sum: u64 = bids.iter().take(n).map(|(_, size)| size).sum();
    let ask_sum: u64 = asks.iter().take(n).map(|(_, size)| size).sum();
    let total = bid_sum + ask_sum;
    if total == 0 {
        return 0.0;
    }
    (bid_sum as f64 - ask_sum as f64) / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Order, Origin};

    fn book_with(levels: &[(Side, u64, u64)]) -> BookStore {
        let mut book = BookStore::new();
        for (i, (side, price, size)) in levels.iter().enumerate() {
            book.insert_resting(Order::new(
                format!("o{i}"),
                *side,
                *price,
                *size,
                Origin::Exchange,
                0,
            ))
            .unwrap();
        }
        book
    }

    #[test]
    fn test_microprice_weights_toward_thin_side() {
        let book = book_with(&[(Side::Buy, 100, 30), (Side::Sell, 102, 10)]);
        let mut fx = FeatureExtractor::new(10);
        let features = fx.on_step(&book);

        // (100*10 + 102*30) / 40 = 101.5
        assert_eq!(features.microprice, Some(101.5));
        assert_eq!(features.mid, Some(101.0));
    }

    #[test]
    fn test_microprice_undefined_on_empty_side() {
        let book = book_with(&[(Side::Buy, 100, 5)]);
        let mut fx = FeatureExtractor::new(10);
        let features = fx.on_step(&book);

        assert_eq!(features.microprice, None);
        assert_eq!(features.mid, None);
        assert_eq!(features.best_ask, None);
    }

    #[test]
    fn test_imbalance_over_top_levels() {
        let book = book_with(&[
            (Side::Buy, 100, 6),
            (Side::Buy, 99, 4),
            (Side::Sell, 101, 2),
            (Side::Sell, 102, 8),
        ]);
        let mut fx = FeatureExtractor::new(10);
        let features = fx.on_step(&book);

        assert_eq!(features.imbalance_1, (6.0 - 2.0) / 8.0);
        assert_eq!(features.imbalance_2, (10.0 - 10.0) / 20.0);
        assert_eq!(features.imbalance_5, 0.0); // same as top-2 here
    }

    #[test]
    fn test_imbalance_zero_on_empty_book() {
        let book = BookStore::new();
        let mut fx = FeatureExtractor::new(10);
        let features = fx.on_step(&book);

        assert_eq!(features.imbalance_1, 0.0);
        assert_eq!(features.volatility, 0.0);
    }

    #[test]
    fn test_volatility_over_ring_window() {
        let mut fx = FeatureExtractor::new(3);

        // one sample per step; needs two before volatility is defined
        let book = book_with(&[(Side::Buy, 99, 1), (Side::Sell, 101, 1)]);
        assert_eq!(fx.on_step(&book).volatility, 0.0);

        let book = book_with(&[(Side::Buy, 101, 1), (Side::Sell, 103, 1)]);
        fx.on_step(&book);

        let book = book_with(&[(Side::Buy, 103, 1), (Side::Sell, 105, 1)]);
        let features = fx.on_step(&book);
        // mids 100, 102, 104 -> sample stddev 2
        assert!((features.volatility - 2.0).abs() < 1e-12);

        // ring capacity 3: the oldest mid falls out
        let book = book_with(&[(Side::Buy, 105, 1), (Side::Sell, 107, 1)]);
        let features = fx.on_step(&book);
        // mids 102, 104, 106 -> still 2
        assert!((features.volatility - 2.0).abs() < 1e-12);
    }
}
