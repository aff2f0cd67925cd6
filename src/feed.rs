use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Lines, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    types::{
        price_to_ticks, size_to_units, ticks_to_price, units_to_size, Event, Fill, Origin, Side,
    },
};

/*
    Event sources and boundary formats. Records cross the file boundary as
    JSON lines with decimal strings; everything inside the crate is ticks.
*/

#[derive(Debug, Deserialize)]
struct RawRecord {
    ts: u64,
    kind: String,
    side: Option<String>,
    price: Option<String>,
    size: Option<String>,
    aggregate: Option<String>,
}

impl RawRecord {
    fn into_event(self) -> Result<Event, Error> {
        match self.kind.as_str() {
            "depth" => Ok(Event::Depth {
                side: parse_side(self.side.as_deref())?,
                price: parse_price(self.price.as_deref())?,
                aggregate: parse_size(self.aggregate.as_deref())?,
                ts: self.ts,
            }),
            "trade" => Ok(Event::Trade {
                side: parse_side(self.side.as_deref())?,
                price: parse_price(self.price.as_deref())?,
                size: parse_size(self.size.as_deref())?,
                ts: self.ts,
            }),
            "tick" => Ok(Event::Tick { ts: self.ts }),
            other => Err(Error::Protocol(format!("unknown event kind: {other}"))),
        }
    }
}

fn parse_side(side: Option<&str>) -> Result<Side, Error> {
    match side {
        Some("buy") => Ok(Side::Buy),
        Some("sell") => Ok(Side::Sell),
        other => Err(Error::Protocol(format!("bad side: {other:?}"))),
    }
}

fn parse_decimal(field: &str, value: Option<&str>) -> Result<f64, Error> {
    let value = value.ok_or_else(|| Error::Protocol(format!("missing {field}")))?;
    value
        .parse::<f64>()
        .map_err(|_| Error::Protocol(format!("bad {field}: {value}")))
}

fn parse_price(value: Option<&str>) -> Result<u64, Error> {
    Ok(price_to_ticks(parse_decimal("price", value)?))
}

fn parse_size(value: Option<&str>) -> Result<u64, Error> {
    Ok(size_to_units(parse_decimal("size", value)?))
}

// One-file-per-day JSONL reader. Blank lines are tolerated, anything
// else malformed is a protocol error.
pub struct JsonlFeed {
    lines: Lines<BufReader<File>>,
}

impl JsonlFeed {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        Ok(JsonlFeed {
            lines: BufReader::new(file).lines(),
        })
    }

    pub fn day_path(dir: &Path, symbol: &str, date: &str) -> PathBuf {
        let compact: String = date.chars().filter(|c| *c != '-').collect();
        dir.join(format!("{symbol}_{compact}.jsonl"))
    }
}

impl Iterator for JsonlFeed {
    type Item = Result<Event, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            let record: RawRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(err) => return Some(Err(Error::Protocol(format!("bad record: {err}")))),
            };
            return Some(record.into_event());
        }
    }
}

#[derive(Debug, Serialize)]
struct FillRecord<'a> {
    ts: u64,
    taker_id: &'a str,
    maker_id: &'a str,
    price: String,
    size: String,
    taker_origin: Origin,
    maker_origin: Origin,
}

pub fn write_fills(path: &Path, fills: &[Fill]) -> Result<(), Error> {
    let mut out = BufWriter::new(File::create(path)?);
    for fill in fills {
        let record = FillRecord {
            ts: fill.ts,
            taker_id: &fill.taker_oid,
            maker_id: &fill.maker_oid,
            price: format!("{:.8}", ticks_to_price(fill.price)),
            size: format!("{:.8}", units_to_size(fill.size)),
            taker_origin: fill.taker_origin,
            maker_origin: fill.maker_origin,
        };
        let line = serde_json::to_string(&record)
            .map_err(|err| Error::Protocol(format!("encode fill: {err}")))?;
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

/*
    Seeded pseudo-random event generation for tests and demo backtests.
*/

pub struct Lcg {
    pub seed: u64,
}

impl Lcg {
    pub fn next_rand(&mut self) -> u64 {
        // Linear Congruential Generator parameters
        const A: u64 = 6364136223846793005;
        const C: u64 = 1;
        const M: u64 = 1 << 48; // 2^48

        self.seed = (A.wrapping_mul(self.seed).wrapping_add(C)) % M;
        self.seed
    }

    pub fn next_rand_in_range(&mut self, min: u64, max: u64) -> u64 {
        let range = max - min;
        min + (self.next_rand() % range)
    }
}

impl std::iter::Iterator for Lcg {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_rand())
    }
}

// An endless seeded stream of depth, trade and tick events around a
// slowly drifting mid. Timestamps are strictly increasing.
pub struct EventGen {
    lcg: Lcg,
    mid: u64,
    step: u64,
}

impl EventGen {
    pub fn new(seed: u64) -> Self {
        EventGen {
            lcg: Lcg { seed },
            mid: 10_000,
            step: 0,
        }
    }
}

impl Iterator for EventGen {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.step += 1;
        let ts = self.step * 1_000;
        let roll = self.lcg.next_rand_in_range(0, 10);

        let event = match roll {
            // mostly depth so the book stays populated
            0..=6 => {
                let offset = self.lcg.next_rand_in_range(1, 6);
                let (side, price) = if self.lcg.next_rand() % 2 == 0 {
                    (Side::Buy, self.mid.saturating_sub(offset).max(1))
                } else {
                    (Side::Sell, self.mid + offset)
                };
                let aggregate = self.lcg.next_rand_in_range(0, 50);
                Event::Depth {
                    side,
                    price,
                    aggregate,
                    ts,
                }
            }
            7 | 8 => {
                let offset = self.lcg.next_rand_in_range(1, 4);
                let (side, price) = if self.lcg.next_rand() % 2 == 0 {
                    // buy taker sweeps asks up to mid + offset
                    (Side::Buy, self.mid + offset)
                } else {
                    // sell taker sweeps bids down to mid - offset
                    (Side::Sell, self.mid.saturating_sub(offset).max(1))
                };
                let size = self.lcg.next_rand_in_range(1, 20);
                Event::Trade {
                    side,
                    price,
                    size,
                    ts,
                }
            }
            _ => Event::Tick { ts },
        };

        // occasional one-tick drift in the mid
        if self.lcg.next_rand() % 16 == 0 {
            if self.lcg.next_rand() % 2 == 0 {
                self.mid += 1;
            } else {
                self.mid = self.mid.saturating_sub(1).max(1_000);
            }
        }

        Some(event)
    }
}

pub fn generate_events(seed: u64, count: usize) -> Vec<Event> {
    EventGen::new(seed).take(count).collect()
}
