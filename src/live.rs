use std::{collections::HashSet, thread::JoinHandle};

use crossbeam_channel::Sender;

use crate::{
    error::Error,
    sim::Simulator,
    types::{BackPressureStrategy, Command, Event, Fill, Quote},
};

/*
    Live loop: the same core step as the replay simulator, running on a
    dedicated thread behind a bounded ingress channel. The async side
    (see the CLI binary) feeds events, requests gateway polls and sends
    the shutdown command; the core itself never suspends.
*/

#[derive(Debug, Clone)]
pub enum LiveMsg {
    Event(Event),
    PollFills,
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub buffer_size: usize,
    pub back_pressure_strategy: BackPressureStrategy,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            buffer_size: 1_024,
            back_pressure_strategy: BackPressureStrategy::Block,
        }
    }
}

// Order egress and fill confirmation, as the venue sees it. Real
// connectivity lives outside this crate; the paper gateway below is the
// in-process stand-in.
pub trait Gateway {
    fn submit(&mut self, quote: &Quote) -> Result<(), Error>;
    fn cancel(&mut self, oid: &str) -> Result<(), Error>;
    fn cancel_all(&mut self) -> Result<(), Error>;
    fn poll_fills(&mut self) -> Vec<Fill>;
}

// Acknowledges everything locally. Fills are already simulated by the
// core, so polling confirms nothing.
#[derive(Debug, Default)]
pub struct PaperGateway {
    open: Vec<Quote>,
    submitted: u64,
    cancelled: u64,
}

impl PaperGateway {
    pub fn new() -> Self {
        PaperGateway::default()
    }

    pub fn open_quotes(&self) -> &[Quote] {
        &self.open
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled
    }
}

impl Gateway for PaperGateway {
    fn submit(&mut self, quote: &Quote) -> Result<(), Error> {
        self.submitted += 1;
        self.open.push(quote.clone());
        Ok(())
    }

    fn cancel(&mut self, oid: &str) -> Result<(), Error> {
        let before = self.open.len();
        self.open.retain(|q| q.oid != oid);
        self.cancelled += (before - self.open.len()) as u64;
        Ok(())
    }

    fn cancel_all(&mut self) -> Result<(), Error> {
        self.cancelled += self.open.len() as u64;
        self.open.clear();
        Ok(())
    }

    fn poll_fills(&mut self) -> Vec<Fill> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct Producer {
    sender: Sender<Command<LiveMsg>>,
    strategy: BackPressureStrategy,
}

impl Producer {
    pub fn send(&self, msg: LiveMsg) -> Result<(), Error> {
        match self.strategy {
            // Block until the message is accepted
            BackPressureStrategy::Block => self.sender.send(Command::Operation(msg))?,
            BackPressureStrategy::Drop => match self.sender.try_send(Command::Operation(msg)) {
                Ok(_) | Err(crossbeam_channel::TrySendError::Full(_)) => {}
                Err(e) => return Err(Error::Send(e.to_string())),
            },
        }
        Ok(())
    }
}

pub struct LiveOutcome<G> {
    pub sim: Simulator,
    pub gateway: G,
    pub fault: Option<Error>,
}

pub struct Controller<G> {
    handle: Option<JoinHandle<LiveOutcome<G>>>,
    sender: Sender<Command<LiveMsg>>,
}

impl<G> Controller<G> {
    pub fn shutdown(&mut self) -> Result<LiveOutcome<G>, Error> {
        if let Some(handle) = self.handle.take() {
            // the thread may already be gone after a fault
            let _ = self.sender.send(Command::Shutdown);
            handle.join().map_err(|_| Error::Join)
        } else {
            Err(Error::AlreadyShutdown)
        }
    }
}

pub fn spawn_live_thread<G>(
    mut sim: Simulator,
    mut gateway: G,
    config: LiveConfig,
) -> (Producer, Controller<G>)
where
    G: Gateway + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(config.buffer_size);
    let producer = Producer {
        sender: tx.clone(),
        strategy: config.back_pressure_strategy,
    };

    let handle = std::thread::spawn(move || {
        let mut mirrored: HashSet<String> = HashSet::new();
        let mut fault = None;

        loop {
            match rx.recv() {
                Ok(Command::Operation(LiveMsg::Event(event))) => {
                    match sim.step(event) {
                        Ok(action) => {
                            for oid in &action.cancels {
                                if let Err(err) = gateway.cancel(oid) {
                                    tracing::warn!("gateway cancel {oid} failed: {err}");
                                }
                            }
                            mirror_open_quotes(&sim, &mut gateway, &mut mirrored);
                        }
                        Err(err) => {
                            tracing::error!("live step failed: {err}");
                            fault = Some(err);
                            break;
                        }
                    }
                }
                Ok(Command::Operation(LiveMsg::PollFills)) => {
                    for fill in gateway.poll_fills() {
                        tracing::info!(
                            maker = %fill.maker_oid,
                            size = fill.size,
                            price = fill.price,
                            "gateway confirmed fill"
                        );
                    }
                }
                Ok(Command::Shutdown) | Err(crossbeam_channel::RecvError) => {
                    // drain pending events before tearing down
                    while let Ok(Command::Operation(LiveMsg::Event(event))) = rx.try_recv() {
                        if let Err(err) = sim.step(event) {
                            fault = Some(err);
                            break;
                        }
                        mirror_open_quotes(&sim, &mut gateway, &mut mirrored);
                    }
                    break;
                }
            }
        }

        if let Err(err) = gateway.cancel_all() {
            tracing::warn!("gateway cancel-all failed: {err}");
        }

        LiveOutcome {
            sim,
            gateway,
            fault,
        }
    });

    let controller = Controller {
        handle: Some(handle),
        sender: tx,
    };

    (producer, controller)
}

// Push any quote the core opened this step out to the venue, exactly
// once per oid.
fn mirror_open_quotes<G: Gateway>(sim: &Simulator, gateway: &mut G, mirrored: &mut HashSet<String>) {
    for quote in sim.open_quotes() {
        if mirrored.insert(quote.oid.clone()) {
            if let Err(err) = gateway.submit(quote) {
                tracing::warn!("gateway submit {} failed: {err}", quote.oid);
            }
        }
    }
}
