//! In-process simulated radio medium.
//!
//! Every [`SimRadio`] created from one [`SimMedium`] shares the same air. A
//! transmission reaches every other radio that is listening on the same
//! channel with a reading pipe open on the target address, unless the link
//! between the two radios has been cut with [`SimMedium::set_link`].
//!
//! Loss is applied per hardware attempt from a seeded generator, so a run is
//! reproducible for a given seed and call sequence. A unicast succeeds if any
//! of its `auto_retry.count + 1` attempts survives and the receiver's FIFO has
//! room; multicasts get a single unacknowledged attempt per listener.

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use mesh_wire::PipeAddress;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::radio::{Radio, RadioConfig, ReceivedPacket, PIPE_COUNT};
use crate::RadioError;

/// Packet size moved by the simulated transceiver
pub const SIM_PAYLOAD_SIZE: usize = 32;

/// Identifies one radio on a medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RadioId(pub u32);

impl fmt::Display for RadioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "radio-{}", self.0)
    }
}

/// Simulated medium parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimMediumConfig {
    /// Probability that a single attempt is lost (0.0..=1.0)
    pub loss: f64,
    /// Packets each receiver buffers before refusing to acknowledge
    pub rx_capacity: usize,
    /// Seed for the loss generator
    pub seed: u64,
}

impl Default for SimMediumConfig {
    fn default() -> Self {
        Self {
            loss: 0.0,
            rx_capacity: 64,
            seed: 0,
        }
    }
}

/// Medium-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediumStats {
    /// Transmissions started
    pub transmissions: u64,
    /// Packets placed in a receiver FIFO
    pub delivered: u64,
    /// Receivers that missed a packet through loss
    pub lost: u64,
    /// Receivers that refused a packet because their FIFO was full
    pub overflowed: u64,
}

#[derive(Debug, Default)]
struct Station {
    begun: bool,
    channel: u8,
    retries: u8,
    listening: bool,
    pipes: [Option<PipeAddress>; PIPE_COUNT as usize],
    rx: VecDeque<ReceivedPacket>,
}

struct LossModel {
    rng: StdRng,
    loss: f64,
}

#[derive(Default)]
struct Counters {
    transmissions: AtomicU64,
    delivered: AtomicU64,
    lost: AtomicU64,
    overflowed: AtomicU64,
}

struct MediumInner {
    rx_capacity: usize,
    stations: DashMap<RadioId, Station>,
    cut_links: DashSet<(RadioId, RadioId)>,
    loss: Mutex<LossModel>,
    next_id: AtomicU32,
    counters: Counters,
}

/// Shared air for a set of simulated radios
#[derive(Clone)]
pub struct SimMedium {
    inner: Arc<MediumInner>,
}

impl SimMedium {
    /// Create an empty medium
    pub fn new(config: SimMediumConfig) -> Self {
        Self {
            inner: Arc::new(MediumInner {
                rx_capacity: config.rx_capacity.max(1),
                stations: DashMap::new(),
                cut_links: DashSet::new(),
                loss: Mutex::new(LossModel {
                    rng: StdRng::seed_from_u64(config.seed),
                    loss: config.loss.clamp(0.0, 1.0),
                }),
                next_id: AtomicU32::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Attach a new radio to the medium
    pub fn radio(&self) -> SimRadio {
        let id = RadioId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.stations.insert(id, Station::default());
        SimRadio {
            id,
            medium: self.clone(),
        }
    }

    /// Cut (`up = false`) or restore the link between two radios, both directions
    pub fn set_link(&self, a: RadioId, b: RadioId, up: bool) {
        let key = link_key(a, b);
        if up {
            self.inner.cut_links.remove(&key);
        } else {
            self.inner.cut_links.insert(key);
        }
        debug!("Link {} <-> {} {}", a, b, if up { "up" } else { "down" });
    }

    /// Whether two radios can hear each other
    pub fn link_up(&self, a: RadioId, b: RadioId) -> bool {
        !self.inner.cut_links.contains(&link_key(a, b))
    }

    /// Change the per-attempt loss probability
    pub fn set_loss(&self, loss: f64) {
        self.loss_model().loss = loss.clamp(0.0, 1.0);
    }

    /// Snapshot of the medium counters
    pub fn stats(&self) -> MediumStats {
        let c = &self.inner.counters;
        MediumStats {
            transmissions: c.transmissions.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            lost: c.lost.load(Ordering::Relaxed),
            overflowed: c.overflowed.load(Ordering::Relaxed),
        }
    }

    fn loss_model(&self) -> std::sync::MutexGuard<'_, LossModel> {
        self.inner
            .loss
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn attempt_survives(&self) -> bool {
        let mut model = self.loss_model();
        let loss = model.loss;
        !model.rng.gen_bool(loss)
    }

    fn transmit(&self, from: RadioId, addr: PipeAddress, bytes: &[u8], multicast: bool) -> bool {
        let (channel, retries) = match self.inner.stations.get(&from) {
            Some(station) if station.begun => (station.channel, station.retries),
            _ => return false,
        };
        self.inner
            .counters
            .transmissions
            .fetch_add(1, Ordering::Relaxed);

        // Receivers are visited in id order so the loss sequence is reproducible
        let mut targets: Vec<(RadioId, u8)> = self
            .inner
            .stations
            .iter()
            .filter(|entry| *entry.key() != from)
            .filter_map(|entry| {
                let station = entry.value();
                if !station.begun || !station.listening || station.channel != channel {
                    return None;
                }
                station
                    .pipes
                    .iter()
                    .position(|pipe| *pipe == Some(addr))
                    .map(|pipe| (*entry.key(), pipe as u8))
            })
            .collect();
        targets.retain(|(id, _)| self.link_up(from, *id));
        targets.sort_by_key(|(id, _)| *id);

        let attempts = if multicast { 1 } else { retries as usize + 1 };
        let mut acked = false;
        for (id, pipe) in targets {
            if !(0..attempts).any(|_| self.attempt_survives()) {
                self.inner.counters.lost.fetch_add(1, Ordering::Relaxed);
                trace!("{} -> {} lost on {}", from, id, addr);
                continue;
            }
            let Some(mut station) = self.inner.stations.get_mut(&id) else {
                continue;
            };
            if station.rx.len() >= self.inner.rx_capacity {
                self.inner.counters.overflowed.fetch_add(1, Ordering::Relaxed);
                trace!("{} -> {} refused, FIFO full", from, id);
                continue;
            }
            station.rx.push_back(ReceivedPacket {
                pipe,
                payload: Bytes::copy_from_slice(bytes),
            });
            self.inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
            acked = true;
        }

        multicast || acked
    }
}

fn link_key(a: RadioId, b: RadioId) -> (RadioId, RadioId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A radio attached to a [`SimMedium`]
pub struct SimRadio {
    id: RadioId,
    medium: SimMedium,
}

impl SimRadio {
    /// Identifier of this radio on its medium
    pub fn id(&self) -> RadioId {
        self.id
    }

    /// The medium this radio transmits on
    pub fn medium(&self) -> &SimMedium {
        &self.medium
    }
}

impl fmt::Debug for SimRadio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimRadio").field("id", &self.id).finish()
    }
}

impl Radio for SimRadio {
    fn begin(&mut self, config: &RadioConfig) -> Result<(), RadioError> {
        config.validate()?;
        let mut station = self
            .medium
            .inner
            .stations
            .get_mut(&self.id)
            .ok_or(RadioError::NotInitialized)?;
        station.begun = true;
        station.channel = config.channel;
        station.retries = config.auto_retry.count;
        debug!("{} on channel {}", self.id, config.channel);
        Ok(())
    }

    fn open_reading_pipe(&mut self, pipe: u8, addr: PipeAddress) -> Result<(), RadioError> {
        if pipe >= PIPE_COUNT {
            return Err(RadioError::Pipe(pipe));
        }
        let mut station = self
            .medium
            .inner
            .stations
            .get_mut(&self.id)
            .ok_or(RadioError::NotInitialized)?;
        if !station.begun {
            return Err(RadioError::NotInitialized);
        }
        station.pipes[pipe as usize] = Some(addr);
        Ok(())
    }

    fn set_listening(&mut self, listening: bool) {
        if let Some(mut station) = self.medium.inner.stations.get_mut(&self.id) {
            station.listening = listening;
        }
    }

    fn send_to(&mut self, addr: PipeAddress, bytes: &[u8], multicast: bool) -> bool {
        if bytes.len() > SIM_PAYLOAD_SIZE {
            return false;
        }
        self.medium.transmit(self.id, addr, bytes, multicast)
    }

    fn available(&mut self) -> bool {
        self.medium
            .inner
            .stations
            .get(&self.id)
            .map(|station| !station.rx.is_empty())
            .unwrap_or(false)
    }

    fn receive(&mut self) -> Option<ReceivedPacket> {
        self.medium
            .inner
            .stations
            .get_mut(&self.id)
            .and_then(|mut station| station.rx.pop_front())
    }

    fn payload_size(&self) -> usize {
        SIM_PAYLOAD_SIZE
    }
}

impl Drop for SimRadio {
    fn drop(&mut self) {
        self.medium.inner.stations.remove(&self.id);
    }
}
