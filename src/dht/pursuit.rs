use super::error::PursuitError;
use super::node::{CompactContact, NodeId};
use crate::constants::{
    MAX_PURSUIT_HOPS, NEXT_HOPS, PURSUIT_EXPIRY, PURSUIT_SLOTS, TOO_CLOSE_DISTANCE,
};
use crate::krpc::Krpc;
use rand::Rng as _;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy)]
struct Slot {
    info_hash: NodeId,
    checksum: u32,
    hop: u8,
    last: Instant,
    occupied: bool,
}

impl Slot {
    fn vacant(now: Instant) -> Self {
        Self {
            info_hash: NodeId::ZERO,
            checksum: 0,
            hop: 0,
            last: now,
            occupied: false,
        }
    }
}

/// Where a pursuit goes after a `get_peers` reply without peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHop {
    pub info_hash: NodeId,
    /// At most [`NEXT_HOPS`] contacts, closest first.
    pub contacts: Vec<CompactContact>,
    /// Hop count of the pursuit that produced this reply.
    pub hop: u8,
}

/// Tracks `get_peers` lookups we forward on behalf of other nodes.
///
/// Each pursuit owns one of 65536 slots, and the slot index travels as the
/// first two bytes of the query's transaction id. A reply is matched back to
/// its slot by that index plus a checksum of the node we queried; anything
/// else is dropped. Slots are never swept: they are freed when their reply
/// arrives or reclaimed by [`reserve_token`](Self::reserve_token) once stale.
pub struct PursuitManager {
    slots: Box<[Slot]>,
    expiry: Duration,
    max_hops: u8,
    in_use: usize,
    overflows: u64,
}

impl PursuitManager {
    pub fn new(expiry: Duration, max_hops: u8) -> Self {
        let now = Instant::now();
        Self {
            slots: vec![Slot::vacant(now); PURSUIT_SLOTS].into_boxed_slice(),
            expiry,
            max_hops,
            in_use: 0,
            overflows: 0,
        }
    }

    pub fn reserve_token(&mut self) -> Result<u16, PursuitError> {
        self.reserve_token_at(Instant::now())
    }

    /// Finds a slot for a new pursuit, probing linearly from a random index.
    ///
    /// The slot is not claimed; [`register`](Self::register) must follow
    /// before any other reservation.
    pub fn reserve_token_at(&mut self, now: Instant) -> Result<u16, PursuitError> {
        let start = rand::rng().random_range(0..PURSUIT_SLOTS);

        for offset in 0..PURSUIT_SLOTS {
            let index = (start + offset) % PURSUIT_SLOTS;
            let slot = &mut self.slots[index];

            if slot.occupied && now.saturating_duration_since(slot.last) > self.expiry {
                slot.occupied = false;
                self.in_use -= 1;
            }
            if !slot.occupied {
                return Ok(index as u16);
            }
        }

        self.overflows += 1;
        warn!("no free pursuit slot among {}", PURSUIT_SLOTS);
        Err(PursuitError::Full)
    }

    pub fn register(&mut self, token: u16, nid: &NodeId, info_hash: &NodeId, hop: u8) -> bool {
        self.register_at(token, nid, info_hash, hop, Instant::now())
    }

    /// Starts or continues a pursuit of `info_hash` in slot `token`, awaiting
    /// a reply from `nid`. Refuses pursuits past the hop limit.
    pub fn register_at(
        &mut self,
        token: u16,
        nid: &NodeId,
        info_hash: &NodeId,
        hop: u8,
        now: Instant,
    ) -> bool {
        if hop > self.max_hops {
            trace!("dropping pursuit of {} at hop {}", info_hash, hop);
            return false;
        }

        let slot = &mut self.slots[token as usize];
        if !slot.occupied {
            self.in_use += 1;
        }
        *slot = Slot {
            info_hash: *info_hash,
            checksum: nid.checksum(),
            hop,
            last: now,
            occupied: true,
        };

        true
    }

    fn lookup(&self, reply: &Krpc<'_>) -> Option<usize> {
        let index = reply.pursuit_token()? as usize;
        let slot = &self.slots[index];
        (slot.occupied && slot.checksum == reply.nid.checksum()).then_some(index)
    }

    fn free(&mut self, index: usize) -> Slot {
        let slot = self.slots[index];
        self.slots[index].occupied = false;
        self.in_use -= 1;
        slot
    }

    /// Consumes the pursuit a `get_peers` reply answers and picks the contacts
    /// to query next. `None` if the reply matches no live pursuit.
    pub fn extract(&mut self, reply: &Krpc<'_>) -> Option<NextHop> {
        let index = self.lookup(reply)?;
        let slot = self.free(index);

        Some(NextHop {
            info_hash: slot.info_hash,
            contacts: select_next_hops(&reply.nodes, &slot.info_hash),
            hop: slot.hop,
        })
    }

    /// Ends the pursuit a reply answers, returning what was pursued.
    pub fn clear(&mut self, reply: &Krpc<'_>) -> Option<NodeId> {
        let index = self.lookup(reply)?;
        Some(self.free(index).info_hash)
    }

    pub fn hops_of(&self, reply: &Krpc<'_>) -> Option<u8> {
        self.lookup(reply).map(|index| self.slots[index].hop)
    }

    /// Slots currently claimed, stale ones included.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Reservations refused because every slot was live.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

impl Default for PursuitManager {
    fn default() -> Self {
        Self::new(PURSUIT_EXPIRY, MAX_PURSUIT_HOPS)
    }
}

/// The contacts closest to `info_hash` by log-distance, at most
/// [`NEXT_HOPS`] of them. Earlier contacts win ties. Empty ids and
/// implausibly close ids are skipped.
pub(crate) fn select_next_hops(contacts: &[CompactContact], info_hash: &NodeId) -> Vec<CompactContact> {
    let mut best: [Option<(u8, usize)>; NEXT_HOPS] = [None; NEXT_HOPS];

    for (index, contact) in contacts.iter().enumerate() {
        if contact.is_empty() {
            continue;
        }
        let dist = info_hash.log_distance(&contact.id);
        if dist <= TOO_CLOSE_DISTANCE {
            continue;
        }

        let Some(pos) = best
            .iter()
            .position(|entry| entry.map_or(true, |(d, _)| dist < d))
        else {
            continue;
        };

        best[pos..].rotate_right(1);
        best[pos] = Some((dist, index));
    }

    best.iter()
        .flatten()
        .map(|&(_, index)| contacts[index])
        .collect()
}
