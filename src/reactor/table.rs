//! Bounded table of live peers.
//!
//! Peers live densely in `[0, len)` so the driver can walk them without
//! holes; removal swaps the last peer into the freed position. A directory
//! of generation-tagged slots maps each [`PeerId`] to its current position,
//! which keeps ids valid across swaps and makes stale ids detectable.

use crate::error::{Error, Result};
use crate::peer::{Peer, PeerId};

use std::collections::HashMap;
use std::os::unix::io::RawFd;

const VACANT: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    position: usize,
}

#[derive(Debug)]
pub(crate) struct PeerTable {
    peers: Vec<Peer>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_fd: HashMap<RawFd, PeerId>,
    capacity: usize,
}

impl PeerTable {
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        let out_of_memory = |_| Error::OutOfMemory { capacity };

        let mut peers = Vec::new();
        peers.try_reserve_exact(capacity).map_err(out_of_memory)?;

        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(out_of_memory)?;
        slots.extend((0..capacity).map(|_| Slot {
            generation: 0,
            position: VACANT,
        }));

        let mut free = Vec::new();
        free.try_reserve_exact(capacity).map_err(out_of_memory)?;
        // Reversed so that slot 0 is handed out first.
        free.extend((0..capacity as u32).rev());

        let mut by_fd = HashMap::new();
        by_fd.try_reserve(capacity).map_err(out_of_memory)?;

        Ok(Self {
            peers,
            slots,
            free,
            by_fd,
            capacity,
        })
    }

    /// Takes a free slot for `peer`. On [`Error::TableFull`] the peer is
    /// dropped, which closes its socket.
    pub(crate) fn insert(&mut self, mut peer: Peer) -> Result<PeerId> {
        if self.is_full() {
            return Err(Error::TableFull {
                capacity: self.capacity,
            });
        }

        let slot = self.free.pop().ok_or(Error::TableFull {
            capacity: self.capacity,
        })?;

        let entry = &mut self.slots[slot as usize];
        entry.position = self.peers.len();

        let id = PeerId::new(slot, entry.generation);
        peer.set_id(id);

        self.by_fd.insert(peer.fd(), id);
        self.peers.push(peer);

        Ok(id)
    }

    /// Swap-removes the peer. The peer that was last now sits at the freed
    /// position; its id is unaffected.
    pub(crate) fn remove(&mut self, id: PeerId) -> Option<Peer> {
        let position = self.position_of(id)?;

        let peer = self.peers.swap_remove(position);
        if let Some(moved) = self.peers.get(position) {
            self.slots[moved.id().slot() as usize].position = position;
        }

        let entry = &mut self.slots[id.slot() as usize];
        entry.position = VACANT;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.slot());

        if self.by_fd.get(&peer.fd()) == Some(&id) {
            self.by_fd.remove(&peer.fd());
        }

        Some(peer)
    }

    pub(crate) fn get(&self, id: PeerId) -> Option<&Peer> {
        self.position_of(id).map(|position| &self.peers[position])
    }

    pub(crate) fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.position_of(id).map(|position| &mut self.peers[position])
    }

    pub(crate) fn find_by_fd(&self, file_descriptor: RawFd) -> Option<PeerId> {
        self.by_fd.get(&file_descriptor).copied()
    }

    /// Live peers in table order.
    pub(crate) fn iter(&self) -> std::slice::Iter<'_, Peer> {
        self.peers.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn is_full(&self) -> bool {
        self.peers.len() == self.capacity
    }

    /// Empties the table and returns every live peer. Existing ids are
    /// invalidated.
    pub(crate) fn drain(&mut self) -> Vec<Peer> {
        let peers = std::mem::take(&mut self.peers);

        for peer in &peers {
            let entry = &mut self.slots[peer.id().slot() as usize];
            entry.position = VACANT;
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(peer.id().slot());
        }
        self.by_fd.clear();

        peers
    }

    fn position_of(&self, id: PeerId) -> Option<usize> {
        let slot = self.slots.get(id.slot() as usize)?;

        if slot.generation != id.generation() || slot.position == VACANT {
            return None;
        }

        Some(slot.position)
    }
}
