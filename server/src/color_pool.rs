//! Finite color pool and the peer→color assignments drawn from it
//!
//! The pool starts out holding the palette in order. Colors are always popped
//! from the head and reclaimed to the tail, so the color that has been free the
//! longest is the next one handed out. Every color of the palette is at any
//! moment either in the pool or held by exactly one peer.

use crate::error::SessionError;
use log::{debug, warn};
use shared::{Color, PeerId};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct ColorPool {
    /// Unassigned colors, head is handed out next
    free: VecDeque<Color>,
    /// Color currently held by each peer
    assigned: HashMap<PeerId, Color>,
    capacity: usize,
}

impl ColorPool {
    /// Creates a pool holding every palette color, in palette order
    pub fn new(palette: &[Color]) -> Self {
        Self {
            free: palette.iter().copied().collect(),
            assigned: HashMap::with_capacity(palette.len()),
            capacity: palette.len(),
        }
    }

    /// Assigns the next free color to `peer`
    ///
    /// A peer that already holds a color gives it back to the tail of the pool
    /// before the head is popped, which means a peer can receive its own color
    /// again when nothing else is free. With an empty pool and no color to give
    /// back, nothing changes and `PoolExhausted` is returned.
    pub fn acquire(&mut self, peer: PeerId) -> Result<Color, SessionError> {
        if let Some(old) = self.assigned.remove(&peer) {
            debug!("Peer {} returns {} to the pool", peer, old);
            self.free.push_back(old);
        }

        let Some(color) = self.free.pop_front() else {
            warn!("No free colors to assign to peer {}", peer);
            return Err(SessionError::PoolExhausted { peer });
        };

        self.assigned.insert(peer, color);
        debug!("Peer {} assigned {}", peer, color);
        Ok(color)
    }

    /// Returns the color held by `peer` to the pool tail
    ///
    /// Unknown peers are ignored and yield `None`.
    pub fn release(&mut self, peer: PeerId) -> Option<Color> {
        let color = self.assigned.remove(&peer)?;
        self.free.push_back(color);
        debug!("Peer {} released {}", peer, color);
        Some(color)
    }

    pub fn color_of(&self, peer: PeerId) -> Option<Color> {
        self.assigned.get(&peer).copied()
    }

    pub fn assigned_count(&self) -> usize {
        self.assigned.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free colors in the order they will be handed out
    pub fn free_colors(&self) -> Vec<Color> {
        self.free.iter().copied().collect()
    }

    /// Current assignments sorted by peer id
    pub fn assignments(&self) -> Vec<(PeerId, Color)> {
        let mut pairs: Vec<(PeerId, Color)> =
            self.assigned.iter().map(|(peer, color)| (*peer, *color)).collect();
        pairs.sort_by_key(|(peer, _)| *peer);
        pairs
    }

    /// Checks that free and assigned colors together make up the palette
    /// exactly once each.
    pub fn is_conserved(&self) -> bool {
        if self.free.len() + self.assigned.len() != self.capacity {
            return false;
        }
        let mut seen: Vec<Color> = self
            .free
            .iter()
            .chain(self.assigned.values())
            .copied()
            .collect();
        let total = seen.len();
        seen.sort_by_key(|color| *color as u8);
        seen.dedup();
        seen.len() == total
    }
}
