//! Deterministic random number generation.
//!
//! RULE: Nothing in the simulation may call a platform RNG, except the
//! explicitly configured unseeded pathing window, which reports itself
//! as nondeterministic.
//!
//! Every (slot, tick) pair gets its own stream derived from the match
//! seed. Streams carry no state across ticks, so a checkpoint of the
//! match state is enough to resume the exact same randomness.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

use crate::types::Tick;

/// A deterministic RNG for one slot and one tick.
pub struct SlotRng {
    inner: Pcg64Mcg,
}

impl SlotRng {
    pub fn new(master_seed: u64, slot_index: u64, tick: Tick) -> Self {
        let derived_seed = master_seed
            ^ slot_index.wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ tick.wrapping_mul(0xd1b5_4a32_d192_ed03);
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// Hands out per-tick streams for a single match.
#[derive(Debug, Clone, Copy)]
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn seed(&self) -> u64 {
        self.master_seed
    }

    pub fn for_tick(&self, slot: RngSlot, tick: Tick) -> SlotRng {
        SlotRng::new(self.master_seed, slot as u64, tick)
    }
}

/// Stable slot assignments.
/// NEVER reorder or remove entries, only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum RngSlot {
    MapLayout = 0,
    Economy = 1,
    Pathing = 2,
    Combat = 3,
}
