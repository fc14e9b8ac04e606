//! Seeded pseudo-random generator shared by server and clients.
//!
//! SplitMix32: tiny state, and the sequence for a given seed is identical on
//! every platform, which is all the simulation needs. Exposed through
//! [`rand::RngCore`] so `rand`'s sampling helpers work on it.

use rand::{Error, RngCore, SeedableRng};

#[derive(Debug, Clone)]
pub struct SplitMix32 {
    seed: u32,
    state: u32,
}

impl SplitMix32 {
    pub fn new(seed: u32) -> Self {
        Self { seed, state: seed }
    }

    /// The seed this generator was created from.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Uniform value in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }
}

impl RngCore for SplitMix32 {
    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x9e37_79b9);
        let mut t = self.state ^ (self.state >> 16);
        t = t.wrapping_mul(0x21f0_aaad);
        t ^= t >> 15;
        t = t.wrapping_mul(0x735a_2d97);
        t ^ (t >> 15)
    }

    fn next_u64(&mut self) -> u64 {
        let low = self.next_u32() as u64;
        let high = self.next_u32() as u64;
        (high << 32) | low
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for SplitMix32 {
    type Seed = [u8; 4];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u32::from_be_bytes(seed))
    }
}

/// Fresh seed for a new lobby.
pub fn fresh_seed() -> u32 {
    rand::random::<u32>()
}
