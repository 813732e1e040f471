//! Deterministic RNG wrapper and seed-derivation helpers.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_distr::{Distribution, Normal};
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

use crate::errors::{ErrorInfo, MverseError};

/// Deterministic RNG handle injected into every resampling routine.
///
/// A master `seed: u64` is always supplied by the caller; nothing in the
/// pipeline reads ambient entropy. Independent work units (one bootstrap
/// iteration each) obtain their own stream through [`RngHandle::substream`],
/// which hashes `(master_seed, substream_id)` with SipHash-1-3 under fixed
/// zero keys. Results are therefore identical regardless of how units are
/// scheduled across threads.
#[derive(Debug, Clone)]
pub struct RngHandle {
    rng: StdRng,
}

impl RngHandle {
    /// Creates a new RNG handle from a master seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates the handle for a numbered substream of `master_seed`.
    pub fn substream(master_seed: u64, substream: u64) -> Self {
        Self::from_seed(derive_substream_seed(master_seed, substream))
    }

    /// Draws one value from `N(mean, sd²)`.
    pub fn gaussian(&mut self, mean: f64, sd: f64) -> Result<f64, MverseError> {
        let normal = Normal::new(mean, sd).map_err(|err| {
            MverseError::Bootstrap(
                ErrorInfo::new("invalid_normal", err.to_string())
                    .with_context("mean", mean)
                    .with_context("sd", sd),
            )
        })?;
        Ok(normal.sample(&mut self.rng))
    }
}

impl RngCore for RngHandle {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}

/// Derives the deterministic seed for a specific substream.
pub fn derive_substream_seed(master_seed: u64, substream: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_u64(substream);
    hasher.finish()
}
