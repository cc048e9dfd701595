//! Benchmark utilities.

#![deny(unsafe_code)]

use rand::Rng;
use txmem_core::{TVar, World};

/// Creates a batch of zeroed counters in the given world.
pub fn counter_batch(world: &World, count: usize) -> Vec<TVar<i64>> {
    (0..count).map(|_| TVar::new_in(world, 0i64)).collect()
}

/// Generates random indices into a batch of the given length.
pub fn random_indices(len: usize, count: usize) -> Vec<usize> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..len)).collect()
}
