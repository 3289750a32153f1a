//! Shared components for the confocal diffusion simulator.
//!
//! Domain-independent building blocks used by the simulation crate: the chunk
//! iteration protocol that bounds memory use, deterministic seeded parallel
//! processing, Poisson counting noise and streaming statistics.

pub mod algo;
pub mod noise;
