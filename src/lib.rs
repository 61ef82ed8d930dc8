//! relay-emu library
//!
//! Instruction-level model of the Relay tensor accelerator: a hierarchical
//! unit/instruction state-machine engine, the accelerator's functional units
//! built on it, and a manifest-driven test harness.

pub mod config;
pub mod ila;
pub mod primitives;
pub mod relay;
pub mod testing;
