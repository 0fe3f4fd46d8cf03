//! # Memory Management
//!
//! Recycling of the records that are created and destroyed on every shot.
//!
//! ## Rules
//!
//! - Records are taken from and returned to the [`ResourceArena`]
//! - A returned record is reset to its zeroed state, keeping vector capacity
//! - Object graphs are returned bottom-up with the `recycle_*` helpers

mod arena;

pub use arena::{ArenaStats, KindStats, PoolKind, Poolable, Pooled, ResourceArena};
