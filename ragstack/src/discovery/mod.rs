//! Resource discovery across nested stacks.

mod inventory;
mod walker;

pub use inventory::{match_pairs, Inventory, PairMatch};
pub use walker::ResourceGraphWalker;
