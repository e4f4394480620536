//! Side-effecting adapters: git, filesystem state, locks, signals, and the tracker.

pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod git;
pub mod lock;
pub mod paths;
pub mod plan_store;
pub mod process;
pub mod signal;
pub mod sweep_state;
pub mod tracker;
