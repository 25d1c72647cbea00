//! quaternion-core: fixed-timestep RTS engine core.
//!
//! Tick scheduling, utility scoring with a reasoning fallback, and
//! deterministic replay recording behind a small service boundary.

pub mod advisor;
pub mod cache;
pub mod clock;
pub mod config;
pub mod delta;
pub mod error;
pub mod gate;
pub mod reasoning;
pub mod recorder;
pub mod replay;
pub mod rng;
pub mod scheduler;
pub mod scorer;
pub mod service;
pub mod session;
pub mod simulation;
pub mod snapshot;
pub mod store;
pub mod types;
