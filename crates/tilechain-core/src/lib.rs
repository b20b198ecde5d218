//! Tilechain Core -- grid placement and conveyor logistics simulation.
//!
//! This crate provides the tile grid and occupancy groups, structure
//! placement and removal, mover chains with payload hand-off, timed payload
//! motion with a break/redirect window, a cooperative tick scheduler,
//! synchronous events, read-only queries and binary snapshots.
//!
//! # Step Pipeline
//!
//! Each call to [`engine::Engine::step`]:
//!
//! 1. **Tasks** -- Resume every scheduled task due at the current tick:
//!    payload motion steps, break re-polls, settle delays and mover
//!    animation frames. Each runs to completion before the next begins.
//! 2. **Bookkeeping** -- Increment the tick counter and compute the state hash.
//!
//! Placement, removal, power changes and redirects apply immediately and
//! never wait for a step.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Owns the grid, structures, payloads and scheduler.
//! - [`grid::Grid`] -- Row-major tiles with fixed neighbour links and group ids.
//! - [`catalog::Catalog`] -- Immutable descriptor table (frozen at startup).
//! - [`mover::MoverState`] -- Conveyor or station chain bookkeeping.
//! - [`payload::Payload`] -- A moving item box and its state machine.
//! - [`scheduler::Scheduler`] -- Due-tick ordered, cancellable task queue.
//! - [`event::EventBus`] -- Synchronous, suppressible event delivery.
//! - [`snapshot`] -- Versioned scene snapshots via bitcode.

pub mod catalog;
mod chain;
pub mod config;
pub mod engine;
pub mod event;
pub mod fixed;
pub mod grid;
pub mod id;
pub mod mover;
pub mod payload;
pub mod query;
pub mod rng;
pub mod scheduler;
pub mod sim;
pub mod snapshot;
pub mod structure;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
