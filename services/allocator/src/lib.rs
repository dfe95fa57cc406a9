//! hostalloc allocator library.
//!
//! This crate primarily ships an `allocator` binary, but the placement and
//! capacity-accounting core is exposed as a library so it can be embedded
//! behind another transport and exercised by integration tests.
//!
//! - `ledger`: per-host total/available CPU and memory
//! - `capacity`: scoped capacity queries net of reservations
//! - `strategy`: pluggable placement strategies and their registry
//! - `dispatcher`: request routing, strategy invocation and the worker pool

pub mod api;
pub mod capacity;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod ledger;
pub mod service;
pub mod state;
pub mod strategy;
