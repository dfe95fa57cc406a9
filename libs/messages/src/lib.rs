//! # hostalloc-messages
//!
//! The wire contract of the host allocator.
//!
//! ## Message kinds
//!
//! | Request                  | Reply                          |
//! |--------------------------|--------------------------------|
//! | `allocate_host`          | `allocate_host` / `allocate_host_dry_run` |
//! | `report_host_capacity`   | none (fire-and-forget)         |
//! | `return_host_capacity`   | none (fire-and-forget)         |
//! | `get_cpu_memory_capacity`| `cpu_memory_capacity`          |
//! | `get_allocator_strategies`| `allocator_strategies`        |
//!
//! Messages and replies are internally tagged by `kind`. Replies that can
//! fail carry either their payload or an [`ErrorCode`], never both.

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::{codes, ErrorCode};
pub use types::*;
