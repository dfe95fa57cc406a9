//! # hostalloc-id
//!
//! Typed identifiers for the resources the host allocator talks about.
//!
//! Every id is a prefixed ULID, `{prefix}_{ulid}`:
//! - `host_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `cls_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `zone_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! The prefix keeps a cluster id from being passed where a host id is
//! expected, both in Rust signatures and on the wire. ULIDs sort by creation
//! time, which gives the reference strategy a stable candidate order.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
