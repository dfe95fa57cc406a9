//! Typed ID definitions.

use crate::define_id;

// =============================================================================
// Placement topology
// =============================================================================

define_id!(HostId, "host");
define_id!(ClusterId, "cls");
define_id!(ZoneId, "zone");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================
