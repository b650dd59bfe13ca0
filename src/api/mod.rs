// =============================================================================
// Status API — read-only view of the monitor
// =============================================================================

pub mod rest;
