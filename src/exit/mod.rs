// =============================================================================
// Exit Management Module
// =============================================================================
//
// Threshold rules, the per-position decision engine, and the background monitor
// loop that runs one decision cycle per interval.

pub mod engine;
pub mod monitor;
pub mod rules;
