// =============================================================================
// Observer HTTP surface
// =============================================================================

pub mod rest;
