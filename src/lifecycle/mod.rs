// =============================================================================
// Lifecycle workers — position refresh loop and live fill poller
// =============================================================================

pub mod poller;
pub mod refresher;
