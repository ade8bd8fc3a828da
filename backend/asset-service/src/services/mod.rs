pub mod blob;
pub mod orchestrator;
pub mod reaper;
pub mod transform;

pub use orchestrator::{AssetOrchestrator, OrphanReason, RequestContext};
pub use reaper::BlobOrphanReaper;
