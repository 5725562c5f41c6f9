//! The sync pipeline: fetch a window of device transactions, resolve and
//! normalize them, skip the ones the host already has, write the rest, then
//! move the watermark.

pub mod clock;
pub mod dedup;
pub mod event;
pub mod fetcher;
pub mod identity;
pub mod normalizer;
pub mod orchestrator;
pub mod scheduler;
pub mod status;
pub mod writer;

pub use clock::DeviceClock;
pub use dedup::DedupGuard;
pub use identity::IdentityResolver;
pub use normalizer::Normalizer;
pub use orchestrator::SyncEngine;
pub use scheduler::run_scheduler;
pub use writer::CheckinWriter;
