//! Scribe core — asynchronous task orchestration for an AI writing and
//! document-analysis assistant.
//!
//! The crate owns the parts that must not lose work or take the process
//! down: a durable job queue with crash recovery, a cancellable
//! per-job worker pool, a publish/subscribe event bus, a per-workspace
//! analysis cache, and a dispatcher routing between a synchronous fast
//! path and queued background execution. UI, document parsers and the
//! generation/search services are external collaborators behind the
//! traits in [`clients`].

pub mod cache;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod modules;
pub mod queue;
pub mod worker;
pub mod workspace;
