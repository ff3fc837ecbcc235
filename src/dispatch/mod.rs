//! Dispatcher — request intake, strategy merging, fast paths and
//! routing to the worker pool.

pub mod dispatcher;
pub mod request;
pub mod strategy;

pub use dispatcher::{CoreDeps, DispatchOutcome, Dispatcher, NO_RESULTS};
pub use request::{ChatTurn, DispatchRequest, NormalizedInput, RequestPayload, normalize};
pub use strategy::{ConfigOverrides, GlobalStrategy, Mode, ModePolicy, StrategyContext};
