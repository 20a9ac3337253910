//! Run context and lifecycle hooks.
//!
//! [`RunContext`] carries the per-run cancellation token, cumulative usage,
//! step counter and the shared session-state map through every suspension
//! point. [`RunHooks`] is the fallible callback seam fired around input
//! processing, response production, and each tool invocation.

mod context;
mod hooks;
mod logging;
mod noop;

pub use context::{RunContext, SharedState};
pub use hooks::{HookChain, NamedHooks, RunHooks, SharedRunHooks};
pub use logging::LoggingHooks;
pub use noop::NoopHooks;
