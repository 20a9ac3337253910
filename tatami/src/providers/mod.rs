//! Model provider implementations.
//!
//! Vendor HTTP adapters live outside this crate; what ships here is
//! [`MockProvider`], the scripted provider used by the test suite and by
//! embedders wiring up the runtime before a real backend exists.

mod mock;

pub use mock::MockProvider;
