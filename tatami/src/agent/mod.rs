//! The agent orchestrator.
//!
//! An [`Agent`] composes a run from its configured sources — system prompt
//! sections, knowledge retrieval, user memories, session history, an
//! optional reasoning pass, dependency frames — then drives the model,
//! routes tool calls through the dispatch engine, parses structured output,
//! and persists the turn to the session store.
//!
//! ```rust,ignore
//! let agent = Agent::builder("support")
//!     .provider(provider)
//!     .instructions("You answer billing questions.")
//!     .store(store)
//!     .build()?;
//!
//! let response = agent.run("Why was I charged twice?", RunOptions::default()).await?;
//! println!("{}", response.text);
//! ```

mod config;
mod events;
mod options;
mod result;
mod runner;

pub use config::{Agent, AgentBuilder, OutputSchema};
pub use events::RunEvent;
pub use options::RunOptions;
pub use result::{RunMetrics, RunPhase, RunResponse};
