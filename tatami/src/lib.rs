#![cfg_attr(docsrs, feature(doc_cfg))]
//! Tatami is a runtime library for building LLM-backed agents: stateful
//! conversational workers that combine a model, a catalog of callable tools,
//! durable session memory, and optional reasoning and retrieval pipelines.
//!
//! The crate is provider-agnostic — vendor HTTP clients, vector databases,
//! and transports live behind the adapter traits in [`model`], [`store`],
//! [`memory`], and [`knowledge`].
//!
//! # Quick start
//!
//! ```rust,ignore
//! use tatami::prelude::*;
//!
//! let agent = Agent::builder("assistant")
//!     .provider(provider)
//!     .instructions("You are concise and helpful.")
//!     .store(Arc::new(SqliteStore::open("sessions.db", StoreMode::Agent)?))
//!     .build()?;
//!
//! let response = agent.run("What is 2+2?", RunOptions::default()).await?;
//! println!("{}", response.text);
//! ```

// Core data model
pub mod error;
pub mod message;
pub mod stream;
pub mod usage;

// Model boundary
pub mod model;
pub mod providers;

// Schema, validation, and caching
pub mod cache;
pub mod schema;

// Policy and lifecycle
pub mod callback;
pub mod guardrail;

// Collaborators
pub mod compress;
pub mod deps;
pub mod knowledge;
pub mod memory;
pub mod store;

// Tools and orchestration
pub mod agent;
pub mod reasoning;
pub mod tool;
pub mod tools;

pub mod prelude;

// Re-export the types nearly every embedder touches.
pub use agent::{Agent, AgentBuilder, RunOptions, RunResponse};
pub use error::{Error, Result};
pub use message::{Message, Role, ToolCall};
