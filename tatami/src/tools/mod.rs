//! Built-in toolkits surfacing runtime state to the model.
//!
//! These are optional: the agent builder wires them up over its own shared
//! state when default tools are enabled. Each method declares a typed
//! parameter descriptor, so argument validation and the model-facing schema
//! come from the same source.

mod history;
mod knowledge;
mod session_state;

pub use history::{HistoryTools, SharedHistory, SharedToolCallLog};
pub use knowledge::KnowledgeTools;
pub use session_state::SessionStateTools;
