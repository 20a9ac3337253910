//! No-op hook implementation.

use super::hooks::RunHooks;

/// Hooks that do nothing. Useful as a default or placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl RunHooks for NoopHooks {}
