//! Stable exit codes for scout CLI commands.

/// Command succeeded; for questions, the turn reached DONE.
pub const OK: i32 = 0;
/// Invalid config, I/O failure, or other errors.
pub const ERROR: i32 = 1;
/// The turn ended ABORTED (engine failure or circuit-breaker trip).
pub const ABORTED: i32 = 2;
