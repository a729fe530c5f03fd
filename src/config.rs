/// Default bound on nested user-function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 10_000;

/// Interpreter settings, built by the driver from command line flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Nested user-function calls allowed before execution fails with a
    /// runtime error.
    pub max_call_depth: usize,
    /// Render lexer warnings before running.
    pub show_warnings: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            show_warnings: true,
        }
    }
}
