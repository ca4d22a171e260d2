use std::time::Duration;

/// Limits applied to a single script run
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Maximum wall-clock duration, checked at statements, loop iterations
    /// and host calls
    pub timeout: Duration,
    /// Maximum number of statements and loop iterations executed
    pub max_operations: u64,
    /// Maximum length of any string built by the script
    pub max_string_size: usize,
    /// Maximum length of any array built by the script
    pub max_array_size: usize,
    /// Maximum number of `print` lines kept
    pub max_log_lines: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_operations: 10_000_000,
            max_string_size: 1_000_000,
            max_array_size: 100_000,
            max_log_lines: 1_000,
        }
    }
}

impl EvalConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
