//! Environment-driven configuration.

const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Infrastructure knobs, read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfraConfig {
    /// How many times a workflow operation re-runs after an optimistic
    /// commit conflict before surfacing `Conflict` to the caller.
    pub conflict_retries: u32,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }
}

impl InfraConfig {
    pub fn from_env() -> Self {
        let conflict_retries = std::env::var("TALLYERP_CONFLICT_RETRIES")
            .unwrap_or_else(|_| DEFAULT_CONFLICT_RETRIES.to_string())
            .parse::<u32>()
            .unwrap_or(DEFAULT_CONFLICT_RETRIES);

        Self { conflict_retries }
    }
}
