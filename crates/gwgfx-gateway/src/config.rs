//! Gateway configuration, loaded from the environment (§6 Configuration).

use std::env;

use gwgfx_session::{clamp_max_sessions, DEFAULT_MAX_SESSIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub max_sessions: usize,
}

impl Config {
    /// Reads `RDP_MAX_SESSIONS` from the environment, clamping it into
    /// `[gwgfx_session::MIN_MAX_SESSIONS, gwgfx_session::MAX_MAX_SESSIONS]`.
    /// Falls back to the default when unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let max_sessions = env::var("RDP_MAX_SESSIONS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .map_or(DEFAULT_MAX_SESSIONS, clamp_max_sessions);

        Self { max_sessions }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { max_sessions: DEFAULT_MAX_SESSIONS }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_session_crate_default() {
        assert_eq!(Config::default().max_sessions, DEFAULT_MAX_SESSIONS);
    }
}
