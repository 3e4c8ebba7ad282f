//! Bridge configuration

/// Bridge configuration options
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Maximum live sessions (0 = unlimited)
    pub max_sessions: usize,

    /// Maximum concurrently open outputs per session (0 = unlimited)
    pub max_outputs_per_session: usize,

    /// Treat an input's `UnexpectedEof` error as a clean end of stream
    pub lenient_eof: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_sessions: 0,            // Unlimited
            max_outputs_per_session: 0, // Unlimited
            lenient_eof: true,
        }
    }
}

impl BridgeConfig {
    /// Set maximum live sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set maximum open outputs per session
    pub fn max_outputs_per_session(mut self, max: usize) -> Self {
        self.max_outputs_per_session = max;
        self
    }

    /// Pass `UnexpectedEof` from inputs through as an I/O error
    pub fn strict_eof(mut self) -> Self {
        self.lenient_eof = false;
        self
    }
}
