// =============================================================================
// Error taxonomy
// =============================================================================
//
// Errors that cross a component boundary are expressed as `BotError`
// variants so the orchestrator can match on kind rather than inspect
// strings. Everything internal to a single component keeps using
// `anyhow::Result` with `.context(...)`.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BotError {
    /// Network failure, 5xx, or timeout talking to the exchange. The cycle
    /// that hit this should skip and continue; it is never fatal.
    #[error("transient exchange error: {0}")]
    TransientExchangeError(String),

    /// An order was rejected by the exchange. Carries the exchange's error
    /// code/message when available.
    #[error("order rejected: {message} (code={code:?})")]
    OrderRejected {
        message: String,
        code: Option<String>,
    },

    /// Indicators could not be computed from insufficient history. Internal
    /// to C1/C3 -- surfaced only as a HOLD signal, never propagated as an
    /// error to the orchestrator, but kept in the taxonomy for components
    /// that want to distinguish it explicitly.
    #[error("indicator unready: {0}")]
    IndicatorUnready(String),

    /// Fatal at startup -- the service refuses to start.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A structural invariant was violated (e.g. a short position observed
    /// by a long-only engine, or a monotonicity break in the tiered store).
    /// Logged at CRITICAL; the orchestrator enters a defensive mode.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        BotError::TransientExchangeError(e.to_string())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        BotError::ConfigError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_rejected_formats_code() {
        let e = BotError::OrderRejected {
            message: "insufficient margin".into(),
            code: Some("-2019".into()),
        };
        let s = e.to_string();
        assert!(s.contains("insufficient margin"));
        assert!(s.contains("-2019"));
    }

    #[test]
    fn config_error_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let bot_err: BotError = parse_err.into();
        assert!(matches!(bot_err, BotError::ConfigError(_)));
    }
}
