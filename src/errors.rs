use thiserror::Error;

use crate::types::OrderId;

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Errors surfaced by an [`ExchangeConnector`](crate::exchange::ExchangeConnector).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    #[error("exchange unavailable: {0}")]
    Unavailable(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request rejected by exchange: {reason}")]
    Rejected { reason: String },
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("unknown instrument {0}")]
    UnknownInstrument(String),
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("exchange error: {0}")]
    Other(String),
}

impl ExchangeError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ExchangeError::Rejected {
            reason: reason.into(),
        }
    }

    /// Errors worth retrying on the next tick without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Unavailable(_) | ExchangeError::Network(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::Network("timeout".into()).is_transient());
        assert!(ExchangeError::Unavailable("maintenance".into()).is_transient());
        assert!(!ExchangeError::rejected("post only").is_transient());
        assert!(!ExchangeError::UnknownInstrument("FOO".into()).is_transient());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = ExchangeError::OrderNotFound(OrderId::new("abc"));
        assert_eq!(err.to_string(), "order abc not found");
        let err = ExchangeError::rejected("price out of band");
        assert_eq!(
            err.to_string(),
            "request rejected by exchange: price out of band"
        );
    }
}
