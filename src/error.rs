use thiserror::Error;

/// Failures reported by a remote favorites gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("session rejected by the favorites service")]
    Unauthenticated,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Errors surfaced by the favorites engine and the category controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FavoritesError {
    #[error("not logged in")]
    NotAuthenticated,
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("favorites service unavailable: {0}")]
    Transport(String),
    #[error("another category change is still being saved")]
    Saving,
}

impl FavoritesError {
    pub fn validation(message: impl Into<String>) -> Self {
        FavoritesError::Validation(message.into())
    }

    /// True when the UI should treat the failure as a no-op rather than an error.
    pub fn is_silent(&self) -> bool {
        matches!(self, FavoritesError::NotAuthenticated)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FavoritesError::NotAuthenticated => "not_authenticated",
            FavoritesError::Validation(_) => "validation",
            FavoritesError::Conflict(_) => "conflict",
            FavoritesError::NotFound(_) => "not_found",
            FavoritesError::Transport(_) => "transport",
            FavoritesError::Saving => "saving",
        }
    }
}

impl From<GatewayError> for FavoritesError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::Unauthenticated => FavoritesError::NotAuthenticated,
            GatewayError::NotFound(message) => FavoritesError::NotFound(message),
            GatewayError::Conflict(message) => FavoritesError::Conflict(message),
            GatewayError::Transport(message) => FavoritesError::Transport(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_keep_their_kind() {
        let err: FavoritesError = GatewayError::Conflict("name taken".into()).into();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(err.to_string(), "name taken");
        let err: FavoritesError = GatewayError::Unauthenticated.into();
        assert!(err.is_silent());
        assert!(!FavoritesError::Saving.is_silent());
    }
}
