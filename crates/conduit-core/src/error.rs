//! Structured allocation errors.

use thiserror::Error;

/// Why an allocation request could not be satisfied.
///
/// Every variant carries a caller-facing status class so the web layer
/// can map errors to HTTP responses without interpreting message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The purchase record is missing its tariff linkage.
    #[error("purchase is missing its tariff linkage")]
    LinkageMissing,

    /// The tariff does not exist or is disabled.
    #[error("tariff not found or disabled")]
    TariffNotFoundOrDisabled,

    /// The client does not exist.
    #[error("client not found")]
    ClientNotFound,

    /// No node is eligible for this tariff.
    #[error("no eligible nodes for placement")]
    NoEligibleNodes,

    /// Eligible nodes exist but none has remaining batch capacity.
    #[error("no eligible node has remaining capacity")]
    ResourceExhausted,
}

impl AllocationError {
    /// HTTP status class the web layer should answer with.
    pub fn status_class(&self) -> u16 {
        match self {
            AllocationError::LinkageMissing => 400,
            AllocationError::TariffNotFoundOrDisabled | AllocationError::ClientNotFound => 404,
            AllocationError::NoEligibleNodes | AllocationError::ResourceExhausted => 503,
        }
    }
}
