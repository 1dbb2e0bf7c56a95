// ============================================================================
// Order Validation Errors
// ============================================================================

/// A structural invariant of the order aggregate was violated.
///
/// Field paths use the wire names, with the item index for per-line
/// violations (`items[2].price`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(String),

    #[error("{field} too long: {len} chars, max {max}")]
    TooLong {
        field: String,
        len: usize,
        max: usize,
    },

    #[error("date_created is required and must be a valid datetime")]
    MissingCreatedAt,

    #[error("payment.currency must be a 3-letter code, got {0:?}")]
    InvalidCurrency(String),

    #[error("items cannot be empty")]
    EmptyItems,

    #[error("{0} must be positive")]
    NotPositive(String),

    #[error("{0} cannot be negative")]
    Negative(String),
}

impl ValidationError {
    /// The offending field path
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required(field)
            | ValidationError::NotPositive(field)
            | ValidationError::Negative(field) => field,
            ValidationError::TooLong { field, .. } => field,
            ValidationError::MissingCreatedAt => "date_created",
            ValidationError::InvalidCurrency(_) => "payment.currency",
            ValidationError::EmptyItems => "items",
        }
    }
}
