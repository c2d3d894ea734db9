use rust_decimal::Decimal;

// ============================================================================
// Payment Domain Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MoneyError {
    #[error("Amount must be positive, got {0}")]
    NotPositive(Decimal),

    #[error("Amount {0} does not fit in minor units")]
    Overflow(Decimal),

    #[error("Amount {0} is not a finite number")]
    NotFinite(f64),

    #[error("Total of {0} and {1} minor units overflows")]
    SumOverflow(i64, i64),
}

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Unknown processor: {0}")]
    UnknownProcessor(String),

    #[error(transparent)]
    Money(#[from] MoneyError),
}
