// ============================================================================
// Domain Layer - Payments, Processors, Summaries
// ============================================================================
//
// Plain value types shared by every other module:
// - Money (fixed-point cents)
// - Payment lifecycle shapes (request, queue entry, settled record)
// - Processor kinds and the arbiter's decision snapshot
// - Summary items and time windows
//
// Nothing here performs I/O.
//
// ============================================================================

pub mod errors;
pub mod money;
pub mod payment;
pub mod processor;
pub mod summary;

pub use errors::*;
pub use money::Cents;
pub use payment::*;
pub use processor::*;
pub use summary::*;
