//! Payment intermediation gateway.
//!
//! Accepts payments without waiting on downstream health, settles them
//! against whichever of two external processors is healthy, and reports
//! per-processor summaries across replicas.

pub mod admission;
pub mod arbiter;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod http;
pub mod ledger;
pub mod metrics;
pub mod processor;
pub mod settlement;
pub mod summary;

#[cfg(test)]
pub(crate) mod testing;
