//! Reconciliation of Workiz jobs into a Google Sheet.
//!
//! [`pipeline::run_sync`] fetches jobs, indexes the sheet by job key, plans
//! the minimal set of row updates and appends, and writes them in batches.

pub mod columns;
pub mod pipeline;
pub mod reconcile;

#[cfg(test)]
mod testing;
