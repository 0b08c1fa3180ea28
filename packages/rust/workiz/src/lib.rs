//! Workiz job API client.
//!
//! Lists jobs for a date window page by page, dropping jobs outside the window,
//! jobs from unwanted lead sources and jobs without an identifier.

pub mod client;

pub use client::WorkizClient;
