//! Desired-state model for the sync engine
//!
//! These are the records the platform owns: subscribers, the packages they
//! are billed on, the routers that serve them and the tenants that own it all.

pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;
