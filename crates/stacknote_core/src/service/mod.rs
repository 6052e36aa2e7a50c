//! Structural mutation use-cases.
//!
//! # Responsibility
//! - Validate user input and translate edits into store writes.
//! - Run cascading deletes as read, confirm, then one atomic batch.
//!
//! # See also
//! - `crate::session` for the state resets that follow a committed cascade.

pub mod mutations;
