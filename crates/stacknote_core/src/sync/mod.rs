//! Live-query plumbing between the document store and session state.
//!
//! # Responsibility
//! - Own at most one live handle per logical query.
//! - Turn raw snapshot payloads into typed, deterministically ordered
//!   entities.
//!
//! # Invariants
//! - Snapshots of one logical query are applied in delivery order.
//! - Deliveries for closed handles are never routed to a query key.

pub mod normalize;
pub mod subscriptions;
