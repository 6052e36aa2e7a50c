//! Domain model for categories, stacks and notes.
//!
//! # Responsibility
//! - Define the typed entities produced by snapshot normalization.
//! - Define principal states consumed by the identity gate.
//!
//! # Invariants
//! - Every entity is scoped by exactly one `owner`.
//! - A note's `stack_id`, when set, names a stack of the note's category.
//! - Deletion is final; there are no tombstones.

pub mod entity;
pub mod principal;
