//! Derived, presentation-ready views over session state.

pub mod derive;

pub use derive::{build_view, filter_notes, BucketKey, DerivedView, StackBucket};
