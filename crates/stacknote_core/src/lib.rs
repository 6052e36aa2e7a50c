//! Core sync and referential-integrity engine for StackNote.
//! This crate is the single source of truth for category, stack and note
//! invariants; presentation layers only render its views.

pub mod config;
pub mod db;
pub mod identity;
pub mod logging;
pub mod model;
pub mod service;
pub mod session;
pub mod store;
pub mod sync;
pub mod view;

pub use config::{ConfigError, CoreConfig};
pub use identity::{IdentityProvider, LocalIdentityProvider};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::entity::{
    Category, CategoryFilter, CategoryId, Note, NoteColor, NoteId, OwnerId, Stack, StackId,
};
pub use model::principal::Principal;
pub use service::mutations::{
    CascadeImpact, CascadeOutcome, ConfirmationPrompt, MutationEngine, MutationError, NoteDraft,
};
pub use session::selection::SelectionMemory;
pub use session::ui_state::{NoteMenu, UiState};
pub use session::{Access, LiveSlice, NotesSession, SessionNotice};
pub use store::{DocumentStore, SqliteDocumentStore, StoreError, StoreResult};
pub use sync::subscriptions::QueryKey;
pub use view::{build_view, BucketKey, DerivedView, StackBucket};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
