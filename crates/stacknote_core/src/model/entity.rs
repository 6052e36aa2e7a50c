//! Category, stack and note entities.
//!
//! # Responsibility
//! - Define the canonical typed shapes held by session state.
//! - Provide the note color priority used by deterministic ordering.
//!
//! # Invariants
//! - `order` is advisory sibling order assigned at creation time.
//! - `created_at == None` means the server timestamp is missing or pending.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of the principal that owns a document.
pub type OwnerId = Uuid;
/// Stable category identifier.
pub type CategoryId = Uuid;
/// Stable stack identifier.
pub type StackId = Uuid;
/// Stable note identifier.
pub type NoteId = Uuid;

/// Three-value status color of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteColor {
    #[default]
    Green,
    Yellow,
    Red,
}

impl NoteColor {
    /// Sort priority: green(1) < yellow(2) < red(3).
    pub fn priority(self) -> u8 {
        match self {
            Self::Green => 1,
            Self::Yellow => 2,
            Self::Red => 3,
        }
    }

    /// Wire name used in document bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }

    /// Parses a wire name. Unknown values return `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "green" => Some(Self::Green),
            "yellow" => Some(Self::Yellow),
            "red" => Some(Self::Red),
            _ => None,
        }
    }
}

/// Top-level grouping owned by one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub owner: OwnerId,
    pub name: String,
    pub order: i64,
    /// Epoch milliseconds assigned by the store.
    pub created_at: Option<i64>,
}

/// Sub-grouping inside one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub id: StackId,
    pub owner: OwnerId,
    /// Must reference a category of the same owner.
    pub category_id: CategoryId,
    pub title: String,
    pub order: i64,
    pub created_at: Option<i64>,
}

/// Short text note with a status color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub owner: OwnerId,
    pub text: String,
    pub color: NoteColor,
    pub category_id: Option<CategoryId>,
    /// When set, the stack's category equals `category_id`.
    pub stack_id: Option<StackId>,
    pub created_at: Option<i64>,
}

impl Note {
    /// Returns whether the note belongs to the given category.
    pub fn is_in_category(&self, category_id: CategoryId) -> bool {
        self.category_id == Some(category_id)
    }
}

/// Scope of the note list: everything or one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "category_id")]
pub enum CategoryFilter {
    #[default]
    All,
    Category(CategoryId),
}

impl CategoryFilter {
    /// Returns the category id when the filter names one.
    pub fn category_id(self) -> Option<CategoryId> {
        match self {
            Self::All => None,
            Self::Category(id) => Some(id),
        }
    }
}

/// Generates a fresh stable identifier.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}
