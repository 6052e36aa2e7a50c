//! Pure filtered/grouped view computation.
//!
//! # Responsibility
//! - Filter notes by the active category filter.
//! - Group filtered notes into stack buckets for a specific category.
//!
//! # Invariants
//! - Output depends only on `(notes, stacks, filter)`.
//! - Every filtered note lands in exactly one bucket.
//! - The unstacked bucket always comes first, then subscribed stacks in
//!   stack order (even when empty), then buckets for stacks not (yet)
//!   present in the stack snapshot, in first-seen order.

use crate::model::entity::{CategoryFilter, Note, Stack, StackId};
use serde::Serialize;
use std::collections::HashMap;

/// Grouping key of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "stack_id")]
pub enum BucketKey {
    /// Sentinel bucket for notes without a stack.
    Unstacked,
    Stack(StackId),
}

/// Notes sharing one `stack_id` within the filtered category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackBucket {
    pub key: BucketKey,
    /// Stack title; `None` for the sentinel and for unknown stacks.
    pub title: Option<String>,
    /// Whether the bucket's stack is part of the current stack snapshot.
    pub subscribed: bool,
    /// Notes in their incoming (already sorted) order.
    pub notes: Vec<Note>,
}

/// Filtered and grouped projection of the note list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedView {
    pub filter: CategoryFilter,
    pub filtered_notes: Vec<Note>,
    /// Present only when `filter` names a specific category.
    pub grouped_by_stack: Option<Vec<StackBucket>>,
}

impl DerivedView {
    /// Total number of notes across all buckets.
    pub fn bucketed_count(&self) -> usize {
        self.grouped_by_stack
            .as_ref()
            .map_or(0, |buckets| buckets.iter().map(|bucket| bucket.notes.len()).sum())
    }
}

/// Builds the view for the given inputs. Pure; no hidden state.
pub fn build_view(notes: &[Note], stacks: &[Stack], filter: CategoryFilter) -> DerivedView {
    let filtered_notes = filter_notes(notes, filter);
    let grouped_by_stack = filter
        .category_id()
        .map(|_| group_by_stack(&filtered_notes, stacks, filter));

    DerivedView {
        filter,
        filtered_notes,
        grouped_by_stack,
    }
}

/// Returns notes visible under `filter`, preserving input order.
pub fn filter_notes(notes: &[Note], filter: CategoryFilter) -> Vec<Note> {
    match filter {
        CategoryFilter::All => notes.to_vec(),
        CategoryFilter::Category(category_id) => notes
            .iter()
            .filter(|note| note.is_in_category(category_id))
            .cloned()
            .collect(),
    }
}

fn group_by_stack(
    filtered_notes: &[Note],
    stacks: &[Stack],
    filter: CategoryFilter,
) -> Vec<StackBucket> {
    let mut buckets = vec![StackBucket {
        key: BucketKey::Unstacked,
        title: None,
        subscribed: true,
        notes: Vec::new(),
    }];
    let mut index_by_stack: HashMap<StackId, usize> = HashMap::new();

    for stack in stacks {
        if Some(stack.category_id) != filter.category_id() || index_by_stack.contains_key(&stack.id)
        {
            continue;
        }
        index_by_stack.insert(stack.id, buckets.len());
        buckets.push(StackBucket {
            key: BucketKey::Stack(stack.id),
            title: Some(stack.title.clone()),
            subscribed: true,
            notes: Vec::new(),
        });
    }

    for note in filtered_notes {
        let index = match note.stack_id {
            None => 0,
            Some(stack_id) => *index_by_stack.entry(stack_id).or_insert_with(|| {
                buckets.push(StackBucket {
                    key: BucketKey::Stack(stack_id),
                    title: None,
                    subscribed: false,
                    notes: Vec::new(),
                });
                buckets.len() - 1
            }),
        };
        buckets[index].notes.push(note.clone());
    }

    buckets
}
