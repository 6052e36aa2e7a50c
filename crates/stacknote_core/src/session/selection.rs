//! Session-scoped remembered stack choice per category.
//!
//! # Invariants
//! - A remembered value is only applied if it names a stack present in the
//!   current stack snapshot of that category.
//! - Nothing here is persisted.

use crate::model::entity::{CategoryId, Stack, StackId};
use std::collections::HashMap;

/// `categoryId -> stackId-or-unset` used to prefill note creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionMemory {
    remembered: HashMap<CategoryId, Option<StackId>>,
}

impl SelectionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an explicit pick, including an explicit "no stack".
    pub fn remember(&mut self, category_id: CategoryId, stack_id: Option<StackId>) {
        self.remembered.insert(category_id, stack_id);
    }

    /// Returns the remembered stack without validating it.
    pub fn recall(&self, category_id: CategoryId) -> Option<StackId> {
        self.remembered.get(&category_id).copied().flatten()
    }

    /// Returns the remembered stack only if `stacks` still contains it.
    pub fn resolve(&self, category_id: CategoryId, stacks: &[Stack]) -> Option<StackId> {
        self.recall(category_id)
            .filter(|stack_id| stacks.iter().any(|stack| stack.id == *stack_id))
    }

    /// Clears every entry that names `stack_id`.
    pub fn forget_stack(&mut self, stack_id: StackId) {
        for remembered in self.remembered.values_mut() {
            if *remembered == Some(stack_id) {
                *remembered = None;
            }
        }
    }

    pub fn forget_category(&mut self, category_id: CategoryId) {
        self.remembered.remove(&category_id);
    }

    pub fn clear(&mut self) {
        self.remembered.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.remembered.is_empty()
    }
}
