//! Transient, purely local UI flags keyed by entity id.
//!
//! Never written to the store and never mixed into persisted entities.

use crate::model::entity::{NoteId, StackId};
use std::collections::{BTreeSet, HashSet};

/// Per-note popup menus. At most one is open at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteMenu {
    Color,
    Category,
    Stack,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    editing: BTreeSet<NoteId>,
    open_menu: Option<(NoteId, NoteMenu)>,
    open_stack_header: Option<StackId>,
    category_dialog_open: bool,
    stack_dialog_open: bool,
}

impl UiState {
    /// Flips edit mode for one note and returns the new state.
    pub fn toggle_edit(&mut self, note_id: NoteId) -> bool {
        if self.editing.remove(&note_id) {
            return false;
        }
        self.editing.insert(note_id);
        true
    }

    pub fn is_editing(&self, note_id: NoteId) -> bool {
        self.editing.contains(&note_id)
    }

    pub fn stop_editing(&mut self, note_id: NoteId) {
        self.editing.remove(&note_id);
    }

    /// Opens `menu` for a note, or closes it when it is already open.
    pub fn toggle_menu(&mut self, note_id: NoteId, menu: NoteMenu) {
        self.open_menu = match self.open_menu {
            Some(current) if current == (note_id, menu) => None,
            _ => Some((note_id, menu)),
        };
    }

    /// Closes `menu` if it is the open one for `note_id`.
    pub fn close_menu(&mut self, note_id: NoteId, menu: NoteMenu) {
        if self.open_menu == Some((note_id, menu)) {
            self.open_menu = None;
        }
    }

    pub fn open_menu(&self) -> Option<(NoteId, NoteMenu)> {
        self.open_menu
    }

    pub fn toggle_stack_header(&mut self, stack_id: StackId) {
        self.open_stack_header = match self.open_stack_header {
            Some(current) if current == stack_id => None,
            _ => Some(stack_id),
        };
    }

    pub fn close_stack_header(&mut self, stack_id: StackId) {
        if self.open_stack_header == Some(stack_id) {
            self.open_stack_header = None;
        }
    }

    pub fn open_stack_header(&self) -> Option<StackId> {
        self.open_stack_header
    }

    pub fn set_category_dialog_open(&mut self, open: bool) {
        self.category_dialog_open = open;
    }

    pub fn is_category_dialog_open(&self) -> bool {
        self.category_dialog_open
    }

    pub fn set_stack_dialog_open(&mut self, open: bool) {
        self.stack_dialog_open = open;
    }

    pub fn is_stack_dialog_open(&self) -> bool {
        self.stack_dialog_open
    }

    pub fn forget_note(&mut self, note_id: NoteId) {
        self.editing.remove(&note_id);
        if matches!(self.open_menu, Some((open, _)) if open == note_id) {
            self.open_menu = None;
        }
    }

    /// Drops flags of notes that are no longer present.
    pub fn retain_notes(&mut self, present: &HashSet<NoteId>) {
        self.editing.retain(|note_id| present.contains(note_id));
        if let Some((note_id, _)) = self.open_menu {
            if !present.contains(&note_id) {
                self.open_menu = None;
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
