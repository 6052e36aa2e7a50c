//! Structural mutation engine.
//!
//! # Responsibility
//! - Create, update and delete categories, stacks and notes for one owner.
//! - Execute cascading deletes as explicit three-phase commands.
//!
//! # Invariants
//! - Empty (after trim) names, titles and texts are rejected before any write.
//! - Changing a note's category clears its stack in the same write.
//! - Written `categoryId`/`stackId` values name documents of the same owner,
//!   and a note's stack lives in the note's category.
//! - A cascade either commits as one batch or changes nothing.
//! - Nothing is applied optimistically; state changes arrive via snapshots.

use crate::model::entity::{CategoryId, NoteColor, NoteId, OwnerId, StackId};
use crate::store::{
    Collection, DocFields, DocQuery, DocRef, DocumentStore, RawDocument, RefField, StoreError,
    WriteBatch,
};
use log::{info, warn};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Errors surfaced by mutation operations.
#[derive(Debug)]
pub enum MutationError {
    /// Named input field is blank after trim. Nothing was written.
    EmptyField(&'static str),
    /// No principal with full access is active.
    NoAccess,
    /// Referenced category or stack does not exist for this owner.
    MissingReference { collection: Collection, id: Uuid },
    /// Stack does not belong to the note's category.
    StackOutsideCategory {
        stack_id: StackId,
        category_id: Option<CategoryId>,
    },
    /// Cascade pre-read returned a document whose id cannot be addressed.
    UnaddressableDocument {
        collection: Collection,
        doc_id: String,
    },
    /// Store rejected the write, batch or pre-read.
    Store(StoreError),
}

impl Display for MutationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "{field} must not be blank"),
            Self::NoAccess => write!(f, "no signed-in principal"),
            Self::MissingReference { collection, id } => {
                write!(f, "referenced document not found: {collection}/{id}")
            }
            Self::StackOutsideCategory {
                stack_id,
                category_id: Some(category_id),
            } => write!(f, "stack {stack_id} is not in category {category_id}"),
            Self::StackOutsideCategory {
                stack_id,
                category_id: None,
            } => write!(f, "stack {stack_id} needs a note with a category"),
            Self::UnaddressableDocument { collection, doc_id } => {
                write!(f, "cannot cascade over {collection}/{doc_id}: id is not a uuid")
            }
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MutationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for MutationError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Input for note creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteDraft {
    pub text: String,
    pub color: NoteColor,
    pub category_id: Option<CategoryId>,
    /// Ignored when `category_id` is unset.
    pub stack_id: Option<StackId>,
}

/// Affected documents of a category delete, captured by the pre-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCascade {
    pub category_id: CategoryId,
    /// Notes that lose both `categoryId` and `stackId`.
    pub note_ids: Vec<NoteId>,
    /// Stacks deleted with the category.
    pub stack_ids: Vec<StackId>,
}

/// Affected documents of a stack delete, captured by the pre-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackCascade {
    pub stack_id: StackId,
    /// Notes that lose `stackId` and keep `categoryId`.
    pub note_ids: Vec<NoteId>,
}

/// What a cascade will do, as shown to the user before confirming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeImpact {
    Category {
        category_id: CategoryId,
        notes_detached: usize,
        stacks_deleted: usize,
    },
    Stack {
        stack_id: StackId,
        notes_unstacked: usize,
    },
}

impl CascadeImpact {
    /// Human-readable confirmation text.
    pub fn describe(&self) -> String {
        match self {
            Self::Category {
                notes_detached,
                stacks_deleted,
                ..
            } => format!(
                "Delete this category?\n\n\
                 - Notes in this category: {notes_detached} (moved to \"no category\")\n\
                 - Stacks in this category: {stacks_deleted} (deleted)\n\n\
                 Continue?"
            ),
            Self::Stack {
                notes_unstacked, ..
            } => format!(
                "Delete this stack?\n\n\
                 - Notes in this stack: {notes_unstacked} (removed from the stack, kept in the category)\n\n\
                 Continue?"
            ),
        }
    }
}

impl CategoryCascade {
    pub fn impact(&self) -> CascadeImpact {
        CascadeImpact::Category {
            category_id: self.category_id,
            notes_detached: self.note_ids.len(),
            stacks_deleted: self.stack_ids.len(),
        }
    }
}

impl StackCascade {
    pub fn impact(&self) -> CascadeImpact {
        CascadeImpact::Stack {
            stack_id: self.stack_id,
            notes_unstacked: self.note_ids.len(),
        }
    }
}

/// Final state of a cascading delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// Batch committed.
    Committed(CascadeImpact),
    /// User declined; nothing was written.
    Declined(CascadeImpact),
}

/// User confirmation hook for cascading deletes.
pub trait ConfirmationPrompt {
    /// Returns `true` to proceed.
    fn confirm(&mut self, impact: &CascadeImpact) -> bool;
}

impl<F: FnMut(&CascadeImpact) -> bool> ConfirmationPrompt for F {
    fn confirm(&mut self, impact: &CascadeImpact) -> bool {
        self(impact)
    }
}

/// Mutation engine bound to one store and one owner.
pub struct MutationEngine<'s, S: DocumentStore + ?Sized> {
    store: &'s S,
    owner: OwnerId,
}

impl<'s, S: DocumentStore + ?Sized> MutationEngine<'s, S> {
    pub fn new(store: &'s S, owner: OwnerId) -> Self {
        Self { store, owner }
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Creates a category with `order = sibling_count`.
    pub fn create_category(
        &self,
        name: &str,
        sibling_count: usize,
    ) -> Result<CategoryId, MutationError> {
        let result = require_text(name, "name").and_then(|name| {
            let mut fields = DocFields::new();
            fields.insert("name".to_string(), json!(name));
            fields.insert("order".to_string(), json!(sibling_count));
            Ok(self
                .store
                .create(Collection::Categories, self.owner, fields)?)
        });
        log_outcome("create_category", &result);
        result
    }

    /// Creates a stack inside `category_id` with `order = sibling_count`.
    pub fn create_stack(
        &self,
        category_id: CategoryId,
        title: &str,
        sibling_count: usize,
    ) -> Result<StackId, MutationError> {
        let result = require_text(title, "title").and_then(|title| {
            self.require_category(category_id)?;
            let mut fields = DocFields::new();
            fields.insert(
                RefField::CategoryId.name().to_string(),
                json!(category_id.to_string()),
            );
            fields.insert("title".to_string(), json!(title));
            fields.insert("order".to_string(), json!(sibling_count));
            Ok(self.store.create(Collection::Stacks, self.owner, fields)?)
        });
        log_outcome("create_stack", &result);
        result
    }

    /// Creates a note. A stack without a category is dropped.
    pub fn create_note(&self, draft: &NoteDraft) -> Result<NoteId, MutationError> {
        let result = require_text(&draft.text, "text").and_then(|text| {
            let stack_id = draft.category_id.and(draft.stack_id);
            if let Some(category_id) = draft.category_id {
                self.require_category(category_id)?;
            }
            if let Some(stack_id) = stack_id {
                self.require_stack_in(stack_id, draft.category_id)?;
            }
            let mut fields = DocFields::new();
            fields.insert("text".to_string(), json!(text));
            fields.insert("color".to_string(), json!(draft.color.as_str()));
            fields.insert(
                RefField::CategoryId.name().to_string(),
                reference_value(draft.category_id),
            );
            fields.insert(RefField::StackId.name().to_string(), reference_value(stack_id));
            Ok(self.store.create(Collection::Notes, self.owner, fields)?)
        });
        log_outcome("create_note", &result);
        result
    }

    /// Replaces a note's text.
    pub fn update_note_text(&self, note_id: NoteId, text: &str) -> Result<(), MutationError> {
        let result = require_text(text, "text").and_then(|text| {
            self.update_note(note_id, [("text", json!(text))])
        });
        log_outcome("update_note_text", &result);
        result
    }

    /// Replaces a note's color.
    pub fn update_note_color(&self, note_id: NoteId, color: NoteColor) -> Result<(), MutationError> {
        let result = self.update_note(note_id, [("color", json!(color.as_str()))]);
        log_outcome("update_note_color", &result);
        result
    }

    /// Moves a note to another category and unconditionally clears its stack
    /// in the same write.
    pub fn update_note_category(
        &self,
        note_id: NoteId,
        category_id: Option<CategoryId>,
    ) -> Result<(), MutationError> {
        let result = category_id
            .map_or(Ok(()), |id| self.require_category(id))
            .and_then(|()| {
                self.update_note(
                    note_id,
                    [
                        (RefField::CategoryId.name(), reference_value(category_id)),
                        (RefField::StackId.name(), Value::Null),
                    ],
                )
            });
        log_outcome("update_note_category", &result);
        result
    }

    /// Sets a note's stack. The stack must belong to the note's category.
    pub fn update_note_stack(
        &self,
        note_id: NoteId,
        stack_id: Option<StackId>,
    ) -> Result<(), MutationError> {
        let result = self.check_note_stack(note_id, stack_id).and_then(|()| {
            self.update_note(
                note_id,
                [(RefField::StackId.name(), reference_value(stack_id))],
            )
        });
        log_outcome("update_note_stack", &result);
        result
    }

    /// Deletes one note unconditionally.
    pub fn delete_note(&self, note_id: NoteId) -> Result<(), MutationError> {
        let result = self
            .store
            .delete(&self.doc(Collection::Notes, note_id))
            .map_err(MutationError::from);
        log_outcome("delete_note", &result);
        result
    }

    /// Phase 1 of a category delete: reads affected notes and stacks.
    pub fn plan_category_delete(
        &self,
        category_id: CategoryId,
    ) -> Result<CategoryCascade, MutationError> {
        let notes = self.store.read(
            &DocQuery::owned(Collection::Notes, self.owner)
                .where_eq(RefField::CategoryId, category_id),
        )?;
        let stacks = self.store.read(
            &DocQuery::owned(Collection::Stacks, self.owner)
                .where_eq(RefField::CategoryId, category_id),
        )?;
        Ok(CategoryCascade {
            category_id,
            note_ids: document_ids(Collection::Notes, &notes)?,
            stack_ids: document_ids(Collection::Stacks, &stacks)?,
        })
    }

    /// Phase 3 of a category delete: one atomic batch.
    ///
    /// The plan is not re-read; a note deleted since phase 1 makes the whole
    /// batch fail with `NotFound`.
    pub fn commit_category_delete(&self, plan: &CategoryCascade) -> Result<(), MutationError> {
        let mut batch = WriteBatch::new();
        for note_id in &plan.note_ids {
            batch.update(
                self.doc(Collection::Notes, *note_id),
                detach_patch(&[RefField::CategoryId, RefField::StackId]),
            );
        }
        for stack_id in &plan.stack_ids {
            batch.delete(self.doc(Collection::Stacks, *stack_id));
        }
        batch.delete(self.doc(Collection::Categories, plan.category_id));

        let result = self.store.commit(batch).map_err(MutationError::from);
        log_outcome("delete_category", &result);
        result
    }

    /// Reads, confirms and commits a category delete.
    pub fn delete_category(
        &self,
        category_id: CategoryId,
        prompt: &mut dyn ConfirmationPrompt,
    ) -> Result<CascadeOutcome, MutationError> {
        let plan = self.plan_category_delete(category_id)?;
        let impact = plan.impact();
        if !prompt.confirm(&impact) {
            info!("event=mutation module=service op=delete_category status=declined");
            return Ok(CascadeOutcome::Declined(impact));
        }
        self.commit_category_delete(&plan)?;
        Ok(CascadeOutcome::Committed(impact))
    }

    /// Phase 1 of a stack delete: reads notes referencing the stack.
    pub fn plan_stack_delete(&self, stack_id: StackId) -> Result<StackCascade, MutationError> {
        let notes = self.store.read(
            &DocQuery::owned(Collection::Notes, self.owner).where_eq(RefField::StackId, stack_id),
        )?;
        Ok(StackCascade {
            stack_id,
            note_ids: document_ids(Collection::Notes, &notes)?,
        })
    }

    /// Phase 3 of a stack delete: clears `stackId` on notes, deletes the stack.
    pub fn commit_stack_delete(&self, plan: &StackCascade) -> Result<(), MutationError> {
        let mut batch = WriteBatch::new();
        for note_id in &plan.note_ids {
            batch.update(
                self.doc(Collection::Notes, *note_id),
                detach_patch(&[RefField::StackId]),
            );
        }
        batch.delete(self.doc(Collection::Stacks, plan.stack_id));

        let result = self.store.commit(batch).map_err(MutationError::from);
        log_outcome("delete_stack", &result);
        result
    }

    /// Reads, confirms and commits a stack delete.
    pub fn delete_stack(
        &self,
        stack_id: StackId,
        prompt: &mut dyn ConfirmationPrompt,
    ) -> Result<CascadeOutcome, MutationError> {
        let plan = self.plan_stack_delete(stack_id)?;
        let impact = plan.impact();
        if !prompt.confirm(&impact) {
            info!("event=mutation module=service op=delete_stack status=declined");
            return Ok(CascadeOutcome::Declined(impact));
        }
        self.commit_stack_delete(&plan)?;
        Ok(CascadeOutcome::Committed(impact))
    }

    fn require_category(&self, category_id: CategoryId) -> Result<(), MutationError> {
        match self
            .store
            .get(&self.doc(Collection::Categories, category_id))?
        {
            Some(_) => Ok(()),
            None => Err(MutationError::MissingReference {
                collection: Collection::Categories,
                id: category_id,
            }),
        }
    }

    fn require_stack_in(
        &self,
        stack_id: StackId,
        category_id: Option<CategoryId>,
    ) -> Result<(), MutationError> {
        let stack = self
            .store
            .get(&self.doc(Collection::Stacks, stack_id))?
            .ok_or(MutationError::MissingReference {
                collection: Collection::Stacks,
                id: stack_id,
            })?;
        let owning = reference_of(&stack, RefField::CategoryId);
        if category_id.is_none() || owning != category_id {
            return Err(MutationError::StackOutsideCategory {
                stack_id,
                category_id,
            });
        }
        Ok(())
    }

    fn check_note_stack(
        &self,
        note_id: NoteId,
        stack_id: Option<StackId>,
    ) -> Result<(), MutationError> {
        let Some(stack_id) = stack_id else {
            return Ok(());
        };
        let note = self
            .store
            .get(&self.doc(Collection::Notes, note_id))?
            .ok_or(StoreError::NotFound {
                collection: Collection::Notes,
                doc_id: note_id,
            })?;
        self.require_stack_in(stack_id, reference_of(&note, RefField::CategoryId))
    }

    fn update_note<const N: usize>(
        &self,
        note_id: NoteId,
        fields: [(&str, Value); N],
    ) -> Result<(), MutationError> {
        let patch: DocFields = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        self.store
            .update(&self.doc(Collection::Notes, note_id), patch)
            .map_err(MutationError::from)
    }

    fn doc(&self, collection: Collection, id: Uuid) -> DocRef {
        DocRef::new(collection, id, self.owner)
    }
}

fn require_text<'a>(value: &'a str, field: &'static str) -> Result<&'a str, MutationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MutationError::EmptyField(field));
    }
    Ok(trimmed)
}

fn reference_value(id: Option<Uuid>) -> Value {
    id.map_or(Value::Null, |id| json!(id.to_string()))
}

fn reference_of(fields: &DocFields, field: RefField) -> Option<Uuid> {
    fields
        .get(field.name())
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn detach_patch(fields: &[RefField]) -> DocFields {
    fields
        .iter()
        .map(|field| (field.name().to_string(), Value::Null))
        .collect()
}

/// Parses pre-read ids. One bad id aborts the plan so no reference is left
/// pointing at a deleted document.
fn document_ids(collection: Collection, docs: &[RawDocument]) -> Result<Vec<Uuid>, MutationError> {
    docs.iter()
        .map(|doc| {
            Uuid::parse_str(&doc.id).map_err(|_| {
                warn!(
                    "event=cascade_plan module=service status=error collection={collection} reason=invalid_id"
                );
                MutationError::UnaddressableDocument {
                    collection,
                    doc_id: doc.id.clone(),
                }
            })
        })
        .collect()
}

fn log_outcome<T>(op: &'static str, result: &Result<T, MutationError>) {
    match result {
        Ok(_) => info!("event=mutation module=service op={op} status=ok"),
        Err(err) => warn!("event=mutation module=service op={op} status=error error={err}"),
    }
}
