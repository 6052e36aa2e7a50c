//! Identity provider contract and in-process implementation.
//!
//! # Responsibility
//! - Expose the current principal and broadcast transitions to watchers.
//! - Provide guest bootstrap, account linking and sign-out flows.
//!
//! # Invariants
//! - Signing in from a guest keeps the guest's durable id.
//! - Signing out always lands on a fresh guest principal.

use crate::model::entity::{new_id, OwnerId};
use crate::model::principal::Principal;
use log::info;
use std::cell::RefCell;
use std::sync::mpsc::Sender;

/// Identity provider consumed by the session's identity gate.
pub trait IdentityProvider {
    /// Returns the current principal.
    fn current(&self) -> Principal;
    /// Registers a watcher that receives every later transition.
    fn watch(&self, sink: Sender<Principal>);
}

/// In-process identity provider.
#[derive(Default)]
pub struct LocalIdentityProvider {
    current: RefCell<Principal>,
    watchers: RefCell<Vec<Sender<Principal>>>,
}

impl LocalIdentityProvider {
    /// Creates a provider with no principal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider already holding `principal`.
    pub fn with_principal(principal: Principal) -> Self {
        Self {
            current: RefCell::new(principal),
            watchers: RefCell::new(Vec::new()),
        }
    }

    /// Makes sure at least a guest principal exists and returns its id.
    pub fn ensure_guest(&self) -> OwnerId {
        if let Some(uid) = self.current.borrow().uid() {
            return uid;
        }
        let uid = new_id();
        self.transition(Principal::Guest { uid });
        uid
    }

    /// Attaches a full identity.
    ///
    /// A guest keeps its durable id (account linking); an absent principal
    /// gets a new id; an already full principal is re-announced with the new
    /// display name.
    pub fn sign_in(&self, display_name: Option<String>) -> OwnerId {
        let uid = self.current.borrow().uid().unwrap_or_else(new_id);
        self.transition(Principal::Full { uid, display_name });
        uid
    }

    /// Signs out and continues as a fresh guest.
    pub fn sign_out(&self) -> OwnerId {
        let uid = new_id();
        self.transition(Principal::Guest { uid });
        uid
    }

    fn transition(&self, next: Principal) {
        info!(
            "event=identity_transition module=identity status=ok from={} to={}",
            self.current.borrow().kind(),
            next.kind()
        );
        *self.current.borrow_mut() = next.clone();
        self.watchers
            .borrow_mut()
            .retain(|watcher| watcher.send(next.clone()).is_ok());
    }
}

impl IdentityProvider for LocalIdentityProvider {
    fn current(&self) -> Principal {
        self.current.borrow().clone()
    }

    fn watch(&self, sink: Sender<Principal>) {
        self.watchers.borrow_mut().push(sink);
    }
}
