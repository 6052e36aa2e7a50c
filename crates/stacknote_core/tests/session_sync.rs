mod common;

use common::{fields, signed_in_session, FlakyStore};
use serde_json::json;
use stacknote_core::store::{Collection, DocRef, DocumentStore, SqliteDocumentStore};
use stacknote_core::{
    Access, BucketKey, CategoryFilter, LocalIdentityProvider, MutationEngine, NoteColor, NoteMenu,
    NotesSession, Principal, QueryKey, SessionNotice,
};
use std::rc::Rc;
use uuid::Uuid;

#[test]
fn guest_principal_has_no_subscriptions() {
    let store = Rc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let identity = LocalIdentityProvider::new();
    identity.ensure_guest();

    let mut session = NotesSession::start(Rc::clone(&store), &identity);
    session.pump();

    assert_eq!(session.access(), Access::NoAccess);
    assert_eq!(store.listener_count(), 0);
    assert!(session.drain_notices().contains(&SessionNotice::SignInRequired));
    assert!(matches!(
        session.create_category("Work"),
        Err(stacknote_core::MutationError::NoAccess)
    ));
}

#[test]
fn signing_in_opens_categories_and_notes() {
    let (store, _identity, session) = signed_in_session();

    assert!(matches!(session.access(), Access::Granted(_)));
    assert!(session.is_subscribed(QueryKey::Categories));
    assert!(session.is_subscribed(QueryKey::Notes));
    assert!(!session.is_subscribed(QueryKey::FilterStacks));
    assert!(!session.is_subscribed(QueryKey::CreationStacks));
    assert_eq!(store.listener_count(), 2);
    assert!(!session.notes().is_loading());
}

#[test]
fn sign_in_keeps_guest_owner_id() {
    let store = Rc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let identity = LocalIdentityProvider::new();
    let guest = identity.ensure_guest();
    let mut session = NotesSession::start(Rc::clone(&store), &identity);

    identity.sign_in(None);
    session.pump();
    assert_eq!(session.access(), Access::Granted(guest));
}

#[test]
fn sign_out_closes_everything_and_discards_queued_snapshots() {
    let (store, identity, mut session) = signed_in_session();
    let owner = session.access().owner().unwrap();
    let category = session.create_category("Work").unwrap();
    session.pump();
    assert!(session.select_filter(CategoryFilter::Category(category)));
    session.pump();
    assert_eq!(store.listener_count(), 4);

    // Queued but not pumped before the identity change.
    store
        .create(Collection::Notes, owner, fields(json!({"text": "late"})))
        .unwrap();
    identity.sign_out();
    session.pump();

    assert_eq!(session.access(), Access::NoAccess);
    assert_eq!(store.listener_count(), 0);
    assert!(session.notes().is_empty());
    assert!(session.categories().is_empty());
    assert_eq!(session.filter(), CategoryFilter::All);
    assert_eq!(session.creation_category(), None);
}

#[test]
fn switching_principal_reopens_for_new_owner_only() {
    let (store, identity, mut session) = signed_in_session();
    session.create_category("first owner").unwrap();
    session.pump();
    assert_eq!(session.categories().len(), 1);

    identity.sign_out();
    identity.sign_in(Some("second".to_string()));
    session.pump();

    assert!(matches!(session.access(), Access::Granted(_)));
    assert!(session.categories().is_empty());
    assert_eq!(store.listener_count(), 2);
}

#[test]
fn repeated_filter_selection_keeps_a_single_handle_per_key() {
    let (store, _identity, mut session) = signed_in_session();
    let work = session.create_category("Work").unwrap();
    let home = session.create_category("Home").unwrap();
    session.pump();

    for filter in [work, work, home, work] {
        session.select_filter(CategoryFilter::Category(filter));
        session.pump();
    }
    assert_eq!(store.listener_count(), 4);

    session.select_filter(CategoryFilter::All);
    session.pump();
    assert_eq!(store.listener_count(), 2);
    assert!(session.filter_stacks().is_empty());
}

#[test]
fn rescoped_stacks_never_show_the_previous_category() {
    let (_store, _identity, mut session) = signed_in_session();
    let work = session.create_category("Work").unwrap();
    let home = session.create_category("Home").unwrap();
    session.create_stack(work, "Sprint").unwrap();
    session.pump();

    session.select_filter(CategoryFilter::Category(work));
    session.pump();
    assert_eq!(session.filter_stacks().len(), 1);

    session.select_filter(CategoryFilter::Category(home));
    assert!(session.filter_stacks().is_loading());
    assert!(session.filter_stacks().is_empty());
    session.pump();
    assert!(!session.filter_stacks().is_loading());
    assert!(session.filter_stacks().is_empty());
}

#[test]
fn scenario_a_grouping_through_the_session() {
    let (_store, _identity, mut session) = signed_in_session();
    let work = session.create_category("Work").unwrap();
    session.pump();
    let sprint1 = session.create_stack(work, "Sprint1").unwrap();
    let sprint2 = session.create_stack(work, "Sprint2").unwrap();
    session.select_filter(CategoryFilter::Category(work));
    session.pump();

    assert!(session.pick_stack_for_new(Some(sprint1)));
    let n1 = session.create_note("n1", NoteColor::Green).unwrap();
    let n2 = session.create_note("n2", NoteColor::Green).unwrap();
    assert!(session.pick_stack_for_new(Some(sprint2)));
    let n3 = session.create_note("n3", NoteColor::Green).unwrap();
    assert!(session.pick_stack_for_new(None));
    let n4 = session.create_note("n4", NoteColor::Green).unwrap();
    session.pump();

    let view = session.view();
    let buckets = view.grouped_by_stack.unwrap();
    let keys: Vec<BucketKey> = buckets.iter().map(|bucket| bucket.key).collect();
    assert_eq!(
        keys,
        vec![
            BucketKey::Unstacked,
            BucketKey::Stack(sprint1),
            BucketKey::Stack(sprint2)
        ]
    );
    let ids = |index: usize| -> Vec<Uuid> { buckets[index].notes.iter().map(|n| n.id).collect() };
    assert_eq!(ids(0), vec![n4]);
    // Same color: newest first.
    assert_eq!(ids(1), vec![n2, n1]);
    assert_eq!(ids(2), vec![n3]);
    assert_eq!(view.filtered_notes.len(), 4);
}

#[test]
fn stacks_get_sibling_count_as_order() {
    let (store, _identity, mut session) = signed_in_session();
    let owner = session.access().owner().unwrap();
    let work = session.create_category("Work").unwrap();
    session.pump();
    let home = session.create_category("Home").unwrap();
    session.pump();
    assert_eq!(
        session.categories().items().iter().map(|c| c.order).collect::<Vec<_>>(),
        vec![0, 1]
    );

    session.select_filter(CategoryFilter::Category(work));
    session.pump();
    session.create_stack(work, "a").unwrap();
    session.pump();
    session.create_stack(work, "b").unwrap();
    // Home is not covered by any held slice; its count comes from a read.
    session.create_stack(home, "c").unwrap();
    session.create_stack(home, "d").unwrap();
    session.pump();

    assert_eq!(
        session.filter_stacks().items().iter().map(|s| s.order).collect::<Vec<_>>(),
        vec![0, 1]
    );
    let home_orders: Vec<i64> = store
        .read(
            &stacknote_core::store::DocQuery::owned(Collection::Stacks, owner)
                .where_eq(stacknote_core::store::RefField::CategoryId, home),
        )
        .unwrap()
        .iter()
        .map(|doc| doc.fields["order"].as_i64().unwrap())
        .collect();
    let mut sorted = home_orders.clone();
    sorted.sort();
    assert_eq!(sorted, vec![0, 1]);
}

#[test]
fn selection_memory_prefills_stack_per_category() {
    let (_store, _identity, mut session) = signed_in_session();
    let work = session.create_category("Work").unwrap();
    let home = session.create_category("Home").unwrap();
    let sprint = session.create_stack(work, "Sprint").unwrap();
    session.pump();

    session.select_filter(CategoryFilter::Category(work));
    session.pump();
    assert!(session.pick_stack_for_new(Some(sprint)));

    session.select_filter(CategoryFilter::Category(home));
    session.pump();
    assert_eq!(session.selected_stack(), None);

    session.select_filter(CategoryFilter::Category(work));
    session.pump();
    assert_eq!(session.selected_stack(), Some(sprint));

    session.select_filter(CategoryFilter::All);
    assert_eq!(session.creation_category(), None);
    assert_eq!(session.selected_stack(), None);
}

#[test]
fn picking_a_stack_outside_the_creation_category_is_refused() {
    let (_store, _identity, mut session) = signed_in_session();
    let work = session.create_category("Work").unwrap();
    let home = session.create_category("Home").unwrap();
    let foreign = session.create_stack(home, "Elsewhere").unwrap();
    session.pump();

    session.set_creation_category(Some(work));
    session.pump();
    assert!(!session.pick_stack_for_new(Some(foreign)));
    assert_eq!(session.selected_stack(), None);
}

#[test]
fn remembered_stack_is_dropped_when_missing_from_snapshot() {
    let (store, _identity, mut session) = signed_in_session();
    let owner = session.access().owner().unwrap();
    let work = session.create_category("Work").unwrap();
    let sprint = session.create_stack(work, "Sprint").unwrap();
    session.pump();
    session.set_creation_category(Some(work));
    session.pump();
    assert!(session.pick_stack_for_new(Some(sprint)));

    // Removed by another session, bypassing this session's cascade.
    store
        .delete(&DocRef::new(Collection::Stacks, sprint, owner))
        .unwrap();
    session.pump();
    assert_eq!(session.selected_stack(), None);
}

#[test]
fn remembered_stack_waits_for_the_snapshot_of_the_reselected_category() {
    let (store, _identity, mut session) = signed_in_session();
    let owner = session.access().owner().unwrap();
    let work = session.create_category("Work").unwrap();
    let home = session.create_category("Home").unwrap();
    let sprint = session.create_stack(home, "Sprint").unwrap();
    session.pump();
    session.set_creation_category(Some(home));
    session.pump();
    assert!(session.pick_stack_for_new(Some(sprint)));

    // Another device removes the stack; selection memory still names it.
    store
        .delete(&DocRef::new(Collection::Stacks, sprint, owner))
        .unwrap();
    session.pump();
    session.set_creation_category(Some(work));
    session.pump();

    assert!(session.set_creation_category(Some(home)));
    assert_eq!(session.selected_stack(), None);
    let note = session.create_note("before snapshot", NoteColor::Green).unwrap();

    let stored = store
        .get(&DocRef::new(Collection::Notes, note, owner))
        .unwrap()
        .unwrap();
    assert_eq!(stored["categoryId"], json!(home.to_string()));
    assert!(!stored.contains_key("stackId"));
}

#[test]
fn remembered_stack_returns_with_the_snapshot() {
    let (_store, _identity, mut session) = signed_in_session();
    let work = session.create_category("Work").unwrap();
    let home = session.create_category("Home").unwrap();
    let sprint = session.create_stack(work, "Sprint").unwrap();
    session.pump();
    session.set_creation_category(Some(work));
    session.pump();
    assert!(session.pick_stack_for_new(Some(sprint)));

    session.set_creation_category(Some(home));
    session.pump();
    session.set_creation_category(Some(work));
    assert_eq!(session.selected_stack(), None);
    session.pump();
    assert_eq!(session.selected_stack(), Some(sprint));

    // Re-selecting the current category keeps the pick.
    session.set_creation_category(Some(work));
    assert_eq!(session.selected_stack(), Some(sprint));
}

#[test]
fn unknown_categories_cannot_be_selected() {
    let (store, _identity, mut session) = signed_in_session();
    let work = session.create_category("Work").unwrap();
    session.pump();
    assert!(session.select_filter(CategoryFilter::Category(work)));
    session.pump();

    let missing = Uuid::new_v4();
    assert!(!session.select_filter(CategoryFilter::Category(missing)));
    assert!(!session.set_creation_category(Some(missing)));
    assert_eq!(session.filter(), CategoryFilter::Category(work));
    assert_eq!(session.creation_category(), Some(work));

    // Another owner's category is just as unknown to this session.
    let stranger = MutationEngine::new(&*store, Uuid::new_v4());
    let foreign = stranger.create_category("Theirs", 0).unwrap();
    session.pump();
    assert!(!session.set_creation_category(Some(foreign)));
    assert_eq!(session.creation_category(), Some(work));
    assert_eq!(store.listener_count(), 4);

    assert!(session.set_creation_category(None));
    assert!(session.select_filter(CategoryFilter::All));
}

#[test]
fn filter_resets_when_category_disappears_remotely() {
    let (store, _identity, mut session) = signed_in_session();
    let owner = session.access().owner().unwrap();
    let work = session.create_category("Work").unwrap();
    session.pump();
    session.select_filter(CategoryFilter::Category(work));
    session.pump();

    store
        .delete(&DocRef::new(Collection::Categories, work, owner))
        .unwrap();
    session.pump();

    assert_eq!(session.filter(), CategoryFilter::All);
    assert_eq!(session.creation_category(), None);
    assert!(!session.is_subscribed(QueryKey::FilterStacks));
    assert!(!session.is_subscribed(QueryKey::CreationStacks));
}

#[test]
fn note_draft_without_category_ignores_stack() {
    let (_store, _identity, mut session) = signed_in_session();
    session.create_note("loose", NoteColor::Yellow).unwrap();
    session.pump();

    let note = &session.notes().items()[0];
    assert_eq!(note.category_id, None);
    assert_eq!(note.stack_id, None);
    assert_eq!(note.color, NoteColor::Yellow);
}

#[test]
fn blank_input_is_rejected_without_writes() {
    let (_store, _identity, mut session) = signed_in_session();
    assert!(session.create_category("   ").is_err());
    assert!(session.create_note("\n\t", NoteColor::Green).is_err());
    let note = session.create_note("keep", NoteColor::Green).unwrap();
    assert!(session.update_note_text(note, "  ").is_err());
    session.pump();

    assert!(session.categories().is_empty());
    assert_eq!(session.notes().len(), 1);
    assert_eq!(session.notes().items()[0].text, "keep");
}

#[test]
fn notes_are_ordered_by_color_then_newest() {
    let (_store, _identity, mut session) = signed_in_session();
    let red = session.create_note("red", NoteColor::Red).unwrap();
    let green_old = session.create_note("green old", NoteColor::Green).unwrap();
    let yellow = session.create_note("yellow", NoteColor::Yellow).unwrap();
    let green_new = session.create_note("green new", NoteColor::Green).unwrap();
    session.pump();

    let order: Vec<Uuid> = session.notes().items().iter().map(|note| note.id).collect();
    assert_eq!(order, vec![green_new, green_old, yellow, red]);
}

#[test]
fn ui_flags_follow_mutations() {
    let (_store, _identity, mut session) = signed_in_session();
    let note = session.create_note("draft", NoteColor::Green).unwrap();
    session.pump();

    session.ui_mut().toggle_edit(note);
    session.update_note_text(note, "final").unwrap();
    assert!(!session.ui().is_editing(note));

    session.ui_mut().toggle_menu(note, NoteMenu::Color);
    session.update_note_color(note, NoteColor::Red).unwrap();
    assert_eq!(session.ui().open_menu(), None);

    session.ui_mut().toggle_edit(note);
    session.delete_note(note).unwrap();
    session.pump();
    assert!(!session.ui().is_editing(note));
    assert!(session.notes().is_empty());
}

#[test]
fn subscription_failure_clears_slice_and_raises_notice() {
    let identity = LocalIdentityProvider::with_principal(Principal::Full {
        uid: Uuid::new_v4(),
        display_name: None,
    });
    let mut session = NotesSession::start(Rc::new(FlakyStore::new()), &identity);
    session.create_note("visible", NoteColor::Green).unwrap();
    session.pump();
    assert_eq!(session.notes().len(), 1);
    session.drain_notices();

    session.store().break_listeners(Collection::Notes);
    session.pump();

    assert!(session.notes().is_empty());
    assert!(!session.notes().is_loading());
    assert!(!session.is_subscribed(QueryKey::Notes));
    assert!(session.is_subscribed(QueryKey::Categories));
    let notices = session.drain_notices();
    assert!(matches!(
        notices.as_slice(),
        [SessionNotice::SubscriptionFailed { key: QueryKey::Notes, .. }]
    ));
}

#[test]
fn undecodable_documents_are_skipped_with_notice() {
    let (store, _identity, mut session) = signed_in_session();
    let owner = session.access().owner().unwrap();
    session.drain_notices();

    store
        .import_document(
            Collection::Notes,
            "not-a-uuid",
            &owner.to_string(),
            fields(json!({"text": "legacy"})),
            None,
        )
        .unwrap();
    store
        .import_document(
            Collection::Notes,
            &Uuid::new_v4().to_string(),
            &owner.to_string(),
            fields(json!({"text": "pending timestamp", "color": "purple"})),
            None,
        )
        .unwrap();
    session.pump();

    assert_eq!(session.notes().len(), 1);
    assert_eq!(session.notes().items()[0].color, NoteColor::Green);
    assert!(session
        .drain_notices()
        .iter()
        .any(|notice| matches!(notice, SessionNotice::DocumentsSkipped { key: QueryKey::Notes, skipped } if skipped.len() == 1)));
}

#[test]
fn close_releases_every_handle() {
    let (store, _identity, mut session) = signed_in_session();
    let work = session.create_category("Work").unwrap();
    session.pump();
    session.select_filter(CategoryFilter::Category(work));
    session.pump();

    session.close();
    assert_eq!(store.listener_count(), 0);
    assert_eq!(session.access(), Access::Pending);
}

#[test]
fn dropping_the_session_releases_handles() {
    let (store, _identity, session) = signed_in_session();
    assert_eq!(store.listener_count(), 2);
    drop(session);
    assert_eq!(store.listener_count(), 0);
}
