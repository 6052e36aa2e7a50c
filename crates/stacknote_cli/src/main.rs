//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `stacknote_core` linkage with deterministic output.
//! - `demo` drives one session end to end against an in-memory store.

use stacknote_core::{
    BucketKey, CascadeImpact, CategoryFilter, CoreConfig, LocalIdentityProvider, NoteColor,
    NotesSession,
};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    println!("stacknote_core ping={}", stacknote_core::ping());
    println!("stacknote_core version={}", stacknote_core::core_version());

    if std::env::args().nth(1).as_deref() == Some("demo") {
        run_demo()?;
    }
    Ok(())
}

fn run_demo() -> Result<(), Box<dyn Error>> {
    let config = match std::env::var("STACKNOTE_CONFIG") {
        Ok(raw) => CoreConfig::from_json_str(&raw)?,
        Err(_) => CoreConfig::default(),
    };
    config.init_logging()?;

    let identity = LocalIdentityProvider::new();
    identity.ensure_guest();
    let mut session = NotesSession::start(config.open_store()?, &identity);
    identity.sign_in(Some("demo".to_string()));
    session.pump();

    let work = session.create_category("Work")?;
    session.pump();
    let sprint = session.create_stack(work, "Sprint")?;
    session.select_filter(CategoryFilter::Category(work));
    session.pump();
    session.pick_stack_for_new(Some(sprint));

    session.create_note("ship release", NoteColor::Red)?;
    session.create_note("write changelog", NoteColor::Green)?;
    session.pick_stack_for_new(None);
    session.create_note("book retro room", NoteColor::Yellow)?;
    session.pump();

    print_view(&session);

    let outcome = session.delete_stack(sprint, &mut |impact: &CascadeImpact| {
        println!("confirm: {}", impact.describe().replace('\n', " "));
        true
    })?;
    session.pump();
    println!("delete_stack outcome={outcome:?}");
    print_view(&session);
    Ok(())
}

fn print_view<S: stacknote_core::DocumentStore>(session: &NotesSession<S>) {
    let view = session.view();
    println!("filtered_notes={}", view.filtered_notes.len());
    for bucket in view.grouped_by_stack.iter().flatten() {
        let label = match bucket.key {
            BucketKey::Unstacked => "(no stack)".to_string(),
            BucketKey::Stack(_) => bucket.title.clone().unwrap_or_else(|| "?".to_string()),
        };
        println!("  [{label}] {} note(s)", bucket.notes.len());
        for note in &bucket.notes {
            println!("    {:<6} {}", note.color.as_str(), note.text);
        }
    }
}
