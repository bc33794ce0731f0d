//! Runs the same task-list workflow through the namespaced and the modular
//! Realtime Database APIs against the in-memory native module.
//!
//! The namespaced half logs one deprecation warning per call on the
//! `@firebase/database-compat` logger; the modular half logs nothing. Both
//! leave the database in the same state.

#![allow(deprecated)]

use firebase_database_compat::app::{initialize_app, FirebaseAppSettings, FirebaseOptions};
use firebase_database_compat::database::{
    child, get, get_database, limit_to_last, on_child_added, order_by_child, push, query,
    reference, remove, server_timestamp, set, EventType,
};
use firebase_database_compat::deprecation::LOGGER;
use serde_json::json;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let project_id = prompt("Firebase project ID", "migration-demo");

    let options = FirebaseOptions {
        project_id: Some(project_id),
        ..Default::default()
    };
    let app = initialize_app(options, Some(FirebaseAppSettings::default()))?;
    let database = get_database(Some(&app), None)?;

    // Namespaced: every call below warns once.
    let capture = LOGGER.capture();
    let legacy_tasks = database.reference("legacy/tasks")?;
    let added = legacy_tasks.on(EventType::ChildAdded, |result| {
        if let Ok(event) = result {
            println!("legacy child_added: {:?}", event.snapshot.key());
        }
    })?;
    legacy_tasks
        .push(Some(json!({ "title": "Create project", "priority": 2 })))?
        .await?;
    legacy_tasks
        .child("review")?
        .set(json!({ "title": "Review PR", "priority": 1 }))
        .await?;
    let urgent = legacy_tasks.order_by_child("priority")?.limit_to_last(1)?;
    println!("legacy urgent: {}", urgent.get().await?.val());
    added.detach();

    let warnings = capture.warnings();
    drop(capture);
    println!("namespaced calls logged {} warnings:", warnings.len());
    for warning in &warnings {
        println!("  {warning}");
    }

    // Modular: same workflow, no warnings.
    let tasks = reference(&database, "modular/tasks")?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let added = on_child_added(&tasks, move |result| {
        if let Ok(event) = result {
            captured
                .lock()
                .unwrap()
                .push(event.snapshot.key().unwrap_or("<root>").to_string());
        }
    })?;
    push(&tasks, Some(json!({ "title": "Create project", "priority": 2 })))?.await?;
    set(
        &child(&tasks, "review")?,
        json!({ "title": "Review PR", "priority": 1, "at": server_timestamp() }),
    )
    .await?;
    let urgent = query(&tasks, [order_by_child("priority"), limit_to_last(1)])?;
    println!("modular urgent: {}", get(&urgent).await?.val());
    println!("modular child_added: {:?}", seen.lock().unwrap());
    added.detach();

    remove(&reference(&database, "legacy")?).await?;
    remove(&reference(&database, "modular")?).await?;
    Ok(())
}

fn prompt(label: &str, default: &str) -> String {
    print!("{label} [{default}]: ");
    io::stdout().flush().expect("flush prompt");
    let mut buffer = String::new();
    io::stdin().read_line(&mut buffer).expect("read input");
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}
