//! Test utilities shared across the crate's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::app::{initialize_app, FirebaseApp, FirebaseAppSettings, FirebaseOptions};
use crate::database::native::RecordingNativeModule;
use crate::database::{get_database_with, Database, DatabaseSettings};

static NEXT_APP: AtomicUsize = AtomicUsize::new(1);

/// Registers a fresh app whose name starts with `prefix`, so parallel tests
/// never share database instances.
pub fn unique_app(prefix: &str) -> FirebaseApp {
    let name = format!("{prefix}-{}", NEXT_APP.fetch_add(1, Ordering::Relaxed));
    let options = FirebaseOptions {
        project_id: Some(name.clone()),
        ..Default::default()
    };
    let settings = FirebaseAppSettings {
        name: Some(name),
        ..Default::default()
    };
    initialize_app(options, Some(settings)).expect("initialize test app")
}

/// A database on its own app, bound to a recording in-memory native module.
/// Deprecation warnings are enabled regardless of the environment.
pub fn database_with(prefix: &str) -> (Database, Arc<RecordingNativeModule>) {
    let app = unique_app(prefix);
    let recording = Arc::new(RecordingNativeModule::default());
    let database = get_database_with(
        &app,
        None,
        recording.clone(),
        DatabaseSettings {
            silence_deprecation_warnings: Some(false),
        },
    )
    .expect("create test database");
    (database, recording)
}
