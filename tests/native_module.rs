//! Swapping the process-wide native module. Kept in its own test binary since
//! installation affects every `get_database` call in the process.

use std::sync::Arc;

use firebase_database_compat::app::{initialize_app, FirebaseApp, FirebaseAppSettings, FirebaseOptions};
use firebase_database_compat::database::native::{
    default_memory_module, install_native_module, reset_native_module, NativeCall, NativeTarget,
    RecordingNativeModule,
};
use firebase_database_compat::database::{get_database, reference, set, Database};
use futures::executor::block_on;
use serde_json::json;

fn app(name: &str) -> FirebaseApp {
    initialize_app(
        FirebaseOptions {
            project_id: Some(name.into()),
            ..Default::default()
        },
        Some(FirebaseAppSettings {
            name: Some(name.into()),
            ..Default::default()
        }),
    )
    .expect("initialize app")
}

fn target(database: &Database) -> NativeTarget {
    NativeTarget {
        app_name: database.app().name().to_string(),
        database_url: database.url().to_string(),
    }
}

#[test]
fn databases_bind_the_module_installed_at_creation() {
    let recording = Arc::new(RecordingNativeModule::default());
    install_native_module(recording.clone());
    let recorded = get_database(Some(&app("native-installed")), None).unwrap();
    reset_native_module();
    let fallback = get_database(Some(&app("native-default")), None).unwrap();

    block_on(set(&reference(&recorded, "a").unwrap(), json!(1))).unwrap();
    block_on(set(&reference(&fallback, "b").unwrap(), json!(2))).unwrap();

    assert!(matches!(
        recording.calls().as_slice(),
        [NativeCall::Write { path, .. }] if path == "a"
    ));
    let shared = default_memory_module();
    assert_eq!(shared.value(&target(&fallback), &["b".to_string()]), json!(2));
    assert_eq!(shared.value(&target(&recorded), &["a".to_string()]), json!(null));
}
