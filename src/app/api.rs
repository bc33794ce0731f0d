use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard};

use crate::app::constants::DEFAULT_ENTRY_NAME;
use crate::app::errors::{AppError, AppResult};
use crate::app::logger::LOGGER;
use crate::app::types::{FirebaseApp, FirebaseAppConfig, FirebaseAppSettings, FirebaseOptions};

pub static SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

static APPS: LazyLock<Mutex<HashMap<String, FirebaseApp>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn apps_guard() -> MutexGuard<'static, HashMap<String, FirebaseApp>> {
    APPS.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn normalize_name(settings: &FirebaseAppSettings) -> AppResult<String> {
    let name = settings
        .name
        .clone()
        .unwrap_or_else(|| DEFAULT_ENTRY_NAME.to_string());
    if name.trim().is_empty() {
        return Err(AppError::BadAppName { app_name: name });
    }
    Ok(name)
}

/// Creates (or returns the identical existing) app registered under the
/// settings' name.
///
/// Re-initialising a name with different options or settings fails with
/// [`AppError::DuplicateApp`].
pub fn initialize_app(
    options: FirebaseOptions,
    settings: Option<FirebaseAppSettings>,
) -> AppResult<FirebaseApp> {
    let settings = settings.unwrap_or_default();
    let name = normalize_name(&settings)?;
    if !options.is_defined() {
        return Err(AppError::NoOptions);
    }
    let automatic = settings.automatic_data_collection_enabled.unwrap_or(true);
    let config = FirebaseAppConfig::new(name.clone(), automatic);

    let mut apps = apps_guard();
    if let Some(existing) = apps.get(&name) {
        if existing.options() == &options && existing.config() == &config {
            return Ok(existing.clone());
        }
        return Err(AppError::DuplicateApp { app_name: name });
    }

    let app = FirebaseApp::new(options, config);
    apps.insert(name.clone(), app.clone());
    LOGGER.debug(format!("initialized app '{name}'"));
    Ok(app)
}

pub fn get_app(name: Option<&str>) -> AppResult<FirebaseApp> {
    let lookup = name.unwrap_or(DEFAULT_ENTRY_NAME);
    apps_guard()
        .get(lookup)
        .cloned()
        .ok_or_else(|| AppError::NoApp {
            app_name: lookup.to_string(),
        })
}

pub fn get_apps() -> Vec<FirebaseApp> {
    apps_guard().values().cloned().collect()
}

/// Removes the app from the registry and marks the handle deleted.
pub fn delete_app(app: &FirebaseApp) -> AppResult<()> {
    let removed = apps_guard().remove(app.name());
    if removed.is_some() {
        app.mark_deleted();
        crate::database::forget_app_instances(app.name());
    }
    Ok(())
}
