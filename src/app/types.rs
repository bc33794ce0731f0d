use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app::errors::{AppError, AppResult};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirebaseOptions {
    pub api_key: Option<String>,
    pub app_id: Option<String>,
    pub database_url: Option<String>,
    pub project_id: Option<String>,
}

impl FirebaseOptions {
    pub(crate) fn is_defined(&self) -> bool {
        self.api_key.is_some()
            || self.app_id.is_some()
            || self.database_url.is_some()
            || self.project_id.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FirebaseAppSettings {
    /// Registry name; `None` selects [`DEFAULT_ENTRY_NAME`](crate::app::DEFAULT_ENTRY_NAME).
    pub name: Option<String>,
    /// Defaults to `true`.
    pub automatic_data_collection_enabled: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirebaseAppConfig {
    pub name: Arc<str>,
    pub automatic_data_collection_enabled: bool,
}

impl FirebaseAppConfig {
    pub fn new(name: impl Into<String>, automatic: bool) -> Self {
        Self {
            name: Arc::from(name.into()),
            automatic_data_collection_enabled: automatic,
        }
    }
}

#[derive(Clone)]
pub struct FirebaseApp {
    inner: Arc<FirebaseAppInner>,
}

struct FirebaseAppInner {
    options: FirebaseOptions,
    config: FirebaseAppConfig,
    is_deleted: AtomicBool,
}

impl FirebaseApp {
    pub(crate) fn new(options: FirebaseOptions, config: FirebaseAppConfig) -> Self {
        Self {
            inner: Arc::new(FirebaseAppInner {
                options,
                config,
                is_deleted: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn options(&self) -> &FirebaseOptions {
        &self.inner.options
    }

    pub fn config(&self) -> &FirebaseAppConfig {
        &self.inner.config
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.is_deleted.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_deleted(&self) {
        self.inner.is_deleted.store(true, Ordering::SeqCst);
    }

    pub fn check_destroyed(&self) -> AppResult<()> {
        if self.is_deleted() {
            return Err(AppError::AppDeleted {
                app_name: self.name().to_owned(),
            });
        }
        Ok(())
    }
}

impl PartialEq for FirebaseApp {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FirebaseApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseApp")
            .field("name", &self.name())
            .field("options", self.options())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
