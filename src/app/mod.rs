//! # App registry
//!
//! Named [`FirebaseApp`] handles that database instances are scoped to. Only the
//! pieces the database layer needs are here: initialisation with options, lookup
//! by name, enumeration and deletion.
//!
//! ```
//! use firebase_database_compat::app::{initialize_app, get_app, FirebaseAppSettings, FirebaseOptions};
//!
//! let options = FirebaseOptions {
//!     project_id: Some("demo-project".into()),
//!     database_url: Some("https://demo-project-default-rtdb.firebaseio.com".into()),
//!     ..Default::default()
//! };
//! let settings = FirebaseAppSettings {
//!     name: Some("doc-app".into()),
//!     ..Default::default()
//! };
//! let app = initialize_app(options, Some(settings)).unwrap();
//! assert_eq!(get_app(Some("doc-app")).unwrap().name(), app.name());
//! ```
mod api;
mod constants;
mod errors;
mod logger;
mod types;

#[doc(inline)]
pub use api::{delete_app, get_app, get_apps, initialize_app, SDK_VERSION};

#[doc(inline)]
pub use constants::DEFAULT_ENTRY_NAME;

#[doc(inline)]
pub use errors::{AppError, AppResult};

#[doc(inline)]
pub use logger::LOGGER;

#[doc(inline)]
pub use types::{FirebaseApp, FirebaseAppConfig, FirebaseAppSettings, FirebaseOptions};
