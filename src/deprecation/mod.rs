//! # Deprecation tracking
//!
//! Every namespaced (legacy) method logs one warning through a
//! [`DeprecationEmitter`] before forwarding to the shared implementation;
//! modular functions skip the emitter. The message comes from
//! [`create_message`] and names the module, the instance and the method, plus
//! the modular replacement registered in [`replacements`].
//!
//! [`checker`] holds the assertions used by tests to prove the contract for a
//! pair of equivalent calls.

pub mod checker;
mod emitter;
mod message;
pub mod replacements;

use std::sync::LazyLock;

use crate::logger::Logger;

/// Channel every deprecation warning is written to.
pub static LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@firebase/database-compat"));

#[doc(inline)]
pub use checker::{
    check_deprecation, create_deprecation_checker, verify_deprecation, CheckOptions,
    DeprecationCheckError, DeprecationChecker,
};

#[doc(inline)]
pub use emitter::{silenced_by_env, DeprecationEmitter, SILENCE_ENV_VAR};

#[doc(inline)]
pub use message::{create_message, DEPRECATION_PREAMBLE};

#[doc(inline)]
pub use replacements::{deprecated_methods, lookup_replacement, Replacement};
