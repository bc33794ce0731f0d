//! Assertions that a namespaced call warns exactly once and its modular
//! counterpart stays silent.
//!
//! ```
//! use firebase_database_compat::deprecation::{create_deprecation_checker, DeprecationEmitter};
//!
//! let emitter = DeprecationEmitter::new("database").with_silenced(false);
//! let checker = create_deprecation_checker(&["database", "DatabaseReference"]);
//!
//! checker.check_method(
//!     || {},
//!     || {
//!         emitter.warn("DatabaseReference", "remove");
//!     },
//!     "remove",
//! );
//! ```

use std::fmt;

use crate::deprecation::message::{create_message, DEPRECATION_PREAMBLE};
use crate::deprecation::replacements::DATABASE_INSTANCE;
use crate::deprecation::LOGGER;
use crate::logger::Logger;

/// Optional inputs of a single check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Suffix the legacy call is expected to append to its message, for
    /// overloads sharing one method key. Defaults to `None`: the plain message.
    pub unique_message: Option<String>,
}

impl CheckOptions {
    pub fn with_unique_message(message: impl Into<String>) -> Self {
        Self {
            unique_message: Some(message.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeprecationCheckError {
    /// The modular call logged at least one warning.
    ModularCallWarned { method: String, warnings: Vec<String> },
    /// The legacy call logged zero or several warnings.
    LegacyWarningCount {
        method: String,
        expected: String,
        warnings: Vec<String>,
    },
    /// A warning logged by the legacy call does not contain the expected text.
    MessageMismatch {
        method: String,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for DeprecationCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeprecationCheckError::ModularCallWarned { method, warnings } => write!(
                f,
                "modular call for `{method}` logged {} warning(s), expected none: {warnings:?}",
                warnings.len()
            ),
            DeprecationCheckError::LegacyWarningCount {
                method,
                expected,
                warnings,
            } => write!(
                f,
                "namespaced call `{method}` logged {} warning(s), expected exactly one \
                 matching {expected:?}: {warnings:?}",
                warnings.len()
            ),
            DeprecationCheckError::MessageMismatch {
                method,
                expected,
                actual,
            } => write!(
                f,
                "namespaced call `{method}` warned {actual:?}, expected it to contain {expected:?}"
            ),
        }
    }
}

impl std::error::Error for DeprecationCheckError {}

/// Checks call pairs for one module/instance combination.
#[derive(Clone, Debug)]
pub struct DeprecationChecker {
    module: String,
    instance: String,
    logger: Logger,
}

/// Builds a checker from `[module]` or `[module, instance]`; the instance
/// defaults to `"default"`.
///
/// # Panics
/// When `module_names` is empty.
pub fn create_deprecation_checker(module_names: &[&str]) -> DeprecationChecker {
    let module = module_names
        .first()
        .copied()
        .expect("create_deprecation_checker needs at least a module name");
    let instance = module_names.get(1).copied().unwrap_or(DATABASE_INSTANCE);
    DeprecationChecker::new(module, instance)
}

impl DeprecationChecker {
    pub fn new(module: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            instance: instance.into(),
            logger: LOGGER.clone(),
        }
    }

    /// Watches `logger` instead of the shared deprecation logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn expected_message(&self, method_key: &str, options: &CheckOptions) -> String {
        create_message(
            &self.module,
            method_key,
            &self.instance,
            options.unique_message.as_deref(),
        )
    }

    /// Runs both calls and reports the first broken expectation.
    pub fn verify<M, L, A, B>(
        &self,
        modular: M,
        legacy: L,
        method_key: &str,
        options: &CheckOptions,
    ) -> Result<(), DeprecationCheckError>
    where
        M: FnOnce() -> A,
        L: FnOnce() -> B,
    {
        let expected = self.expected_message(method_key, options);
        run_check(&self.logger, modular, legacy, method_key, &expected)
    }

    /// Panicking form of [`verify`](Self::verify), for use inside tests.
    #[track_caller]
    pub fn check<M, L, A, B>(&self, modular: M, legacy: L, method_key: &str, options: CheckOptions)
    where
        M: FnOnce() -> A,
        L: FnOnce() -> B,
    {
        if let Err(err) = self.verify(modular, legacy, method_key, &options) {
            panic!("{err}");
        }
    }

    #[track_caller]
    pub fn check_method<M, L, A, B>(&self, modular: M, legacy: L, method_key: &str)
    where
        M: FnOnce() -> A,
        L: FnOnce() -> B,
    {
        self.check(modular, legacy, method_key, CheckOptions::default());
    }
}

/// Checks a call pair against the shared preamble only, on the shared
/// deprecation logger.
#[track_caller]
pub fn check_deprecation<M, L, A, B>(modular: M, legacy: L)
where
    M: FnOnce() -> A,
    L: FnOnce() -> B,
{
    if let Err(err) = verify_deprecation(modular, legacy) {
        panic!("{err}");
    }
}

pub fn verify_deprecation<M, L, A, B>(modular: M, legacy: L) -> Result<(), DeprecationCheckError>
where
    M: FnOnce() -> A,
    L: FnOnce() -> B,
{
    run_check(&LOGGER, modular, legacy, "<any>", DEPRECATION_PREAMBLE)
}

fn run_check<M, L, A, B>(
    logger: &Logger,
    modular: M,
    legacy: L,
    method: &str,
    expected: &str,
) -> Result<(), DeprecationCheckError>
where
    M: FnOnce() -> A,
    L: FnOnce() -> B,
{
    // Each phase gets a fresh capture; dropping it restores the logger even if
    // the call under test panics.
    let warnings = {
        let capture = logger.capture();
        let _ = modular();
        capture.warnings()
    };
    if !warnings.is_empty() {
        return Err(DeprecationCheckError::ModularCallWarned {
            method: method.to_owned(),
            warnings,
        });
    }

    let warnings = {
        let capture = logger.capture();
        let _ = legacy();
        capture.warnings()
    };
    if let Some(actual) = warnings.iter().find(|warning| !warning.contains(expected)) {
        return Err(DeprecationCheckError::MessageMismatch {
            method: method.to_owned(),
            expected: expected.to_owned(),
            actual: actual.clone(),
        });
    }
    if warnings.len() != 1 {
        return Err(DeprecationCheckError::LegacyWarningCount {
            method: method.to_owned(),
            expected: expected.to_owned(),
            warnings,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deprecation::DeprecationEmitter;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn fixture(name: &str) -> (Logger, DeprecationEmitter, DeprecationChecker) {
        let logger = Logger::new(name);
        let emitter = DeprecationEmitter::new("database")
            .with_logger(logger.clone())
            .with_silenced(false);
        let checker =
            create_deprecation_checker(&["database", "DatabaseReference"]).with_logger(logger.clone());
        (logger, emitter, checker)
    }

    #[test]
    fn passing_pair_verifies() {
        let (_, emitter, checker) = fixture("@firebase/checker-pass");
        let result = checker.verify(
            || {},
            || emitter.warn("DatabaseReference", "push"),
            "push",
            &CheckOptions::default(),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn warning_modular_call_is_reported() {
        let (_, emitter, checker) = fixture("@firebase/checker-modular");
        let err = checker
            .verify(
                || emitter.warn("DatabaseReference", "push"),
                || emitter.warn("DatabaseReference", "push"),
                "push",
                &CheckOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, DeprecationCheckError::ModularCallWarned { .. }));
    }

    #[test]
    fn silent_and_repeated_legacy_calls_are_reported() {
        let (_, emitter, checker) = fixture("@firebase/checker-count");
        let silent = checker
            .verify(|| {}, || {}, "push", &CheckOptions::default())
            .unwrap_err();
        assert!(matches!(
            silent,
            DeprecationCheckError::LegacyWarningCount { ref warnings, .. } if warnings.is_empty()
        ));

        let twice = checker
            .verify(
                || {},
                || {
                    emitter.warn("DatabaseReference", "push");
                    emitter.warn("DatabaseReference", "push");
                },
                "push",
                &CheckOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(
            twice,
            DeprecationCheckError::LegacyWarningCount { ref warnings, .. } if warnings.len() == 2
        ));
    }

    #[test]
    fn wrong_method_is_a_mismatch() {
        let (_, emitter, checker) = fixture("@firebase/checker-mismatch");
        let err = checker
            .verify(
                || {},
                || emitter.warn("DatabaseReference", "remove"),
                "push",
                &CheckOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, DeprecationCheckError::MessageMismatch { .. }));
    }

    #[test]
    fn unique_message_must_match() {
        let (_, emitter, checker) = fixture("@firebase/checker-unique");
        let options = CheckOptions::with_unique_message("overload A");
        assert!(checker
            .verify(
                || {},
                || emitter.warn_with("DatabaseReference", "set", "overload A"),
                "set",
                &options,
            )
            .is_ok());
        assert!(checker
            .verify(
                || {},
                || emitter.warn_with("DatabaseReference", "set", "overload B"),
                "set",
                &options,
            )
            .is_err());
    }

    #[test]
    fn repeated_runs_agree() {
        let (_, emitter, checker) = fixture("@firebase/checker-idempotent");
        for _ in 0..2 {
            checker.check_method(|| {}, || emitter.warn("DatabaseReference", "child"), "child");
        }
    }

    #[test]
    fn logger_is_restored_after_a_panicking_call() {
        let (logger, _, checker) = fixture("@firebase/checker-panic");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            checker.check_method(|| {}, || panic!("legacy call blew up"), "child");
        }));
        assert!(outcome.is_err());

        let capture = logger.capture();
        logger.warn("visible again");
        assert_eq!(capture.warnings(), vec!["visible again".to_string()]);
        drop(capture);

        let hits = std::sync::Arc::new(std::sync::Mutex::new(0));
        let counter = hits.clone();
        logger.set_log_handler(move |_, _, _| *counter.lock().unwrap() += 1);
        logger.warn("reaches the shared handler");
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    #[should_panic(expected = "expected exactly one")]
    fn check_panics_with_the_failure() {
        let (_, _, checker) = fixture("@firebase/checker-panics");
        checker.check_method(|| {}, || {}, "set");
    }

    #[test]
    fn fixed_message_variant_matches_preamble() {
        let emitter = DeprecationEmitter::new("database").with_silenced(false);
        assert!(verify_deprecation(|| {}, || emitter.warn("default", "go_online")).is_ok());
        assert!(verify_deprecation(|| {}, || LOGGER.warn("something else")).is_err());
    }
}
