use std::env;

use crate::deprecation::message::create_message;
use crate::deprecation::replacements::lookup_replacement;
use crate::deprecation::LOGGER;
use crate::logger::Logger;

/// Environment variable that silences every deprecation warning when set to
/// `1`, `true` or `yes`.
pub const SILENCE_ENV_VAR: &str = "FIREBASE_SILENCE_MODULAR_DEPRECATION_WARNINGS";

/// Reads [`SILENCE_ENV_VAR`].
pub fn silenced_by_env() -> bool {
    env::var(SILENCE_ENV_VAR)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            )
        })
        .unwrap_or(false)
}

/// Writes the deprecation warning for one namespaced call.
///
/// Each legacy method calls [`warn`](Self::warn) exactly once, synchronously,
/// before doing any work, so the warning is logged even if the returned future
/// is never polled.
#[derive(Clone, Debug)]
pub struct DeprecationEmitter {
    module: &'static str,
    logger: Logger,
    silenced: bool,
}

impl DeprecationEmitter {
    /// Emitter for `module` on the shared deprecation logger; silenced when
    /// [`SILENCE_ENV_VAR`] says so.
    pub fn new(module: &'static str) -> Self {
        Self {
            module,
            logger: LOGGER.clone(),
            silenced: silenced_by_env(),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_silenced(mut self, silenced: bool) -> Self {
        self.silenced = silenced;
        self
    }

    pub fn module(&self) -> &'static str {
        self.module
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced
    }

    /// Logs the warning for `instance.method()`. Returns whether a warning was
    /// written.
    pub fn warn(&self, instance: &str, method: &str) -> bool {
        self.emit(instance, method, None)
    }

    /// Like [`warn`](Self::warn), with a suffix naming the overload that was
    /// called.
    pub fn warn_with(&self, instance: &str, method: &str, unique_message: &str) -> bool {
        self.emit(instance, method, Some(unique_message))
    }

    fn emit(&self, instance: &str, method: &str, unique_message: Option<&str>) -> bool {
        if self.silenced {
            return false;
        }
        if lookup_replacement(self.module, instance, method).is_none() {
            self.logger.debug(format!(
                "{}.{instance}.{method} is not registered as deprecated",
                self.module
            ));
            return false;
        }
        self.logger
            .warn(create_message(self.module, method, instance, unique_message));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deprecation::replacements::{DATABASE_MODULE, REFERENCE_INSTANCE};
    use crate::logger::LogLevel;

    #[test]
    fn registered_method_warns_once() {
        let logger = Logger::new("@firebase/emitter-test");
        let emitter = DeprecationEmitter::new(DATABASE_MODULE)
            .with_logger(logger.clone())
            .with_silenced(false);
        let capture = logger.capture();

        assert!(emitter.warn(REFERENCE_INSTANCE, "set"));

        assert_eq!(
            capture.warnings(),
            vec![create_message(DATABASE_MODULE, "set", REFERENCE_INSTANCE, None)]
        );
    }

    #[test]
    fn silenced_emitter_writes_nothing() {
        let logger = Logger::new("@firebase/emitter-silenced");
        let emitter = DeprecationEmitter::new(DATABASE_MODULE)
            .with_logger(logger.clone())
            .with_silenced(true);
        let capture = logger.capture();

        assert!(!emitter.warn(REFERENCE_INSTANCE, "set"));
        assert!(capture.is_empty());
    }

    #[test]
    fn unregistered_method_only_logs_debug() {
        let logger = Logger::new("@firebase/emitter-unknown");
        let emitter = DeprecationEmitter::new(DATABASE_MODULE)
            .with_logger(logger.clone())
            .with_silenced(false);
        let capture = logger.capture();

        assert!(!emitter.warn(REFERENCE_INSTANCE, "not_a_method"));
        assert!(capture.warnings().is_empty());
        assert_eq!(capture.messages(LogLevel::Debug).len(), 1);
    }

    #[test]
    fn suffix_reaches_the_message() {
        let logger = Logger::new("@firebase/emitter-suffix");
        let emitter = DeprecationEmitter::new(DATABASE_MODULE)
            .with_logger(logger.clone())
            .with_silenced(false);
        let capture = logger.capture();

        emitter.warn_with("DatabaseQuery", "on", "Use `on_child_removed()`.");

        let warnings = capture.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].ends_with("Use `on_child_removed()`."));
    }
}
