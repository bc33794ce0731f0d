use crate::deprecation::replacements::{lookup_replacement, Replacement};

/// Text shared by every deprecation message, whatever the module or method.
pub const DEPRECATION_PREAMBLE: &str = "namespaced API is deprecated";

/// Builds the deprecation message for `instance.method_key()` of `module`.
///
/// The output is a pure function of its inputs. `unique_message` disambiguates
/// overloads sharing one key (`on` for value and child events); `None` and an
/// empty or blank suffix produce the same message.
///
/// ```
/// use firebase_database_compat::deprecation::create_message;
///
/// let message = create_message("database", "set", "DatabaseReference", None);
/// assert!(message.starts_with("`DatabaseReference.set()` from the `database` namespaced API"));
/// assert!(message.ends_with("Please use `set()` instead."));
/// ```
pub fn create_message(
    module: &str,
    method_key: &str,
    instance: &str,
    unique_message: Option<&str>,
) -> String {
    let mut message = format!(
        "`{instance}.{method_key}()` from the `{module}` {DEPRECATION_PREAMBLE} and will be \
         removed in the next major release as part of the move to the modular API."
    );

    if let Some(Replacement::Modular(replacement)) =
        lookup_replacement(module, instance, method_key)
    {
        message.push_str(" Please use `");
        message.push_str(replacement);
        message.push_str("` instead.");
    }

    if let Some(suffix) = unique_message.map(str::trim).filter(|s| !s.is_empty()) {
        message.push(' ');
        message.push_str(suffix);
    }

    message
}
