use crate::database::error::{invalid_argument, DatabaseResult};

const FORBIDDEN_KEY_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

/// Splits a slash separated path into validated segments. Leading, trailing
/// and repeated slashes are ignored, so `""` and `"/"` both address the root.
pub(crate) fn normalize_path(path: &str) -> DatabaseResult<Vec<String>> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            validate_key(segment)?;
            Ok(segment.to_string())
        })
        .collect()
}

/// Key must be non-empty and free of `.`, `#`, `$`, `[`, `]` and ASCII control
/// characters.
pub(crate) fn validate_key(key: &str) -> DatabaseResult<()> {
    if key.is_empty() {
        return Err(invalid_argument("Database keys cannot be empty"));
    }
    if key
        .chars()
        .any(|ch| FORBIDDEN_KEY_CHARS.contains(&ch) || ch.is_ascii_control())
    {
        return Err(invalid_argument(format!(
            "Invalid database key '{key}': keys cannot contain '.', '#', '$', '[', ']' or control characters"
        )));
    }
    Ok(())
}

/// Renders segments the way `DatabaseReference::path` reports them: `/` for
/// the root, `a/b` otherwise.
pub(crate) fn join_path(segments: &[String]) -> String {
    if segments.is_empty() {
        "/".to_string()
    } else {
        segments.join("/")
    }
}

pub(crate) fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len()
        && prefix
            .iter()
            .zip(path.iter())
            .all(|(left, right)| left == right)
}

pub(crate) fn paths_related(a: &[String], b: &[String]) -> bool {
    is_prefix(a, b) || is_prefix(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_empty_segments() {
        assert_eq!(
            normalize_path("//users//ada/").unwrap(),
            vec!["users".to_string(), "ada".to_string()]
        );
        assert!(normalize_path("/").unwrap().is_empty());
        assert!(normalize_path("").unwrap().is_empty());
    }

    #[test]
    fn forbidden_characters_are_rejected() {
        for path in ["a.b", "a/#b", "$key", "a/[0]", "tab\there"] {
            let err = normalize_path(path).unwrap_err();
            assert_eq!(err.code_str(), "database/invalid-argument", "{path}");
        }
    }

    #[test]
    fn join_reports_root_as_slash() {
        assert_eq!(join_path(&[]), "/");
        assert_eq!(join_path(&["a".into(), "b".into()]), "a/b");
    }

    #[test]
    fn related_paths() {
        let parent = vec!["a".to_string()];
        let child = vec!["a".to_string(), "b".to_string()];
        let sibling = vec!["c".to_string()];
        assert!(paths_related(&parent, &child));
        assert!(paths_related(&child, &parent));
        assert!(!paths_related(&child, &sibling));
    }
}
