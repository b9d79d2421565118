//! Field-level request validation shared by the request handlers.
//! Every check returns `AppError::Validation` naming the offending field.

use crate::errors::AppError;

/// Required string whose trimmed length (in characters) lies in `min..=max`.
pub fn require_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), AppError> {
    let len = value.trim().chars().count();
    if len == 0 {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    if len < min || len > max {
        return Err(AppError::Validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

/// Optional string that must not exceed `max` characters when present.
pub fn max_len(field: &str, value: Option<&str>, max: usize) -> Result<(), AppError> {
    match value {
        Some(v) if v.chars().count() > max => Err(AppError::Validation(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

/// A pragmatic shape check: one `@`, a non-empty local part and a dotted domain.
pub fn validate_email(email: &str) -> Result<(), AppError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }
    if email.chars().count() > 100 {
        return Err(AppError::Validation(
            "Email must be at most 100 characters".to_string(),
        ));
    }
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AppError::Validation("Email should be valid".to_string()));
    }
    Ok(())
}

/// Treats `Some("")` and whitespace-only strings as absent.
pub fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_len_bounds() {
        assert!(require_len("Name", "abc", 3, 10).is_ok());
        assert!(require_len("Name", "ab", 3, 10).is_err());
        assert!(require_len("Name", "   ", 3, 10).is_err());
        assert!(require_len("Name", "abcdefghijk", 3, 10).is_err());
    }

    #[test]
    fn test_require_len_counts_characters_not_bytes() {
        assert!(require_len("Name", "äöü", 3, 3).is_ok());
    }

    #[test]
    fn test_email_shapes() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("ada@example").is_err());
        assert!(validate_email("ada.example.com").is_err());
        assert!(validate_email("a@b@c.com").is_err());
        assert!(validate_email("ada @example.com").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn test_blank_to_none() {
        assert_eq!(blank_to_none(Some("  ".into())), None);
        assert_eq!(blank_to_none(Some(" x ".into())), Some("x".to_string()));
        assert_eq!(blank_to_none(None), None);
    }
}
