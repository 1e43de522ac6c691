use crate::error::{RelayError, RelayResult};
use validator::{Validate, ValidationErrors};

pub fn validate_model<T: Validate>(model: &T) -> RelayResult<()> {
    match model.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let error_messages = format_validation_errors(&errors);
            Err(RelayError::validation("model", error_messages))
        }
    }
}

pub fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();

    for (field, field_errors) in errors.field_errors() {
        for error in field_errors {
            let message = match (&error.message, error.code.as_ref()) {
                (Some(message), _) => message.to_string(),
                (None, "email") => "Invalid email format".to_string(),
                (None, "length") => format!("Length validation failed for field '{}'", field),
                (None, "required") => format!("Field '{}' is required", field),
                (None, code) => format!("Validation failed for field '{}': {}", field, code),
            };
            messages.push(message);
        }
    }

    messages.sort();
    messages.join(", ")
}

/// Rejects blank identifiers coming from webhook bodies and route paths.
pub fn require_non_blank(field: &str, value: &str) -> RelayResult<()> {
    if value.trim().is_empty() {
        return Err(RelayError::validation(field, "must not be blank"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Contact {
        #[validate(email)]
        email: String,
    }

    #[test]
    fn test_validate_model() {
        let valid = Contact { email: "client@x.com".to_string() };
        assert!(validate_model(&valid).is_ok());

        let invalid = Contact { email: "client".to_string() };
        let error = validate_model(&invalid).unwrap_err();
        assert_eq!(error.error_code(), "VALIDATION_ERROR");
        assert!(error.to_string().contains("Invalid email format"));
    }

    #[test]
    fn test_require_non_blank() {
        assert!(require_non_blank("channel_url", "ch1").is_ok());
        assert!(require_non_blank("channel_url", "  ").is_err());
    }
}
