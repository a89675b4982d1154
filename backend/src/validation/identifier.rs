use crate::error::AppError;

/// Longest identifier accepted by either supported dialect (MySQL caps at 64)
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Restricts names that end up interpolated into catalog queries
pub struct IdentifierValidator;

impl IdentifierValidator {
    /// Accept only plain SQL identifier characters (ASCII letters, digits, `_`, `$`),
    /// and never a digits-only name that could be read as a literal.
    pub fn validate(name: &str, what: &str) -> Result<(), AppError> {
        if name.is_empty() {
            return Err(AppError::Validation(format!("{} cannot be empty", what)));
        }

        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(AppError::Validation(format!(
                "{} cannot exceed {} characters (got {})",
                what,
                MAX_IDENTIFIER_LEN,
                name.len()
            )));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            return Err(AppError::Validation(format!(
                "{} contains invalid characters. Only letters, digits, '_' and '$' are allowed",
                what
            )));
        }

        if name.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Validation(format!(
                "{} cannot consist of digits only",
                what
            )));
        }

        Ok(())
    }
}
