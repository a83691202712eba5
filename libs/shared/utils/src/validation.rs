// =====================================================================================
// INPUT VALIDATION - SECURITY PATTERNS & LENGTH CHECKS
// =====================================================================================

use regex::{Regex, RegexBuilder};
use tracing::{debug, instrument};

use shared_models::error::AppError;

const SECURITY_PATTERNS: &[&str] = &[
    r"<script[^>]*>.*?</script>",
    r"javascript:",
    r"on\w+\s*=",
    r"(union|select|insert|update|delete|drop|create|alter)\s+",
    r"--\s*",
    r"/\*.*?\*/",
    r"(\||&|;|`|\$\()",
    r"\.\./",
    r"\\x[0-9a-fA-F]{2}",
    r"%[0-9a-fA-F]{2}",
];

pub struct InputValidator {
    security_patterns: Vec<Regex>,
    email_pattern: Option<Regex>,
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl InputValidator {
    pub fn new() -> Self {
        let security_patterns = SECURITY_PATTERNS
            .iter()
            .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
            .collect();

        Self {
            security_patterns,
            email_pattern: Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok(),
        }
    }

    /// `true` when no known injection pattern matches.
    pub fn validate_security(&self, value: &str) -> bool {
        match self.security_patterns.iter().find(|p| p.is_match(value)) {
            Some(pattern) => {
                debug!("Input matched security pattern {}", pattern.as_str());
                false
            }
            None => true,
        }
    }

    pub fn validate_length(&self, value: &str, min_length: usize, max_length: usize) -> bool {
        let len = value.chars().count();
        min_length <= len && len <= max_length
    }

    pub fn validate_email(&self, email: &str) -> bool {
        email.len() <= 254
            && self
                .email_pattern
                .as_ref()
                .is_some_and(|re| re.is_match(email))
    }

    /// Collapses whitespace and strips control characters.
    pub fn sanitize_string(&self, value: &str) -> String {
        value
            .chars()
            .filter(|c| !c.is_control() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Guard for administrative string inputs.
    #[instrument(skip(self, value))]
    pub fn check_field(&self, field: &str, value: &str, max_length: usize) -> Result<String, AppError> {
        let value = self.sanitize_string(value);

        if !self.validate_length(&value, 1, max_length) {
            return Err(AppError::validation(
                field,
                format!("{} must be between 1 and {} characters", field, max_length),
            ));
        }

        if !self.validate_security(&value) {
            return Err(AppError::validation(
                field,
                format!("{} contains potentially malicious content", field),
            ));
        }

        Ok(value)
    }
}
