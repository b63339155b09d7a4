//! Field validators for the intake dialog.
//!
//! All lengths are counted in characters after trimming surrounding whitespace.

use crate::config::IntakeRules;

/// Why a free-text answer was rejected.
///
/// These are ordinary user mistakes answered with a re-prompt, not faults.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("problem description is shorter than {min} characters")]
    ProblemTooShort { min: usize },

    #[error("name is shorter than {min} characters")]
    NameTooShort { min: usize },

    #[error("age {value:?} is not a whole number")]
    AgeNotANumber { value: String },

    #[error("age {value} is outside {min}..={max}")]
    AgeOutOfRange { value: i64, min: u32, max: u32 },

    #[error("contact handle is shorter than {min} characters")]
    HandleTooShort { min: usize },
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Accept a custom problem description of at least `min_problem_len` characters.
pub fn validate_custom_problem(input: &str, rules: &IntakeRules) -> Result<String, ValidationError> {
    let text = input.trim();
    if char_len(text) < rules.min_problem_len {
        return Err(ValidationError::ProblemTooShort {
            min: rules.min_problem_len,
        });
    }
    Ok(text.to_string())
}

pub fn validate_name(input: &str, rules: &IntakeRules) -> Result<String, ValidationError> {
    let name = input.trim();
    if char_len(name) < rules.min_name_len {
        return Err(ValidationError::NameTooShort {
            min: rules.min_name_len,
        });
    }
    Ok(name.to_string())
}

/// Parse a whole-number age inside the configured inclusive range.
pub fn validate_age(input: &str, rules: &IntakeRules) -> Result<u32, ValidationError> {
    let raw = input.trim();
    let value: i64 = raw.parse().map_err(|_| ValidationError::AgeNotANumber {
        value: raw.to_string(),
    })?;

    match u32::try_from(value) {
        Ok(age) if (rules.min_age..=rules.max_age).contains(&age) => Ok(age),
        _ => Err(ValidationError::AgeOutOfRange {
            value,
            min: rules.min_age,
            max: rules.max_age,
        }),
    }
}

/// Strip one leading `@`, then require `min_handle_len` characters.
pub fn normalize_contact_handle(input: &str, rules: &IntakeRules) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    let handle = trimmed.strip_prefix('@').unwrap_or(trimmed).trim();
    if char_len(handle) < rules.min_handle_len {
        return Err(ValidationError::HandleTooShort {
            min: rules.min_handle_len,
        });
    }
    Ok(handle.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> IntakeRules {
        IntakeRules::default()
    }

    #[test]
    fn custom_problem_length_boundary() {
        assert_eq!(
            validate_custom_problem("abcdefghij", &rules()),
            Ok("abcdefghij".to_string())
        );
        assert_eq!(
            validate_custom_problem("abcdefghi", &rules()),
            Err(ValidationError::ProblemTooShort { min: 10 })
        );
    }

    #[test]
    fn custom_problem_is_trimmed_before_counting() {
        assert!(validate_custom_problem("   abcdefghi   ", &rules()).is_err());
        assert_eq!(
            validate_custom_problem("  Feeling exhausted all the time  ", &rules()).unwrap(),
            "Feeling exhausted all the time"
        );
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        // 9 Cyrillic characters, 18 bytes
        assert!(validate_custom_problem("тревожнос", &rules()).is_err());
        assert!(validate_custom_problem("тревожность", &rules()).is_ok());
        assert!(validate_name("Я", &rules()).is_err());
    }

    #[test]
    fn name_boundary() {
        assert_eq!(validate_name(" Al ", &rules()), Ok("Al".to_string()));
        assert_eq!(
            validate_name("A", &rules()),
            Err(ValidationError::NameTooShort { min: 2 })
        );
        assert!(validate_name("   ", &rules()).is_err());
    }

    #[test]
    fn age_accepts_integers_in_range() {
        assert_eq!(validate_age("25", &rules()), Ok(25));
        assert_eq!(validate_age(" 10 ", &rules()), Ok(10));
        assert_eq!(validate_age("100", &rules()), Ok(100));
    }

    #[test]
    fn age_rejects_out_of_range_and_garbage() {
        assert!(matches!(
            validate_age("9", &rules()),
            Err(ValidationError::AgeOutOfRange { value: 9, .. })
        ));
        assert!(matches!(
            validate_age("101", &rules()),
            Err(ValidationError::AgeOutOfRange { value: 101, .. })
        ));
        assert!(matches!(
            validate_age("-5", &rules()),
            Err(ValidationError::AgeOutOfRange { .. })
        ));
        assert!(matches!(
            validate_age("abc", &rules()),
            Err(ValidationError::AgeNotANumber { .. })
        ));
        assert!(validate_age("25.5", &rules()).is_err());
        assert!(validate_age("", &rules()).is_err());
    }

    #[test]
    fn age_range_is_configurable() {
        let adults = IntakeRules {
            min_age: 18,
            ..IntakeRules::default()
        };
        assert!(validate_age("17", &adults).is_err());
        assert_eq!(validate_age("18", &adults), Ok(18));
    }

    #[test]
    fn handle_strips_at_before_length_check() {
        assert_eq!(
            normalize_contact_handle("@ab", &rules()),
            Err(ValidationError::HandleTooShort { min: 3 })
        );
        assert_eq!(normalize_contact_handle("@abc", &rules()), Ok("abc".to_string()));
        assert_eq!(normalize_contact_handle("abc", &rules()), Ok("abc".to_string()));
        assert_eq!(
            normalize_contact_handle(" @anna_t ", &rules()),
            Ok("anna_t".to_string())
        );
    }

    #[test]
    fn handle_strips_only_one_at() {
        assert_eq!(normalize_contact_handle("@@ab", &rules()), Ok("@ab".to_string()));
    }
}
