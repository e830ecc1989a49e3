use serde::{Deserialize, Serialize};

/// Header names of the scheduling tables.
///
/// Lookups against these are case-insensitive, so the store may carry any
/// capitalization of them.
pub mod fields {
    pub const ID: &str = "id";
    pub const STUDENT_ID: &str = "studentId";
    pub const START_TIME: &str = "startTime";
    pub const CREATED_AT: &str = "createdAt";
    pub const CREATED_BY: &str = "createdBy";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const UPDATED_BY: &str = "updatedBy";
    pub const REENROLLMENT_INTENT: &str = "reenrollmentIntent";
    pub const INTENT_SUBMITTED_AT: &str = "intentSubmittedAt";
    pub const INTENT_SUBMITTED_BY: &str = "intentSubmittedBy";
    pub const LINKED_PREVIOUS_REGISTRATION_ID: &str = "linkedPreviousRegistrationId";
    pub const REGISTRATION_ID: &str = "registrationId";

    pub const FIRST_NAME: &str = "firstName";
    pub const LAST_NAME: &str = "lastName";
    pub const GRADE: &str = "grade";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const STUDENT_NAME: &str = "studentName";

    pub const PARENT1_NAME: &str = "parent1Name";
    pub const PARENT1_EMAIL: &str = "parent1Email";
    pub const PARENT1_PHONE: &str = "parent1Phone";
    pub const PARENT2_NAME: &str = "parent2Name";
    pub const PARENT2_EMAIL: &str = "parent2Email";
    pub const PARENT2_PHONE: &str = "parent2Phone";
    pub const PARENT1_ID: &str = "parent1Id";
    pub const PARENT2_ID: &str = "parent2Id";

    /// Fields tracking a family's answer for the next trimester.
    pub const INTENT_FIELDS: [&str; 3] =
        [REENROLLMENT_INTENT, INTENT_SUBMITTED_AT, INTENT_SUBMITTED_BY];
}

/// A family's stated plan for a registration in the next trimester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReenrollmentIntent {
    Keep,
    Change,
    Drop,
    /// No answer recorded; treated like `Keep` during rollover.
    Blank,
}

impl ReenrollmentIntent {
    /// Parse a stored intent cell. Unrecognized text is `None` so callers can
    /// surface it instead of guessing.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" => Some(Self::Blank),
            "keep" => Some(Self::Keep),
            "change" => Some(Self::Change),
            "drop" => Some(Self::Drop),
            _ => None,
        }
    }

    /// Whether a registration with this intent moves into the next trimester.
    pub fn carries_forward(self) -> bool {
        !matches!(self, Self::Drop)
    }
}

#[cfg(test)]
mod tests {
    use super::ReenrollmentIntent;

    #[test]
    fn parses_intents_case_insensitively() {
        assert_eq!(ReenrollmentIntent::parse("KEEP"), Some(ReenrollmentIntent::Keep));
        assert_eq!(ReenrollmentIntent::parse(" change "), Some(ReenrollmentIntent::Change));
        assert_eq!(ReenrollmentIntent::parse("Drop"), Some(ReenrollmentIntent::Drop));
        assert_eq!(ReenrollmentIntent::parse(""), Some(ReenrollmentIntent::Blank));
        assert_eq!(ReenrollmentIntent::parse("maybe"), None);
    }

    #[test]
    fn only_drop_stops_carry_forward() {
        assert!(ReenrollmentIntent::Keep.carries_forward());
        assert!(ReenrollmentIntent::Change.carries_forward());
        assert!(ReenrollmentIntent::Blank.carries_forward());
        assert!(!ReenrollmentIntent::Drop.carries_forward());
    }
}
