//! Entry forms
//!
//! Raw form input as submitted by a client, and its validation. Every
//! form validates into a typed value before any backend call is made;
//! failures are reported per field with the message shown next to it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{synthetic_email, ProfileUpdate, WaterTemperature};

/// `HH:MM`, 00:00 to 23:59
const TIME_PATTERN: &str = r"^([01]\d|2[0-3]):([0-5]\d)$";

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_NAME_LEN: usize = 2;
pub const MAX_BIO_LEN: usize = 160;
pub const MIN_TARGET_BATHS: i64 = 1;
pub const MAX_TARGET_BATHS: i64 = 1000;

/// A rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All rejected fields of one submission
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", self.summary())]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Single-field error
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn into_result<T>(self, value: impl FnOnce() -> T) -> Result<T, ValidationErrors> {
        if self.errors.is_empty() {
            Ok(value())
        } else {
            Err(self)
        }
    }

    /// Message for a field, if it was rejected
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// First message, as shown in a toast
    pub fn first_message(&self) -> &str {
        self.errors
            .first()
            .map(|e| e.message.as_str())
            .unwrap_or("")
    }

    fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn is_valid_time(value: &str) -> bool {
    regex::Regex::new(TIME_PATTERN)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

fn parse_date(errors: &mut ValidationErrors, value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        errors.add("date", "Dato for badet er påkrevd.");
        return None;
    }
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.add("date", "Ugyldig dato. Bruk ÅÅÅÅ-MM-DD.");
            None
        }
    }
}

fn check_time(errors: &mut ValidationErrors, value: &str) {
    if !is_valid_time(value.trim()) {
        errors.add("time", "Ugyldig tidsformat. Bruk TT:MM.");
    }
}

fn non_empty(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

// ============================================
// Log bath
// ============================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBathForm {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub water_temperature: Option<WaterTemperature>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidLogBath {
    pub date: NaiveDate,
    pub time: String,
    pub location: String,
    pub water_temperature: Option<WaterTemperature>,
    pub comments: String,
}

impl LogBathForm {
    pub fn validate(self) -> Result<ValidLogBath, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let date = parse_date(&mut errors, &self.date);
        check_time(&mut errors, &self.time);

        errors.into_result(|| ValidLogBath {
            date: date.unwrap_or_default(),
            time: self.time.trim().to_string(),
            location: non_empty(self.location),
            water_temperature: self.water_temperature,
            comments: non_empty(self.comments),
        })
    }
}

// ============================================
// Plan bath
// ============================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanBathForm {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    /// Free text, shown in the form but never stored
    #[serde(default)]
    pub invited_guests: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidPlanBath {
    pub date: NaiveDate,
    pub time: String,
    pub location: String,
    pub description: String,
}

impl PlanBathForm {
    /// Validate against the caller's current date
    pub fn validate(self, today: NaiveDate) -> Result<ValidPlanBath, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let date = parse_date(&mut errors, &self.date);
        if let Some(date) = date {
            if date < today {
                errors.add("date", "Dato kan ikke være i fortiden.");
            }
        }
        check_time(&mut errors, &self.time);

        let location = self.location.trim().to_string();
        if location.is_empty() {
            errors.add("location", "Sted er påkrevd.");
        }
        let description = self.description.trim().to_string();
        if description.is_empty() {
            errors.add("description", "Beskrivelse/Tittel for badet er påkrevd.");
        }

        errors.into_result(|| ValidPlanBath {
            date: date.unwrap_or(today),
            time: self.time.trim().to_string(),
            location,
            description,
        })
    }
}

// ============================================
// Profile
// ============================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub target_baths: i64,
    /// Immutable after sign-up; a differing value is ignored
    #[serde(default)]
    pub username: Option<String>,
    /// Immutable after sign-up; a differing value is ignored
    #[serde(default)]
    pub email: Option<String>,
}

impl ProfileForm {
    /// Validate into the mutable profile fields
    pub fn validate(&self) -> Result<ProfileUpdate, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = self.name.trim().to_string();
        if name.chars().count() < MIN_NAME_LEN {
            errors.add("name", "Navn må være minst 2 tegn.");
        }

        let bio = self.bio.clone().unwrap_or_default();
        if bio.chars().count() > MAX_BIO_LEN {
            errors.add("bio", "Bio kan ikke være lenger enn 160 tegn.");
        }

        if self.target_baths < MIN_TARGET_BATHS {
            errors.add("targetBaths", "Målet må være minst 1 bad.");
        } else if self.target_baths > MAX_TARGET_BATHS {
            errors.add("targetBaths", "Målet kan ikke være mer enn 1000 bad.");
        }

        let target = self.target_baths;
        errors.into_result(|| ProfileUpdate {
            name: Some(name),
            bio: Some(bio),
            avatar_url: None,
            target_baths: Some(target as u32),
        })
    }
}

// ============================================
// Sign up / log in
// ============================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub target_baths: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidSignup {
    /// Trimmed, case preserved
    pub username: String,
    /// Synthetic credential address
    pub email: String,
    pub password: String,
    pub target_baths: u32,
}

impl SignupForm {
    pub fn validate(&self) -> Result<ValidSignup, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let username = self.username.trim().to_string();
        if username.is_empty() {
            errors.add("username", "Brukernavn er påkrevd.");
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.add("password", "Passordet må være minst 6 tegn.");
        }
        if self.password != self.confirm_password {
            errors.add("confirmPassword", "Passordene stemmer ikke overens.");
        }
        if self.target_baths < MIN_TARGET_BATHS {
            errors.add("targetBaths", "Mål antall bad må være minst 1.");
        } else if self.target_baths > MAX_TARGET_BATHS {
            errors.add("targetBaths", "Målet kan ikke være mer enn 1000 bad.");
        }

        let email = if username.is_empty() {
            None
        } else {
            let email = synthetic_email(&username);
            if email.is_none() {
                errors.add("username", "Brukernavn er ugyldig. Bruk bokstaver og tall.");
            }
            email
        };

        let target = self.target_baths;
        errors.into_result(|| ValidSignup {
            username,
            email: email.unwrap_or_default(),
            password: self.password.clone(),
            target_baths: target as u32,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl LoginForm {
    /// Returns the trimmed username
    pub fn validate(&self) -> Result<String, ValidationErrors> {
        let username = self.username.trim();
        if username.is_empty() || self.password.is_empty() {
            return Err(ValidationErrors::single(
                "username",
                "Brukernavn og passord må fylles ut.",
            ));
        }
        Ok(username.to_string())
    }
}

// ============================================
// Comment
// ============================================

/// Validate comment text, returning it trimmed
pub fn validate_comment(text: &str) -> Result<String, ValidationErrors> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationErrors::single("text", "Kommentaren kan ikke være tom."));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    }

    #[test]
    fn test_time_pattern() {
        for ok in ["00:00", "07:30", "19:05", "23:59"] {
            assert!(is_valid_time(ok), "{}", ok);
        }
        for bad in ["24:00", "7:30", "12:60", "12.30", "", "12:305"] {
            assert!(!is_valid_time(bad), "{}", bad);
        }
    }

    #[test]
    fn test_log_bath_form() {
        let valid = LogBathForm {
            date: "2024-01-05".into(),
            time: "07:30".into(),
            location: Some("  Korsvika ".into()),
            water_temperature: Some(WaterTemperature::Kaldt),
            comments: None,
        }
        .validate()
        .unwrap();
        assert_eq!(valid.location, "Korsvika");
        assert_eq!(valid.comments, "");

        let errors = LogBathForm {
            date: String::new(),
            time: "25:00".into(),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors.message_for("date"), Some("Dato for badet er påkrevd."));
        assert_eq!(errors.message_for("time"), Some("Ugyldig tidsformat. Bruk TT:MM."));
    }

    #[test]
    fn test_plan_bath_form() {
        let form = PlanBathForm {
            date: "2024-01-05".into(),
            time: "08:00".into(),
            location: "Korsvika".into(),
            description: "Morgenbad".into(),
            invited_guests: Some("tar du med kaffe?".into()),
        };
        assert!(form.clone().validate(today()).is_ok());

        let errors = PlanBathForm {
            date: "2024-01-04".into(),
            time: "08:00".into(),
            location: " ".into(),
            description: String::new(),
            invited_guests: None,
        }
        .validate(today())
        .unwrap_err();
        assert_eq!(errors.message_for("date"), Some("Dato kan ikke være i fortiden."));
        assert_eq!(errors.message_for("location"), Some("Sted er påkrevd."));
        assert_eq!(
            errors.message_for("description"),
            Some("Beskrivelse/Tittel for badet er påkrevd.")
        );
    }

    #[test]
    fn test_profile_form() {
        let update = ProfileForm {
            name: "Anna".into(),
            bio: Some("Kaldt er best".into()),
            target_baths: 50,
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(update.name.as_deref(), Some("Anna"));
        assert_eq!(update.target_baths, Some(50));
        assert_eq!(update.avatar_url, None);

        let errors = ProfileForm {
            name: "A".into(),
            bio: Some("x".repeat(161)),
            target_baths: 1001,
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors.errors.len(), 3);
        assert_eq!(
            errors.message_for("targetBaths"),
            Some("Målet kan ikke være mer enn 1000 bad.")
        );

        let errors = ProfileForm {
            name: "Anna".into(),
            target_baths: 0,
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors.first_message(), "Målet må være minst 1 bad.");
    }

    #[test]
    fn test_bio_counts_characters() {
        let form = ProfileForm {
            name: "Åse".into(),
            bio: Some("å".repeat(160)),
            target_baths: 10,
            ..Default::default()
        };
        assert!(form.validate().is_ok());
    }

    #[test]
    fn test_signup_form() {
        let valid = SignupForm {
            username: " Anna ".into(),
            password: "hemmelig".into(),
            confirm_password: "hemmelig".into(),
            target_baths: 30,
        }
        .validate()
        .unwrap();
        assert_eq!(valid.username, "Anna");
        assert_eq!(valid.email, "anna@badekompis.app");
        assert_eq!(valid.target_baths, 30);

        let errors = SignupForm {
            username: String::new(),
            password: "123".into(),
            confirm_password: "1234".into(),
            target_baths: 0,
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors.first_message(), "Brukernavn er påkrevd.");
        assert_eq!(errors.message_for("password"), Some("Passordet må være minst 6 tegn."));
        assert_eq!(
            errors.message_for("confirmPassword"),
            Some("Passordene stemmer ikke overens.")
        );
        assert_eq!(
            errors.message_for("targetBaths"),
            Some("Mål antall bad må være minst 1.")
        );

        let errors = SignupForm {
            username: "ÆØÅ".into(),
            password: "hemmelig".into(),
            confirm_password: "hemmelig".into(),
            target_baths: 5,
        }
        .validate()
        .unwrap_err();
        assert_eq!(
            errors.message_for("username"),
            Some("Brukernavn er ugyldig. Bruk bokstaver og tall.")
        );
    }

    #[test]
    fn test_login_form() {
        let form = LoginForm {
            username: " anna ".into(),
            password: "x".into(),
        };
        assert_eq!(form.validate().unwrap(), "anna");

        let errors = LoginForm {
            username: "anna".into(),
            password: String::new(),
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors.first_message(), "Brukernavn og passord må fylles ut.");
    }

    #[test]
    fn test_comment_text() {
        assert_eq!(validate_comment("  Digg! ").unwrap(), "Digg!");
        assert!(validate_comment("   ").is_err());
    }
}
