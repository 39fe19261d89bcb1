use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Personal details kept alongside the account. Every field is optional and
/// filled in by the user after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub national_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Empty profile created together with the user.
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            first_name: None,
            last_name: None,
            address: None,
            postal_code: None,
            national_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites the fields present in `changes`.
    pub fn apply(&mut self, changes: ProfileChanges) {
        let ProfileChanges {
            first_name,
            last_name,
            address,
            postal_code,
            national_code,
        } = changes;

        if first_name.is_some() {
            self.first_name = first_name;
        }
        if last_name.is_some() {
            self.last_name = last_name;
        }
        if address.is_some() {
            self.address = address;
        }
        if postal_code.is_some() {
            self.postal_code = postal_code;
        }
        if national_code.is_some() {
            self.national_code = national_code;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProfileChanges {
    #[validate(length(max = 255))]
    pub first_name: Option<String>,
    #[validate(length(max = 255))]
    pub last_name: Option<String>,
    pub address: Option<String>,
    #[validate(length(equal = 10, message = "Postal code must be 10 characters"))]
    pub postal_code: Option<String>,
    #[validate(length(equal = 9, message = "National code must be 9 characters"))]
    pub national_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_keeps_absent_fields() {
        let mut profile = Profile::new(Uuid::new_v4());
        profile.apply(ProfileChanges {
            first_name: Some("Sara".into()),
            address: Some("Valiasr St".into()),
            ..Default::default()
        });
        profile.apply(ProfileChanges {
            last_name: Some("Ahmadi".into()),
            ..Default::default()
        });

        assert_eq!(profile.first_name.as_deref(), Some("Sara"));
        assert_eq!(profile.last_name.as_deref(), Some("Ahmadi"));
        assert_eq!(profile.address.as_deref(), Some("Valiasr St"));
        assert!(profile.postal_code.is_none());
    }

    #[test]
    fn codes_must_have_exact_length() {
        let ok = ProfileChanges {
            postal_code: Some("1234567890".into()),
            national_code: Some("123456789".into()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let short_postal = ProfileChanges {
            postal_code: Some("12345".into()),
            ..Default::default()
        };
        assert!(short_postal.validate().is_err());

        let long_national = ProfileChanges {
            national_code: Some("1234567890".into()),
            ..Default::default()
        };
        assert!(long_national.validate().is_err());

        let long_name = ProfileChanges {
            first_name: Some("x".repeat(256)),
            ..Default::default()
        };
        assert!(long_name.validate().is_err());
    }
}
