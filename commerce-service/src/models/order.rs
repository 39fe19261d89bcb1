use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Canceled => "CANCELED",
        }
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELED" => Ok(OrderStatus::Canceled),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

/// Shipping/contact details copied onto the order at purchase time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ContactSnapshot {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(custom(function = "validate_contact_phone"))]
    pub phone: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1))]
    pub address: String,
}

/// Accepts `^\+?1?\d{9,11}$`, at most 11 characters overall.
pub fn validate_contact_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    let well_formed = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && match digits.len() {
            9..=11 => true,
            12 => digits.starts_with('1'),
            _ => false,
        };

    if !well_formed || phone.len() > 11 {
        let mut err = ValidationError::new("phone");
        err.message = Some("Phone number must be entered in the format: '09129876543'".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub city: String,
    pub address: String,
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(user_id: Uuid, plan_id: Uuid, contact: ContactSnapshot) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id,
            first_name: contact.first_name,
            last_name: contact.last_name,
            phone: contact.phone,
            city: contact.city,
            address: contact.address,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
