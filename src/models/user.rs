use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Organizer,
    Attendee,
    Moderator,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Organizer => "organizer",
            UserRole::Attendee => "attendee",
            UserRole::Moderator => "moderator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(UserRole::Admin),
            "organizer" => Some(UserRole::Organizer),
            "attendee" => Some(UserRole::Attendee),
            "moderator" => Some(UserRole::Moderator),
            _ => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Moderator)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub is_verified: bool,
}

impl User {
    // Проверить пароль по bcrypt-хешу
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}

/// Контакты гостя, покупающего без регистрации.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
    pub name: String,
    pub email: String,
}

/// Владелец покупки. Фиксируется при создании PaymentIntent и больше не меняется.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuyerIdentity {
    Registered { user_id: i64 },
    Guest(GuestContact),
}

impl BuyerIdentity {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            BuyerIdentity::Registered { user_id } => Some(*user_id),
            BuyerIdentity::Guest(_) => None,
        }
    }

    pub fn guest(&self) -> Option<&GuestContact> {
        match self {
            BuyerIdentity::Registered { .. } => None,
            BuyerIdentity::Guest(contact) => Some(contact),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, BuyerIdentity::Guest(_))
    }

    /// Восстанавливает владельца из колонок `user_id` / `guest_name` / `guest_email`.
    /// Ровно одна из форм должна быть заполнена.
    pub fn from_columns(
        user_id: Option<i64>,
        guest_name: Option<String>,
        guest_email: Option<String>,
    ) -> Option<Self> {
        match (user_id, guest_name, guest_email) {
            (Some(user_id), None, None) => Some(BuyerIdentity::Registered { user_id }),
            (None, Some(name), Some(email)) => Some(BuyerIdentity::Guest(GuestContact { name, email })),
            _ => None,
        }
    }

    pub fn into_columns(self) -> (Option<i64>, Option<String>, Option<String>) {
        match self {
            BuyerIdentity::Registered { user_id } => (Some(user_id), None, None),
            BuyerIdentity::Guest(contact) => (None, Some(contact.name), Some(contact.email)),
        }
    }
}
