use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Row in the `profiles` table, keyed by the auth user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

impl Profile {
    pub fn is_admin(&self, admin_emails: &[String]) -> bool {
        self.role == Role::Admin
            || admin_emails
                .iter()
                .any(|e| e.eq_ignore_ascii_case(self.email.trim()))
    }
}
