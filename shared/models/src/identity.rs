use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::chat::ChatUser;

/// Role of a notification recipient, read from chat user metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    Client,
    Attorney,
    Other,
}

impl RecipientRole {
    pub fn from_metadata(role: Option<&str>) -> Self {
        match role.map(|r| r.trim().to_lowercase()).as_deref() {
            Some("client") => Self::Client,
            Some("attorney") => Self::Attorney,
            _ => Self::Other,
        }
    }

    /// Identity tables consulted for this role, in precedence order.
    pub fn lookup_order(&self) -> &'static [IdentityTable] {
        match self {
            Self::Attorney => &[IdentityTable::Attorneys],
            Self::Client => &[IdentityTable::Users],
            Self::Other => &[IdentityTable::Attorneys, IdentityTable::Users],
        }
    }
}

impl std::fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Attorney => write!(f, "attorney"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityTable {
    Attorneys,
    Users,
}

impl IdentityTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Attorneys => "attorneys",
            Self::Users => "users",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IdentityRecord {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub firm_name: Option<String>,
}

/// Channel member with a deliverable email address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ResolvedRecipient {
    pub user: ChatUser,
    #[validate(email(message = "Recipient email must be a valid email address"))]
    pub email: String,
    pub role: RecipientRole,
}
