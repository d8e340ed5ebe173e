//! Prefixed ID generation for shophooks entities.
//!
//! All surrogate keys use a `sh_` brand prefix so they can never collide
//! with provider-assigned identifiers (payment ids, notification ids,
//! marketplace order numbers).
//!
//! Format: `sh_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

const ALL_PREFIXES: &[&str] = &["sh_ord_", "sh_del_", "sh_rty_"];

/// Cheap format check to reject garbage before hitting the database.
/// Validates `sh_{entity}_{32_hex_chars}`.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Order,
    Delivery,
    Retry,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Order => "sh_ord",
            Self::Delivery => "sh_del",
            Self::Retry => "sh_rty",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
