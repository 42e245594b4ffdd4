use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn customer(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Customer)
    }

    pub fn vendor(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Vendor)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Admin)
    }

    pub fn payment_system() -> Self {
        Self::new("payment-gateway", ActorRole::System)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Customer,
    Vendor,
    Admin,
    System,
}

impl ActorRole {
    pub const ALL: [ActorRole; 4] = [
        ActorRole::Customer,
        ActorRole::Vendor,
        ActorRole::Admin,
        ActorRole::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Customer => "customer",
            ActorRole::Vendor => "vendor",
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(ActorRole::Customer),
            "vendor" => Some(ActorRole::Vendor),
            "admin" => Some(ActorRole::Admin),
            "system" => Some(ActorRole::System),
            _ => None,
        }
    }

    pub fn parse_external(s: &str) -> Option<Self> {
        match Self::parse(&s.trim().to_lowercase()) {
            Some(ActorRole::System) | None => None,
            role => role,
        }
    }
}
