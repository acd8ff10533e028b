//! Actor roles on the platform.

use serde::{Deserialize, Serialize};

/// The three kinds of actor that drive lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// The customer paying for the work.
    Company,
    /// The service provider delivering the work.
    Provider,
    /// Platform staff resolving disputes and confirming settlements.
    Admin,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Company => "company",
            ActorRole::Provider => "provider",
            ActorRole::Admin => "admin",
        }
    }

    /// The negotiating counterparty; admins have none.
    pub fn counterparty(self) -> Option<ActorRole> {
        match self {
            ActorRole::Company => Some(ActorRole::Provider),
            ActorRole::Provider => Some(ActorRole::Company),
            ActorRole::Admin => None,
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
