use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Customer => write!(f, "CUSTOMER"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CUSTOMER" => Ok(Role::Customer),
            "ADMIN" => Ok(Role::Admin),
            other => Err(EngineError::Forbidden(format!("Unknown role: {}", other))),
        }
    }
}

/// Authenticated caller, supplied by the identity collaborator and trusted verbatim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

impl Identity {
    pub fn customer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn ensure_admin(&self) -> EngineResult<()> {
        if !self.is_admin() {
            return Err(EngineError::Forbidden("Administrator role required".to_string()));
        }
        Ok(())
    }

    /// Owners act on their own resources; admins act on anyone's.
    pub fn ensure_can_act_for(&self, owner: Uuid) -> EngineResult<()> {
        if self.user_id != owner && !self.is_admin() {
            return Err(EngineError::Forbidden(
                "Booking does not belong to the caller".to_string(),
            ));
        }
        Ok(())
    }
}
