// Operator identity supplied by the session collaborator.
// The core never authenticates; it only checks the role attached to each call.

use serde::{Deserialize, Serialize};

use crate::error::{CssdError, CssdResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Technician,
    Supervisor,
    QualityControl,
    Manager,
}

impl Role {
    /// Roles allowed to submit, sign and reject validation records
    pub fn can_validate(self) -> bool {
        matches!(self, Role::QualityControl | Role::Supervisor | Role::Manager)
    }

    /// Roles allowed to put equipment back into service
    pub fn can_manage_equipment(self) -> bool {
        matches!(self, Role::Supervisor | Role::Manager)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Technician => "technician",
            Role::Supervisor => "supervisor",
            Role::QualityControl => "quality_control",
            Role::Manager => "manager",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Role {
    type Err = CssdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "technician" => Ok(Role::Technician),
            "supervisor" => Ok(Role::Supervisor),
            "quality_control" | "qc" => Ok(Role::QualityControl),
            "manager" => Ok(Role::Manager),
            other => Err(CssdError::validation("role", format!("unknown role '{other}'"))),
        }
    }
}

/// Authenticated operator as handed over by the session provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub role: Role,
}

impl Operator {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn technician(id: impl Into<String>) -> Self {
        Self::new(id, Role::Technician)
    }

    pub fn quality_control(id: impl Into<String>) -> Self {
        Self::new(id, Role::QualityControl)
    }

    pub fn supervisor(id: impl Into<String>) -> Self {
        Self::new(id, Role::Supervisor)
    }

    pub(crate) fn require(&self, allowed: bool, action: &str) -> CssdResult<()> {
        if allowed {
            Ok(())
        } else {
            tracing::warn!(
                operator = %self.id,
                role = %self.role,
                action = action,
                "Operator not permitted"
            );
            Err(CssdError::Unauthorized {
                operator: self.id.clone(),
                role: self.role.to_string(),
                action: action.to_string(),
            })
        }
    }

    pub(crate) fn require_validator(&self, action: &str) -> CssdResult<()> {
        self.require(self.role.can_validate(), action)
    }
}
