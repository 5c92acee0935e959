// SPDX-License-Identifier: Apache-2.0

use crate::ids::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Role grantable on a case through the access relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Role {
    #[serde(rename = "STUDENT")]
    Student,
    #[serde(rename = "PROFESSOR")]
    Professor,
}

impl Role {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        match input {
            "STUDENT" => Ok(Self::Student),
            "PROFESSOR" => Ok(Self::Professor),
            other => Err(ValidationError(format!("unknown role: {other}"))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Professor => "PROFESSOR",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolved role of a caller for one case, after folding in the global
/// admin flags. Ordering is the hierarchy: student < professor < admin <
/// super-admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum EffectiveRole {
    Student,
    Professor,
    Admin,
    SuperAdmin,
}

impl EffectiveRole {
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Student => 0,
            Self::Professor => 1,
            Self::Admin => 2,
            Self::SuperAdmin => 3,
        }
    }

    #[must_use]
    pub const fn at_least(self, required: Self) -> bool {
        self.rank() >= required.rank()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Professor => "PROFESSOR",
            Self::Admin => "ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }
}

impl From<Role> for EffectiveRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Student => Self::Student,
            Role::Professor => Self::Professor,
        }
    }
}

impl Display for EffectiveRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
