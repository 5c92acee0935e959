// SPDX-License-Identifier: Apache-2.0

use crate::ids::{AssistantId, CaseId, Email};
use crate::role::Role;
use serde::{Deserialize, Serialize};

/// Identity record. Created on first sign-in or first roster reference;
/// removed only by explicit admin action, children first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct User {
    pub id: i64,
    pub email: Email,
    pub username: Option<String>,
    pub is_admin: bool,
    pub is_super_admin: bool,
    pub can_create_cases: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Case {
    pub id: CaseId,
    pub name: String,
    pub created_by: i64,
    pub created_at: i64,
}

/// One role grant binding a user to a case. Unique on (user, case);
/// re-granting overwrites the role in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseAccess {
    pub user_id: i64,
    pub case_id: CaseId,
    pub role: Role,
    pub added_by: i64,
    pub added_at: i64,
}

/// Management assignment for admins, independent of student/professor
/// grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminCaseAccess {
    pub user_id: i64,
    pub case_id: CaseId,
    pub added_by: i64,
    pub added_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Assistant {
    pub id: AssistantId,
    pub case_id: CaseId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password_sha256: Option<String>,
    pub created_at: i64,
}

impl Assistant {
    #[must_use]
    pub fn password_gated(&self) -> bool {
        self.password_sha256.is_some()
    }
}
