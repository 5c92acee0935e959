// SPDX-License-Identifier: Apache-2.0

//! The access gate. Every handler resolves identity and role through the
//! helpers here; none of them re-implements the checks. A missing or
//! unknown session token is a hard 401 before any other data access; a
//! known caller without sufficient role is a 403. The two are distinct
//! failures throughout.

use axum::http::HeaderMap;

use caseroom_api::ApiError;
use caseroom_model::{can_access, can_manage_case, Case, CaseId, EffectiveRole, User};

use crate::{db::Database, StoreError};

#[derive(Debug)]
pub enum GateError {
    Unauthorized,
    Forbidden(&'static str),
    NotFound(&'static str),
    Store(StoreError),
}

impl GateError {
    #[must_use]
    pub fn to_api(&self) -> ApiError {
        match self {
            Self::Unauthorized => ApiError::unauthorized(),
            Self::Forbidden(required) => ApiError::forbidden(required),
            Self::NotFound(kind) => ApiError::not_found(kind),
            Self::Store(_) => ApiError::upstream_failure(),
        }
    }
}

impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").or_else(|| raw.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Token to user, or 401. Nothing else is looked up on failure.
pub async fn resolve_identity(db: &Database, headers: &HeaderMap) -> Result<User, GateError> {
    let token = bearer_token(headers).ok_or(GateError::Unauthorized)?;
    db.resolve_session(&token)
        .await?
        .ok_or(GateError::Unauthorized)
}

/// Loads the case and requires the caller to hold at least `required` on
/// it. The grant lookup is a fresh point read per request.
pub async fn require_case_role(
    db: &Database,
    user: &User,
    case_id: &CaseId,
    required: EffectiveRole,
) -> Result<(Case, EffectiveRole), GateError> {
    let case = db
        .get_case(case_id)
        .await?
        .ok_or(GateError::NotFound("case"))?;
    let grant = db.case_grant(user.id, case_id).await?;
    if !can_access(user, grant, required) {
        return Err(GateError::Forbidden(required.as_str()));
    }
    let held = caseroom_model::effective_role(user, grant)
        .ok_or(GateError::Forbidden(required.as_str()))?;
    Ok((case, held))
}

/// Management is narrower than access: non-super admins need an explicit
/// admin assignment for the case.
pub async fn require_case_management(
    db: &Database,
    user: &User,
    case_id: &CaseId,
) -> Result<Case, GateError> {
    let case = db
        .get_case(case_id)
        .await?
        .ok_or(GateError::NotFound("case"))?;
    let grant = db.case_grant(user.id, case_id).await?;
    let has_assignment = if user.is_admin && !user.is_super_admin {
        db.has_admin_assignment(user.id, case_id).await?
    } else {
        false
    };
    if !can_manage_case(user, grant, has_assignment) {
        return Err(GateError::Forbidden("case management"));
    }
    Ok(case)
}

pub fn require_admin(user: &User) -> Result<(), GateError> {
    if user.is_admin || user.is_super_admin {
        Ok(())
    } else {
        Err(GateError::Forbidden(EffectiveRole::Admin.as_str()))
    }
}

pub fn require_super_admin(user: &User) -> Result<(), GateError> {
    if user.is_super_admin {
        Ok(())
    } else {
        Err(GateError::Forbidden(EffectiveRole::SuperAdmin.as_str()))
    }
}
