#![forbid(unsafe_code)]

pub const CRATE_NAME: &str = "caseroom-model";

mod entities;
mod ids;
mod instructions;
mod policy;
mod role;
pub mod roster;

pub use entities::{AdminCaseAccess, Assistant, Case, CaseAccess, User};
pub use ids::{AssistantId, CaseId, Email, ValidationError};
pub use instructions::instruction_candidates;
pub use policy::{can_access, can_manage_case, effective_role};
pub use role::{EffectiveRole, Role};
