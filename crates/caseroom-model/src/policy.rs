// SPDX-License-Identifier: Apache-2.0

use crate::entities::User;
use crate::role::{EffectiveRole, Role};

/// Resolves the caller's effective role for one case.
///
/// Lookup order: the global super-admin/admin flags grant implicit access
/// regardless of per-case rows; otherwise the exact-match access row (if
/// any) decides. `None` means the caller holds nothing on this case.
#[must_use]
pub fn effective_role(user: &User, grant: Option<Role>) -> Option<EffectiveRole> {
    if user.is_super_admin {
        return Some(EffectiveRole::SuperAdmin);
    }
    if user.is_admin {
        return Some(EffectiveRole::Admin);
    }
    grant.map(EffectiveRole::from)
}

/// The single policy check every role-gated handler consults.
#[must_use]
pub fn can_access(user: &User, grant: Option<Role>, required: EffectiveRole) -> bool {
    effective_role(user, grant).is_some_and(|held| held.at_least(required))
}

/// Case management (deletion, wholesale roster changes) is narrower than
/// access: a non-super admin manages only cases with an explicit admin
/// assignment; a professor grant manages its own case.
#[must_use]
pub fn can_manage_case(user: &User, grant: Option<Role>, has_admin_assignment: bool) -> bool {
    if user.is_super_admin {
        return true;
    }
    if user.is_admin {
        return has_admin_assignment;
    }
    grant == Some(Role::Professor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Email;

    fn user(is_admin: bool, is_super_admin: bool) -> User {
        User {
            id: 7,
            email: Email::parse("prof@example.edu").expect("email"),
            username: None,
            is_admin,
            is_super_admin,
            can_create_cases: false,
            created_at: 0,
        }
    }

    #[test]
    fn admin_flags_grant_access_without_rows() {
        let admin = user(true, false);
        assert_eq!(effective_role(&admin, None), Some(EffectiveRole::Admin));
        assert!(can_access(&admin, None, EffectiveRole::Professor));

        let root = user(false, true);
        assert_eq!(effective_role(&root, None), Some(EffectiveRole::SuperAdmin));
    }

    #[test]
    fn flags_outrank_per_case_rows() {
        let root = user(true, true);
        assert_eq!(
            effective_role(&root, Some(Role::Student)),
            Some(EffectiveRole::SuperAdmin)
        );
    }

    #[test]
    fn plain_user_follows_the_grant() {
        let plain = user(false, false);
        assert_eq!(effective_role(&plain, None), None);
        assert!(!can_access(&plain, None, EffectiveRole::Student));
        assert!(can_access(&plain, Some(Role::Student), EffectiveRole::Student));
        assert!(!can_access(&plain, Some(Role::Student), EffectiveRole::Professor));
        assert!(can_access(&plain, Some(Role::Professor), EffectiveRole::Professor));
    }

    #[test]
    fn management_requires_assignment_for_plain_admins() {
        let admin = user(true, false);
        assert!(!can_manage_case(&admin, None, false));
        assert!(can_manage_case(&admin, None, true));

        let root = user(false, true);
        assert!(can_manage_case(&root, None, false));

        let plain = user(false, false);
        assert!(can_manage_case(&plain, Some(Role::Professor), false));
        assert!(!can_manage_case(&plain, Some(Role::Student), false));
    }
}
