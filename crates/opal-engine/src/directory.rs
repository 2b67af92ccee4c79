//! The identity directory: who is operating the engine.
//!
//! Permission checks and audit stamps need a current user; where that user
//! comes from (a session, a service account, a test fixture) is not the
//! engine's business. The directory is the seam.

use opal_types::UserId;

/// Source of user identities for permission checks and audit stamps.
pub trait IdentityDirectory {
    /// The user on whose behalf the engine reads and writes.
    fn current_user(&self) -> UserId;

    /// The user recorded in audit stamps. Defaults to the current user;
    /// override when modifications are attributed to a service identity.
    fn user_for_modifications(&self) -> UserId {
        self.current_user()
    }
}

/// A directory with one fixed user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticDirectory {
    current: UserId,
}

impl StaticDirectory {
    pub fn new(current: UserId) -> Self {
        Self { current }
    }

    /// A directory for the anonymous user.
    pub fn anonymous() -> Self {
        Self {
            current: UserId::anonymous(),
        }
    }
}

impl IdentityDirectory for StaticDirectory {
    fn current_user(&self) -> UserId {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_directory_returns_its_user() {
        let user = UserId::new();
        let directory = StaticDirectory::new(user);
        assert_eq!(directory.current_user(), user);
        assert_eq!(directory.user_for_modifications(), user);
    }

    #[test]
    fn anonymous_directory() {
        let directory = StaticDirectory::anonymous();
        assert!(directory.current_user().is_anonymous());
    }
}
