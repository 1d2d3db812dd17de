use std::collections::HashSet;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Resolved caller role. Admin bypasses booking-ownership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// Identity resolved at connection startup. The engine trusts this — the
/// auth layer is the only place credentials are checked.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Startup-auth configuration: one shared password per role, plus the set of
/// usernames that resolve to the admin role.
#[derive(Debug)]
pub struct AuthConfig {
    user_password: String,
    admin_password: String,
    admins: HashSet<String>,
}

impl AuthConfig {
    pub fn new(
        user_password: String,
        admin_password: String,
        admins: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            user_password,
            admin_password,
            admins: admins.into_iter().collect(),
        }
    }

    pub fn role_for(&self, user: &str) -> Role {
        if self.admins.contains(user) {
            Role::Admin
        } else {
            Role::User
        }
    }

    pub fn session_for(&self, user: &str) -> Session {
        Session {
            user: user.to_string(),
            role: self.role_for(user),
        }
    }

    fn password_for(&self, user: &str) -> &str {
        match self.role_for(user) {
            Role::Admin => &self.admin_password,
            Role::User => &self.user_password,
        }
    }
}

#[derive(Debug)]
pub struct CampdAuthSource {
    config: std::sync::Arc<AuthConfig>,
}

impl CampdAuthSource {
    pub fn new(config: std::sync::Arc<AuthConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AuthSource for CampdAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user: &str = login.user().map(|u| u.as_ref()).unwrap_or_default();
        let expected = self.config.password_for(user);
        Ok(Password::new(None, expected.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_resolution() {
        let cfg = AuthConfig::new("camper".into(), "ranger".into(), ["admin".to_string()]);
        assert_eq!(cfg.role_for("admin"), Role::Admin);
        assert_eq!(cfg.role_for("alice"), Role::User);
        assert!(cfg.session_for("admin").is_admin());
        assert!(!cfg.session_for("alice").is_admin());
    }

    #[test]
    fn password_per_role() {
        let cfg = AuthConfig::new("camper".into(), "ranger".into(), ["admin".to_string()]);
        assert_eq!(cfg.password_for("alice"), "camper");
        assert_eq!(cfg.password_for("admin"), "ranger");
    }
}
