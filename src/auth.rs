//! Login token collaborator.
//!
//! The private-message server wants an opaque session token instead of a
//! password. Obtaining one is an HTTP exchange that lives outside the core;
//! the manager only sees this trait. A provider returning `None` makes the
//! PM session raise `LoginFail` and skip the connection attempt.

/// Exchanges account credentials for a session token.
pub trait AuthProvider: Send {
    fn token(&mut self, name: &str, password: &str) -> Option<String>;
}

/// Hands out a token obtained ahead of time.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl AuthProvider for StaticToken {
    fn token(&mut self, _name: &str, _password: &str) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Never authenticates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthProvider for NoAuth {
    fn token(&mut self, _name: &str, _password: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_providers() {
        assert_eq!(StaticToken("abc".into()).token("bot", "pw").as_deref(), Some("abc"));
        assert_eq!(NoAuth.token("bot", "pw"), None);
    }
}
