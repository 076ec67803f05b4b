//! The authentication signal consumed by the inbox.
//!
//! Issued elsewhere (the auth wrapper around the backend SDK) and
//! delivered over a `tokio::sync::watch` channel; the inbox only reads it.

/// Who is signed in, and whether the session finished hydrating from
/// persistent storage. Aggregation must not start on a half-restored
/// session: identity can flip from `None` to `Some` moments later.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user_id: Option<String>,
    pub hydrated: bool,
}

impl Session {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            hydrated: true,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            user_id: None,
            hydrated: true,
        }
    }

    /// The identity the inbox may aggregate for, once hydration completed.
    pub fn active_user(&self) -> Option<&str> {
        if self.hydrated {
            self.user_id.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhydrated_session_exposes_no_identity() {
        let session = Session {
            user_id: Some("u1".into()),
            hydrated: false,
        };
        assert_eq!(session.active_user(), None);
        assert_eq!(Session::signed_in("u1").active_user(), Some("u1"));
        assert_eq!(Session::signed_out().active_user(), None);
    }
}
