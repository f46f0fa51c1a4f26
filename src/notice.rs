//! User-facing notices.
//!
//! Every failure the storefront can hit ends up as a dismissible [`Notice`]; none of them
//! propagate past the call site that triggered them.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Signing in resolves it.
    AuthenticationRequired,
    /// Local input problem, fixed by editing the form.
    Validation,
    /// The backend said no; the message is its own.
    Rejected,
    /// Network or boundary failure; retrying is safe.
    Transport,
    NotFound,
    Info,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeAction {
    SignIn,
    Retry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub action: Option<NoticeAction>,
}

impl Notice {
    fn new(kind: NoticeKind, message: impl Into<String>, action: Option<NoticeAction>) -> Self {
        Self { kind, message: message.into(), action }
    }

    pub fn sign_in(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::AuthenticationRequired, message, Some(NoticeAction::SignIn))
    }
    pub fn validation(message: impl Into<String>) -> Self { Self::new(NoticeKind::Validation, message, None) }
    pub fn rejected(message: impl Into<String>) -> Self { Self::new(NoticeKind::Rejected, message, None) }
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Transport, message, Some(NoticeAction::Retry))
    }
    pub fn not_found(message: impl Into<String>) -> Self { Self::new(NoticeKind::NotFound, message, None) }
    pub fn info(message: impl Into<String>) -> Self { Self::new(NoticeKind::Info, message, None) }
}
