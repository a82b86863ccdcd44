//! Transient user-facing messages. A notice expires on its own; there is no
//! persistent error state to clear.

use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeKind {
    MatchFailed,
    TransportFailed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone)]
pub struct NoticeBoard {
    ttl_ms: u64,
    current: Option<Notice>,
}

impl NoticeBoard {
    pub fn new(ttl_ms: u64) -> Self {
        Self { ttl_ms, current: None }
    }

    /// Replaces whatever notice is showing.
    pub fn post(&mut self, kind: NoticeKind, message: impl Into<String>, now_ms: u64) {
        self.current = Some(Notice {
            kind,
            message: message.into(),
            expires_at: now_ms.saturating_add(self.ttl_ms),
        });
    }

    pub fn post_error(&mut self, error: &Error, now_ms: u64) {
        let kind = match error {
            Error::IdentityMissing | Error::CapacityExceeded { .. } => NoticeKind::MatchFailed,
            Error::Transport(_) | Error::Codec(_) => NoticeKind::TransportFailed,
            _ => NoticeKind::Rejected,
        };
        self.post(kind, error.to_string(), now_ms);
    }

    pub fn current(&self, now_ms: u64) -> Option<&Notice> {
        self.current
            .as_ref()
            .filter(|notice| now_ms < notice.expires_at)
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
