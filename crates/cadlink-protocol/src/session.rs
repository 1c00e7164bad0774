//! External session identifiers and the document labels derived from them.

use crate::{NEW_SESSION, NEW_SESSION_LABEL, SESSION_LABEL_ID_CHARS, SESSION_LABEL_PREFIX};

/// A session id as sent by the producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionRef {
    /// The `"new"` sentinel: start a fresh, not yet persisted session.
    New,
    /// A persisted session id.
    Existing(String),
}

impl SessionRef {
    /// Interpret a raw session id, mapping the sentinel to [`SessionRef::New`].
    pub fn parse(id: &str) -> Self {
        if id == NEW_SESSION {
            Self::New
        } else {
            Self::Existing(id.to_string())
        }
    }

    /// Interpret an optional previous-session id. Absent, empty and the
    /// sentinel all mean there is nothing to persist.
    pub fn previous(id: Option<&str>) -> Option<Self> {
        match id {
            None | Some("") => None,
            Some(id) => match Self::parse(id) {
                Self::New => None,
                existing => Some(existing),
            },
        }
    }

    /// The persisted id, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::New => None,
            Self::Existing(id) => Some(id),
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New)
    }

    /// Label of the document bound to this session. Only the first
    /// [`SESSION_LABEL_ID_CHARS`] characters of the id are kept.
    pub fn display_label(&self) -> String {
        match self {
            Self::New => NEW_SESSION_LABEL.to_string(),
            Self::Existing(id) => {
                let short: String = id.chars().take(SESSION_LABEL_ID_CHARS).collect();
                format!("{SESSION_LABEL_PREFIX}{short}")
            }
        }
    }
}

impl std::fmt::Display for SessionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "{NEW_SESSION}"),
            Self::Existing(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_sharing_a_prefix_share_a_label() {
        let a = SessionRef::parse("abcdefgh-1111");
        let b = SessionRef::parse("abcdefgh-2222");
        assert_eq!(a.display_label(), "Chat: abcdefgh");
        assert_eq!(a.display_label(), b.display_label());
    }

    #[test]
    fn test_sentinel_parses_as_new() {
        assert_eq!(SessionRef::parse("new"), SessionRef::New);
        assert_eq!(
            SessionRef::parse("abc123"),
            SessionRef::Existing("abc123".to_string())
        );
    }

    #[test]
    fn test_previous_ignores_sentinel_and_empty() {
        assert_eq!(SessionRef::previous(None), None);
        assert_eq!(SessionRef::previous(Some("")), None);
        assert_eq!(SessionRef::previous(Some("new")), None);
        assert_eq!(
            SessionRef::previous(Some("s1")),
            Some(SessionRef::Existing("s1".to_string()))
        );
    }

    #[test]
    fn test_display_label_truncates_id() {
        assert_eq!(SessionRef::New.display_label(), "New Chat");
        assert_eq!(
            SessionRef::parse("0f8fad5b-d9cb-469f-a165-70867728950e").display_label(),
            "Chat: 0f8fad5b"
        );
        assert_eq!(SessionRef::parse("abc").display_label(), "Chat: abc");
    }

    #[test]
    fn test_display_label_respects_char_boundaries() {
        assert_eq!(
            SessionRef::parse("ééééééééé").display_label(),
            "Chat: éééééééé"
        );
    }
}
