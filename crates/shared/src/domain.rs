use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_newtype!(ThreadId);
id_newtype!(CommentId);

/// Identity issued by the external identity provider. Opaque to the forum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SoftwareDevelopment,
    NetworkingSecurity,
    HardwareGadgets,
    CloudComputing,
    TechNewsTrends,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub is_moderator: bool,
}

impl User {
    pub fn to_ref(&self) -> UserRef {
        UserRef {
            id: self.id.clone(),
            username: self.username.clone(),
        }
    }
}

/// Author snapshot embedded in threads and comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub content: String,
    pub creator: UserRef,
    pub creation_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub creator: UserRef,
    pub creation_date: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub is_qna: bool,
    pub is_answered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_comment_id: Option<CommentId>,
    pub is_locked: bool,
    /// Bumped by every store write; used as the expected version of the next write.
    pub version: u64,
}

impl Thread {
    pub fn has_tag(&self, tag_id: &str) -> bool {
        self.tags.iter().any(|t| t.id == tag_id)
    }

    pub fn comment(&self, comment_id: CommentId) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }

    pub fn answered_comment(&self) -> Option<&Comment> {
        self.answered_comment_id.and_then(|id| self.comment(id))
    }

    pub fn is_created_by(&self, user_id: &UserId) -> bool {
        &self.creator.id == user_id
    }

    /// `is_answered` mirrors `answered_comment_id`, which must point into `comments`.
    pub fn answer_state_is_consistent(&self) -> bool {
        match self.answered_comment_id {
            Some(id) => self.is_answered && self.comment(id).is_some(),
            None => !self.is_answered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> UserRef {
        UserRef {
            id: UserId::new("u-1"),
            username: "alice".into(),
        }
    }

    fn thread_with(comments: Vec<Comment>) -> Thread {
        Thread {
            id: ThreadId::new(),
            title: "How do I configure routing?".into(),
            description: "Looking for advice on static routes.".into(),
            category: Category::NetworkingSecurity,
            creator: author(),
            creation_date: Utc::now(),
            comments,
            tags: Vec::new(),
            is_qna: true,
            is_answered: false,
            answered_comment_id: None,
            is_locked: false,
            version: 1,
        }
    }

    #[test]
    fn answer_state_requires_comment_in_thread() {
        let comment = Comment {
            id: CommentId::new(),
            content: "use ip route".into(),
            creator: author(),
            creation_date: Utc::now(),
        };
        let mut thread = thread_with(vec![comment.clone()]);
        assert!(thread.answer_state_is_consistent());

        thread.is_answered = true;
        thread.answered_comment_id = Some(comment.id);
        assert!(thread.answer_state_is_consistent());
        assert_eq!(thread.answered_comment(), Some(&comment));

        thread.answered_comment_id = Some(CommentId::new());
        assert!(!thread.answer_state_is_consistent());

        thread.answered_comment_id = None;
        assert!(!thread.answer_state_is_consistent());
    }

    #[test]
    fn ids_round_trip_through_strings() {
        let id = ThreadId::new();
        let parsed: ThreadId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<CommentId>().is_err());
    }
}
