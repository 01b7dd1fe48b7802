use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Category, CommentId, Tag, Thread, ThreadId, UserRef};

/// Fields submitted when creating a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDraft {
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(default)]
    pub is_qna: bool,
    #[serde(default)]
    pub tag_ids: Vec<String>,
}

/// Fields a thread manager may change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadEdit {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub is_qna: bool,
    #[serde(default)]
    pub tag_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCommentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkAnsweredRequest {
    pub comment_id: CommentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub id: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: Category,
    pub title: String,
    pub slug: String,
    pub description: String,
}

impl From<Category> for CategorySummary {
    fn from(category: Category) -> Self {
        Self {
            category,
            title: category.title().to_string(),
            slug: category.slug(),
            description: category.description().to_string(),
        }
    }
}

/// Listing row for thread indexes; omits the comment bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub title: String,
    pub category: Category,
    pub creator: UserRef,
    pub creation_date: DateTime<Utc>,
    pub tags: Vec<Tag>,
    pub comment_count: usize,
    pub is_qna: bool,
    pub is_answered: bool,
    pub is_locked: bool,
}

impl From<&Thread> for ThreadSummary {
    fn from(thread: &Thread) -> Self {
        Self {
            id: thread.id,
            title: thread.title.clone(),
            category: thread.category,
            creator: thread.creator.clone(),
            creation_date: thread.creation_date,
            tags: thread.tags.clone(),
            comment_count: thread.comments.len(),
            is_qna: thread.is_qna,
            is_answered: thread.is_answered,
            is_locked: thread.is_locked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_defaults_optional_fields() {
        let draft: ThreadDraft = serde_json::from_str(
            r#"{"title":"Routing tables explained","description":"How are routes chosen?","category":"networking_security"}"#,
        )
        .expect("draft");
        assert!(!draft.is_qna);
        assert!(draft.tag_ids.is_empty());
        assert_eq!(draft.category, Category::NetworkingSecurity);
    }

    #[test]
    fn category_summary_carries_slug() {
        let summary = CategorySummary::from(Category::CloudComputing);
        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(json["slug"], "cloud-computing");
        assert_eq!(json["category"], "cloud_computing");
    }
}
