use thiserror::Error;

use crate::{catalog, domain::Tag};

pub const MIN_TITLE_CHARS: usize = 10;
pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const MAX_COMMENT_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title must be at least {} characters", MIN_TITLE_CHARS)]
    TitleTooShort,
    #[error("description must be at least {} characters", MIN_DESCRIPTION_CHARS)]
    DescriptionTooShort,
    #[error("unknown tag id '{0}'")]
    UnknownTag(String),
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("comment cannot be empty")]
    EmptyComment,
    #[error("comment exceeds {} characters", MAX_COMMENT_CHARS)]
    CommentTooLong,
}

pub fn validate_title(title: &str) -> Result<String, ValidationError> {
    let title = title.trim();
    if title.chars().count() < MIN_TITLE_CHARS {
        return Err(ValidationError::TitleTooShort);
    }
    Ok(title.to_string())
}

pub fn validate_description(description: &str) -> Result<String, ValidationError> {
    let description = description.trim();
    if description.chars().count() < MIN_DESCRIPTION_CHARS {
        return Err(ValidationError::DescriptionTooShort);
    }
    Ok(description.to_string())
}

/// Resolves tag ids against the catalog, keeping first-seen order and dropping duplicates.
pub fn resolve_tags(tag_ids: &[String]) -> Result<Vec<Tag>, ValidationError> {
    let mut tags: Vec<Tag> = Vec::with_capacity(tag_ids.len());
    for id in tag_ids {
        let tag = catalog::tag_by_id(id.trim())
            .ok_or_else(|| ValidationError::UnknownTag(id.clone()))?;
        if !tags.iter().any(|t| t.id == tag.id) {
            tags.push(tag);
        }
    }
    Ok(tags)
}

pub fn validate_comment(content: &str) -> Result<String, ValidationError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ValidationError::EmptyComment);
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(ValidationError::CommentTooLong);
    }
    Ok(content.to_string())
}
