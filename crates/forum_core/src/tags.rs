use shared::domain::{Tag, Thread};

/// Selected tags, kept in insertion order with set semantics by tag id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    selected: Vec<Tag>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> &[Tag] {
        &self.selected
    }

    /// The first selected tag, for callers that only support a single filter.
    pub fn selected_tag(&self) -> Option<&Tag> {
        self.selected.first()
    }

    pub fn is_selected(&self, tag_id: &str) -> bool {
        self.selected.iter().any(|t| t.id == tag_id)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Removes the tag if selected, appends it otherwise. Returns whether it is now selected.
    pub fn toggle(&mut self, tag: Tag) -> bool {
        if self.is_selected(&tag.id) {
            self.selected.retain(|t| t.id != tag.id);
            false
        } else {
            self.selected.push(tag);
            true
        }
    }

    /// Replaces the selection with at most one tag.
    pub fn select_only(&mut self, tag: Option<Tag>) {
        self.selected.clear();
        self.selected.extend(tag);
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn matches(&self, thread: &Thread) -> bool {
        self.selected.is_empty() || self.selected.iter().any(|tag| thread.has_tag(&tag.id))
    }

    pub fn apply(&self, threads: &[Thread]) -> Vec<Thread> {
        filter_threads(threads, &self.selected)
    }
}

/// Threads carrying at least one of `selected` (match-any); every thread when nothing is selected.
pub fn filter_threads(threads: &[Thread], selected: &[Tag]) -> Vec<Thread> {
    if selected.is_empty() {
        return threads.to_vec();
    }
    threads
        .iter()
        .filter(|thread| selected.iter().any(|tag| thread.has_tag(&tag.id)))
        .cloned()
        .collect()
}
