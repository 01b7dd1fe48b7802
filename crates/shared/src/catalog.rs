//! Fixed vocabularies: the tag catalog and the thread categories.

use crate::domain::{Category, Tag};

const TAGS: [(&str, &str); 9] = [
    ("1", "Cybersecurity"),
    ("2", "Routing"),
    ("3", "Frontend"),
    ("4", "Backend"),
    ("5", "Azure"),
    ("6", "Machine Learning"),
    ("7", "Version Control"),
    ("8", "Networking Hardware"),
    ("9", "Unit Testing"),
];

pub fn tags() -> Vec<Tag> {
    TAGS.iter()
        .map(|(id, name)| Tag {
            id: (*id).to_string(),
            name: (*name).to_string(),
        })
        .collect()
}

pub fn tag_by_id(id: &str) -> Option<Tag> {
    TAGS.iter()
        .find(|(tag_id, _)| *tag_id == id)
        .map(|(id, name)| Tag {
            id: (*id).to_string(),
            name: (*name).to_string(),
        })
}

pub fn tag_by_name(name: &str) -> Option<Tag> {
    TAGS.iter()
        .find(|(_, tag_name)| tag_name.eq_ignore_ascii_case(name.trim()))
        .and_then(|(id, _)| tag_by_id(id))
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::SoftwareDevelopment,
        Category::NetworkingSecurity,
        Category::HardwareGadgets,
        Category::CloudComputing,
        Category::TechNewsTrends,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Category::SoftwareDevelopment => "Software Development",
            Category::NetworkingSecurity => "Networking & Security",
            Category::HardwareGadgets => "Hardware & Gadgets",
            Category::CloudComputing => "Cloud Computing",
            Category::TechNewsTrends => "Tech News & Trends",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::SoftwareDevelopment => {
                "Discussions on programming languages, development tools, and best practices."
            }
            Category::NetworkingSecurity => {
                "Topics related to network configuration and protection strategies."
            }
            Category::HardwareGadgets => {
                "A space for sharing advice on building, upgrading, and troubleshooting hardware."
            }
            Category::CloudComputing => {
                "Conversations about cloud platforms, services, and architecture."
            }
            Category::TechNewsTrends => {
                "Updates and discussions on the latest trends in the technology world."
            }
        }
    }

    /// URL form of the title: lowercase, `&` dropped, whitespace runs become `-`.
    pub fn slug(self) -> String {
        self.title()
            .replace('&', " ")
            .split_whitespace()
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Accepts a title or a slug, case-insensitively.
    pub fn parse(raw: &str) -> Option<Category> {
        let raw = raw.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.title().eq_ignore_ascii_case(raw) || c.slug().eq_ignore_ascii_case(raw))
    }
}
