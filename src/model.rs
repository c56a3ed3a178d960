use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_ACCENT_COLOR: &str = "#3b82f6";
pub const DEFAULT_TEXT_COLOR: &str = "#ffffff";
pub const DEFAULT_BACKGROUND_COLOR: &str = "#ffffff";
pub const DEFAULT_SURFACE_COLOR: &str = "#f4f4f5";
pub const DEFAULT_BLOG_TITLE: &str = "My Blog";

static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("valid color regex"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    Published,
    Scheduled,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Published => "published",
            ContentStatus::Scheduled => "scheduled",
        }
    }
}

/// An article as stored in the articles collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub slug: String,
    /// Structured editor document, stored as-is.
    #[serde(default)]
    pub body: Value,
    pub status: ContentStatus,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    /// Scheduled and its publication time has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ContentStatus::Scheduled
            && self.scheduled_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// The singleton settings document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub accent_color: String,
    pub text_color: String,
    pub background_color: String,
    pub surface_color: String,
    pub logo: Option<MediaRef>,
    pub logo_dark: Option<MediaRef>,
    pub blog_title: String,
    pub blog_description: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: None,
            accent_color: DEFAULT_ACCENT_COLOR.to_string(),
            text_color: DEFAULT_TEXT_COLOR.to_string(),
            background_color: DEFAULT_BACKGROUND_COLOR.to_string(),
            surface_color: DEFAULT_SURFACE_COLOR.to_string(),
            logo: None,
            logo_dark: None,
            blog_title: DEFAULT_BLOG_TITLE.to_string(),
            blog_description: String::new(),
        }
    }
}

impl Settings {
    /// Shallow merge: every field present in `patch` replaces ours.
    pub fn merge(&mut self, patch: &SettingsPatch) {
        if let Some(v) = &patch.accent_color {
            self.accent_color = v.clone();
        }
        if let Some(v) = &patch.text_color {
            self.text_color = v.clone();
        }
        if let Some(v) = &patch.background_color {
            self.background_color = v.clone();
        }
        if let Some(v) = &patch.surface_color {
            self.surface_color = v.clone();
        }
        if let Some(v) = &patch.logo {
            self.logo = v.clone();
        }
        if let Some(v) = &patch.logo_dark {
            self.logo_dark = v.clone();
        }
        if let Some(v) = &patch.blog_title {
            self.blog_title = v.clone();
        }
        if let Some(v) = &patch.blog_description {
            self.blog_description = v.clone();
        }
    }
}

/// Partial update of [`Settings`]. Logos are tri-state: absent leaves the
/// logo alone, `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accent_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_color: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub logo: Option<Option<MediaRef>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub logo_dark: Option<Option<MediaRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blog_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blog_description: Option<String>,
}

// A present key (even `null`) becomes `Some`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == SettingsPatch::default()
    }

    /// Overlay `other` on top of `self`, later fields winning.
    pub fn combine(&mut self, other: &SettingsPatch) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field.clone();
                })*
            };
        }
        take!(
            accent_color,
            text_color,
            background_color,
            surface_color,
            logo,
            logo_dark,
            blog_title,
            blog_description
        );
    }

    pub fn validate(&self) -> Result<(), String> {
        let colors = [
            ("accentColor", &self.accent_color),
            ("textColor", &self.text_color),
            ("backgroundColor", &self.background_color),
            ("surfaceColor", &self.surface_color),
        ];
        for (name, value) in colors {
            if let Some(v) = value {
                if !HEX_COLOR.is_match(v) {
                    return Err(format!("{} must be a hex color, got '{}'", name, v));
                }
            }
        }
        if let Some(title) = &self.blog_title {
            if title.trim().is_empty() {
                return Err("blogTitle must be non-empty".into());
            }
        }
        Ok(())
    }
}

/// One article moved from scheduled to published by a sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishedArticle {
    pub id: String,
    pub title: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}
