//! Presentation state derived from the settings document.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

use crate::model::{MediaRef, Settings};

/// Receives every settings value the cache decides is current.
pub trait ThemeSink: Send + Sync {
    fn apply(&self, settings: &Settings);
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Theme {
    pub vars: BTreeMap<&'static str, String>,
    pub logo: Option<MediaRef>,
    pub logo_dark: Option<MediaRef>,
    pub blog_title: String,
}

impl Theme {
    pub fn from_settings(s: &Settings) -> Self {
        let vars = BTreeMap::from([
            ("--accent-color", s.accent_color.clone()),
            ("--text-color", s.text_color.clone()),
            ("--background-color", s.background_color.clone()),
            ("--surface-color", s.surface_color.clone()),
        ]);
        Self {
            vars,
            logo: s.logo.clone(),
            logo_dark: s.logo_dark.clone(),
            blog_title: s.blog_title.clone(),
        }
    }

    pub fn accent_color(&self) -> Option<&str> {
        self.vars.get("--accent-color").map(String::as_str)
    }

    /// Render the custom properties as a `:root` block.
    pub fn to_css(&self) -> String {
        let mut css = String::from(":root {\n");
        for (name, value) in &self.vars {
            let _ = writeln!(css, "  {}: {};", name, value);
        }
        css.push_str("}\n");
        css
    }
}

/// Shared [`ThemeSink`] that keeps the latest theme for readers.
#[derive(Debug, Clone)]
pub struct ThemeState {
    current: Arc<RwLock<Theme>>,
}

impl Default for ThemeState {
    fn default() -> Self {
        Self {
            current: Arc::new(RwLock::new(Theme::from_settings(&Settings::default()))),
        }
    }
}

impl ThemeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Theme {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ThemeSink for ThemeState {
    fn apply(&self, settings: &Settings) {
        let theme = Theme::from_settings(settings);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = theme;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DEFAULT_ACCENT_COLOR;

    #[test]
    fn starts_with_defaults() {
        let state = ThemeState::new();
        assert_eq!(state.current().accent_color(), Some(DEFAULT_ACCENT_COLOR));
    }

    #[test]
    fn apply_replaces_theme() {
        let state = ThemeState::new();
        let settings = Settings {
            accent_color: "#112233".into(),
            ..Settings::default()
        };
        state.apply(&settings);
        assert_eq!(state.current().accent_color(), Some("#112233"));
    }

    #[test]
    fn css_lists_every_variable() {
        let css = Theme::from_settings(&Settings::default()).to_css();
        assert!(css.starts_with(":root {"));
        assert!(css.contains("  --accent-color: #3b82f6;"));
        assert!(css.contains("  --surface-color: #f4f4f5;"));
        assert!(css.trim_end().ends_with('}'));
    }
}
