//! Core data model: desktop profiles and captured icon positions.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One desktop icon's captured location.
///
/// `index` is the icon's ordinal slot in the shell list view at capture time,
/// not a stable identifier; it is only meaningful against a list view holding
/// at least `index + 1` items. `name` is diagnostic only and never used for
/// matching on restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconPosition {
    pub index: u32,
    pub name: String,
    pub x: i32,
    pub y: i32,
}

/// One virtual desktop profile.
///
/// `is_active` is a cached flag; the source of truth is the OS registry and
/// the flag is re-derived on every read of the full list. `icon_positions` is
/// the complete snapshot as of the most recent deactivation and is replaced
/// wholesale on the next capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Desktop {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub is_active: bool,
    /// Empty string when no wallpaper is associated.
    #[serde(default)]
    pub wallpaper_path: String,
    #[serde(default)]
    pub icon_positions: Vec<IconPosition>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub created_at: String,
}

impl Desktop {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_active: false,
            wallpaper_path: String::new(),
            icon_positions: Vec::new(),
            protected: false,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn wallpaper(&self) -> Option<&str> {
        if self.wallpaper_path.is_empty() {
            None
        } else {
            Some(&self.wallpaper_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_desktop_defaults() {
        let d = Desktop::new("Work", r"C:\Desktops\Work");
        assert_eq!(d.name, "Work");
        assert!(!d.is_active);
        assert!(!d.protected);
        assert!(d.icon_positions.is_empty());
        assert!(d.wallpaper().is_none());
        assert!(!d.created_at.is_empty());
    }

    #[test]
    fn test_wallpaper_empty_string_is_none() {
        let mut d = Desktop::new("Work", r"C:\Desktops\Work");
        assert_eq!(d.wallpaper(), None);
        d.wallpaper_path = r"C:\Desktops\work.bmp".to_string();
        assert_eq!(d.wallpaper(), Some(r"C:\Desktops\work.bmp"));
    }

    #[test]
    fn test_desktop_json_field_names() {
        let mut d = Desktop::new("Games", r"C:\Desktops\Games");
        d.icon_positions.push(IconPosition {
            index: 0,
            name: "Recycle Bin".to_string(),
            x: 14,
            y: 7,
        });
        let json = serde_json::to_value(&d).unwrap();
        assert!(json.get("name").is_some());
        assert!(json.get("path").is_some());
        assert!(json.get("is_active").is_some());
        assert!(json.get("wallpaper_path").is_some());
        assert!(json.get("protected").is_some());
        assert!(json.get("created_at").is_some());
        let icons = json.get("icon_positions").unwrap().as_array().unwrap();
        assert_eq!(icons[0].get("index").unwrap().as_u64(), Some(0));
        assert_eq!(icons[0].get("x").unwrap().as_i64(), Some(14));
    }

    #[test]
    fn test_desktop_tolerates_missing_optional_fields() {
        let d: Desktop =
            serde_json::from_str(r#"{"name":"Old","path":"C:\\Desktops\\Old"}"#).unwrap();
        assert_eq!(d.name, "Old");
        assert!(!d.is_active);
        assert!(d.icon_positions.is_empty());
    }
}
