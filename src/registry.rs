//! The OS notion of "the desktop folder".
//!
//! Two per-user registry values carry the desktop directory: an
//! expandable-string value under `User Shell Folders` and a plain-string one
//! under `Shell Folders`. They are always written together. Comparison
//! against profile paths is environment-expanded, separator-normalized and
//! case-insensitive, because the registry frequently stores
//! `%USERPROFILE%\Desktop` while profiles store literal paths.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::registry::{BACKUP_KEEP, BACKUP_PREFIX};
use crate::traits::DesktopPathValues;

/// Expand `%NAME%` references from the process environment. Unknown names
/// are left in place, matching shell behavior.
pub fn expand_env(input: &str) -> String {
    expand_env_with(input, |name| std::env::var(name).ok())
}

fn expand_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('%');
                        out.push_str(name);
                        out.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Canonical form used for all desktop-path comparisons: env-expanded,
/// forward slashes folded to backslashes, trailing separators trimmed,
/// lowercased.
pub fn normalize_path(input: &str) -> String {
    let expanded = expand_env(input);
    let unified = expanded.replace('/', "\\");
    unified.trim_end_matches('\\').to_lowercase()
}

pub fn paths_equivalent(a: &str, b: &str) -> bool {
    normalize_path(a) == normalize_path(b)
}

/// Snapshot of both registry values taken before a switch mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryBackup {
    pub modern: Option<String>,
    pub legacy: Option<String>,
    pub taken_at: String,
}

/// Write a backup snapshot into `dir` and prune older snapshots down to the
/// retention limit. Returns the snapshot path.
pub fn write_backup(dir: &Path, values: &DesktopPathValues) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("cannot create backup directory {}", dir.display()))?;
    let backup = RegistryBackup {
        modern: values.modern.clone(),
        legacy: values.legacy.clone(),
        taken_at: Utc::now().to_rfc3339(),
    };
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("{BACKUP_PREFIX}{stamp}.json"));
    fs::write(&path, serde_json::to_string_pretty(&backup)?)
        .with_context(|| format!("cannot write registry backup {}", path.display()))?;
    debug!(backup = %path.display(), "registry values backed up");

    if let Err(e) = prune_backups(dir, BACKUP_KEEP) {
        warn!(dir = %dir.display(), error = %e, "backup pruning failed");
    }
    Ok(path)
}

/// Delete all but the newest `keep` snapshots. The timestamped names sort
/// lexically, so name order is age order.
pub fn prune_backups(dir: &Path, keep: usize) -> std::io::Result<usize> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(BACKUP_PREFIX) && name.ends_with(".json"))
        .collect();
    names.sort();
    names.reverse();

    let mut removed = 0;
    for stale in names.iter().skip(keep) {
        fs::remove_file(dir.join(stale))?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(windows)]
pub use win::ShellFolders;

#[cfg(windows)]
mod win {
    use anyhow::{Context, Result, anyhow};
    use tracing::info;
    use windows::Win32::System::Registry::{
        HKEY, HKEY_CURRENT_USER, KEY_QUERY_VALUE, KEY_SET_VALUE, REG_EXPAND_SZ, REG_SAM_FLAGS,
        REG_SZ, REG_VALUE_TYPE, RegCloseKey, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        SPI_SETDESKWALLPAPER, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE, SystemParametersInfoW,
    };
    use windows::core::PCWSTR;

    use crate::constants::registry::{DESKTOP_VALUE, SHELL_FOLDERS, USER_SHELL_FOLDERS};
    use crate::traits::{DesktopBackend, DesktopPathValues};

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Registry key handle closed on drop.
    struct OwnedKey(HKEY);

    impl Drop for OwnedKey {
        fn drop(&mut self) {
            unsafe {
                let _ = RegCloseKey(self.0);
            }
        }
    }

    fn open_key(subkey: &str, sam: REG_SAM_FLAGS) -> Result<OwnedKey> {
        let wide = to_wide(subkey);
        let mut hkey = HKEY::default();
        let status = unsafe {
            RegOpenKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR(wide.as_ptr()),
                Some(0),
                sam,
                &mut hkey,
            )
        };
        status
            .ok()
            .map_err(|e| anyhow!("cannot open registry key {subkey}: {e}"))?;
        Ok(OwnedKey(hkey))
    }

    fn query_string(key: &OwnedKey, value: &str) -> Option<String> {
        let name = to_wide(value);
        let mut len = 0u32;
        let probe = unsafe {
            RegQueryValueExW(key.0, PCWSTR(name.as_ptr()), None, None, None, Some(&mut len))
        };
        if probe.is_err() || len == 0 {
            return None;
        }
        let mut buf = vec![0u8; len as usize];
        let mut written = len;
        let status = unsafe {
            RegQueryValueExW(
                key.0,
                PCWSTR(name.as_ptr()),
                None,
                None,
                Some(buf.as_mut_ptr()),
                Some(&mut written),
            )
        };
        if status.is_err() {
            return None;
        }
        let units: Vec<u16> = buf[..written as usize]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
        Some(String::from_utf16_lossy(&units[..end]))
    }

    fn set_string(key: &OwnedKey, value: &str, kind: REG_VALUE_TYPE, data: &str) -> Result<()> {
        let name = to_wide(value);
        let wide = to_wide(data);
        let bytes =
            unsafe { std::slice::from_raw_parts(wide.as_ptr() as *const u8, wide.len() * 2) };
        let status =
            unsafe { RegSetValueExW(key.0, PCWSTR(name.as_ptr()), None, kind, Some(bytes)) };
        status
            .ok()
            .map_err(|e| anyhow!("cannot write registry value {value}: {e}"))
    }

    /// Live per-user shell-folder backend.
    pub struct ShellFolders;

    impl DesktopBackend for ShellFolders {
        fn desktop_path(&self) -> Result<String> {
            let values = self.raw_desktop_values()?;
            values
                .modern
                .map(|raw| super::expand_env(&raw))
                .or(values.legacy)
                .context("no desktop path registered for the current user")
        }

        fn raw_desktop_values(&self) -> Result<DesktopPathValues> {
            let modern = open_key(USER_SHELL_FOLDERS, KEY_QUERY_VALUE)
                .ok()
                .and_then(|key| query_string(&key, DESKTOP_VALUE));
            let legacy = open_key(SHELL_FOLDERS, KEY_QUERY_VALUE)
                .ok()
                .and_then(|key| query_string(&key, DESKTOP_VALUE));
            Ok(DesktopPathValues { modern, legacy })
        }

        fn set_desktop_path(&self, path: &str) -> Result<()> {
            let modern = open_key(USER_SHELL_FOLDERS, KEY_SET_VALUE)?;
            set_string(&modern, DESKTOP_VALUE, REG_EXPAND_SZ, path)?;
            let legacy = open_key(SHELL_FOLDERS, KEY_SET_VALUE)?;
            set_string(&legacy, DESKTOP_VALUE, REG_SZ, path)?;
            info!(path = %path, "desktop path registered in both shell-folder values");
            Ok(())
        }

        fn set_wallpaper(&self, path: &str) -> Result<()> {
            let wide = to_wide(path);
            unsafe {
                SystemParametersInfoW(
                    SPI_SETDESKWALLPAPER,
                    0,
                    Some(wide.as_ptr() as *mut core::ffi::c_void),
                    SPIF_UPDATEINIFILE | SPIF_SENDCHANGE,
                )
            }
            .with_context(|| format!("cannot apply wallpaper {path}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_env(name: &str) -> Option<String> {
        match name {
            "USERPROFILE" => Some(r"C:\Users\casey".to_string()),
            "SYSTEMDRIVE" => Some("C:".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_env_replaces_known_names() {
        assert_eq!(
            expand_env_with(r"%USERPROFILE%\Desktop", fake_env),
            r"C:\Users\casey\Desktop"
        );
        assert_eq!(
            expand_env_with(r"%SYSTEMDRIVE%\Desktops\%USERPROFILE%", fake_env),
            r"C:\Desktops\C:\Users\casey"
        );
    }

    #[test]
    fn test_expand_env_leaves_unknown_names() {
        assert_eq!(
            expand_env_with(r"%NOPE%\Desktop", fake_env),
            r"%NOPE%\Desktop"
        );
    }

    #[test]
    fn test_expand_env_unpaired_percent_passes_through() {
        assert_eq!(expand_env_with("50% done", |_| None), "50% done");
    }

    #[test]
    fn test_normalize_folds_case_separators_and_trailing_slash() {
        assert_eq!(normalize_path(r"C:\Desktops\Work\"), r"c:\desktops\work");
        assert_eq!(normalize_path("C:/Desktops/Work"), r"c:\desktops\work");
    }

    #[test]
    fn test_paths_equivalent_is_case_insensitive() {
        assert!(paths_equivalent(r"C:\DESKTOPS\Work", r"c:\desktops\work\"));
        assert!(!paths_equivalent(r"C:\Desktops\Work", r"C:\Desktops\Games"));
    }

    #[test]
    fn test_write_backup_and_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let values = DesktopPathValues {
            modern: Some(r"%USERPROFILE%\Desktop".into()),
            legacy: Some(r"C:\Users\casey\Desktop".into()),
        };
        let path = write_backup(dir.path(), &values).unwrap();
        assert!(path.exists());
        let backup: RegistryBackup =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(backup.modern.as_deref(), Some(r"%USERPROFILE%\Desktop"));

        for i in 0..5 {
            fs::write(
                dir.path().join(format!("{BACKUP_PREFIX}20200101-00000{i}.json")),
                "{}",
            )
            .unwrap();
        }
        let removed = prune_backups(dir.path(), 3).unwrap();
        assert_eq!(removed, 3);
        let left = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(left, 3);
        // The real snapshot (newest name) survives pruning.
        assert!(path.exists());
    }
}
