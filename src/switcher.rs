//! The desktop-switch state machine and profile operations.
//!
//! A switch runs validate → backup → transition helper → icon capture →
//! registry swap, with the shell restart owned by the caller and
//! [`DesktopSwitcher::sync_after_restart`] as the separate re-entry point.
//! Any fatal step aborts back to a safe prior state; a failed registry swap
//! rolls the active flag back so the pre-switch desktop stays current.
//!
//! The orchestrator is generic over [`DesktopBackend`] and [`IconSurface`],
//! keeping it independent of the live registry and shell.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::constants::baseline;
use crate::registry::{expand_env, paths_equivalent, write_backup};
use crate::store::{DesktopStore, StoreError};
use crate::traits::{DesktopBackend, IconSurface, RestoreOutcome};
use crate::types::Desktop;

#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("registry write failed: {0}")]
    Registry(String),
    #[error("no desktop named '{0}'")]
    UnknownDesktop(String),
    #[error("desktop '{0}' is protected")]
    Protected(String),
    #[error("a desktop named '{0}' already exists")]
    DuplicateName(String),
    #[error("cannot delete the active desktop '{0}'")]
    DeleteActive(String),
    #[error("cannot prepare desktop directory {path}: {source}")]
    Path {
        path: String,
        source: std::io::Error,
    },
}

/// Caller's answer when a switch target's directory no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPathDecision {
    /// Recreate the directory and continue the switch.
    Recreate,
    /// Drop the now-invalid profile from the store and abort.
    Forget,
    /// Abort without changes.
    Abort,
}

/// Non-fatal results of a switch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched { from: Option<String>, to: String },
    AlreadyActive(String),
    NotFound(String),
    Aborted,
}

/// What a post-restart resynchronization did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub desktop: Option<String>,
    pub wallpaper_applied: bool,
    pub icons: RestoreOutcome,
}

pub struct DesktopSwitcher<B: DesktopBackend, I: IconSurface> {
    store: DesktopStore,
    backend: B,
    icons: I,
    backup_dir: PathBuf,
    transition_helper: Option<PathBuf>,
}

impl<B: DesktopBackend, I: IconSurface> DesktopSwitcher<B, I> {
    pub fn new(store: DesktopStore, backend: B, icons: I, backup_dir: PathBuf) -> Self {
        Self {
            store,
            backend,
            icons,
            backup_dir,
            transition_helper: None,
        }
    }

    /// Attach an optional visual-transition helper executable, launched as an
    /// independent process at the start of each switch.
    pub fn with_transition_helper(mut self, helper: PathBuf) -> Self {
        self.transition_helper = Some(helper);
        self
    }

    /// All profiles, with `is_active` re-derived from the registered desktop
    /// path on every call.
    ///
    /// Note: this read has a documented write side effect. When the cached
    /// flags have drifted from the registry (external edit, crash mid-switch)
    /// the correction is persisted immediately, so the store self-heals on
    /// the next read instead of staying wrong until a switch.
    pub fn desktops(&mut self) -> Result<Vec<Desktop>, SwitchError> {
        let mut desktops = self.store.load()?;
        match self.backend.desktop_path() {
            Ok(live) => {
                let mut changed = false;
                for desktop in &mut desktops {
                    let should = paths_equivalent(&desktop.path, &live);
                    if desktop.is_active != should {
                        desktop.is_active = should;
                        changed = true;
                    }
                }
                if changed {
                    info!("active flags drifted from registry, persisting correction");
                    self.store.save(&desktops)?;
                }
            }
            Err(e) => {
                warn!(error = %e, "registry unreadable, keeping stored active flags");
            }
        }
        Ok(desktops)
    }

    /// First-run setup: snapshot the pre-tool system state as a protected,
    /// active profile. Returns whether a profile was created.
    pub fn ensure_baseline(&mut self) -> Result<bool, SwitchError> {
        let desktops = self.store.load()?;
        if !desktops.is_empty() {
            return Ok(false);
        }
        let current = self
            .backend
            .desktop_path()
            .map_err(|e| SwitchError::Registry(e.to_string()))?;
        let mut original = Desktop::new(baseline::NAME, current);
        original.protected = true;
        original.is_active = true;
        info!(name = %original.name, path = %original.path, "created protected baseline profile");
        self.store.save(&[original])?;
        Ok(true)
    }

    pub fn create(&mut self, name: &str, path: &str) -> Result<(), SwitchError> {
        let mut desktops = self.desktops()?;
        if desktops.iter().any(|d| d.name == name) {
            return Err(SwitchError::DuplicateName(name.to_string()));
        }
        let expanded = expand_env(path);
        fs::create_dir_all(&expanded).map_err(|source| SwitchError::Path {
            path: expanded.clone(),
            source,
        })?;
        desktops.push(Desktop::new(name, path));
        self.store.save(&desktops)?;
        info!(name = %name, path = %path, "desktop created");
        Ok(())
    }

    /// Delete a profile. Refused for the active profile and for protected
    /// ones; the profile's directory and files are left on disk.
    pub fn delete(&mut self, name: &str) -> Result<(), SwitchError> {
        let mut desktops = self.desktops()?;
        let idx = desktops
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| SwitchError::UnknownDesktop(name.to_string()))?;
        if desktops[idx].protected {
            return Err(SwitchError::Protected(name.to_string()));
        }
        if desktops[idx].is_active {
            return Err(SwitchError::DeleteActive(name.to_string()));
        }
        desktops.remove(idx);
        self.store.save(&desktops)?;
        info!(name = %name, "desktop deleted");
        Ok(())
    }

    pub fn rename(&mut self, name: &str, new_name: &str) -> Result<(), SwitchError> {
        let mut desktops = self.desktops()?;
        if desktops.iter().any(|d| d.name == new_name) {
            return Err(SwitchError::DuplicateName(new_name.to_string()));
        }
        let desktop = desktops
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| SwitchError::UnknownDesktop(name.to_string()))?;
        if desktop.protected {
            return Err(SwitchError::Protected(name.to_string()));
        }
        desktop.name = new_name.to_string();
        self.store.save(&desktops)?;
        Ok(())
    }

    pub fn repath(&mut self, name: &str, path: &str) -> Result<(), SwitchError> {
        let mut desktops = self.desktops()?;
        let desktop = desktops
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| SwitchError::UnknownDesktop(name.to_string()))?;
        if desktop.protected {
            return Err(SwitchError::Protected(name.to_string()));
        }
        desktop.path = path.to_string();
        self.store.save(&desktops)?;
        Ok(())
    }

    /// Associate a wallpaper image with a profile; applied on the next
    /// activation. Allowed on protected profiles (only name and path are
    /// immutable).
    pub fn set_wallpaper_path(&mut self, name: &str, wallpaper: &str) -> Result<(), SwitchError> {
        let mut desktops = self.desktops()?;
        let desktop = desktops
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| SwitchError::UnknownDesktop(name.to_string()))?;
        desktop.wallpaper_path = wallpaper.to_string();
        self.store.save(&desktops)?;
        Ok(())
    }

    /// Run the switch state machine up to and including the registry swap.
    ///
    /// On success the caller must restart the shell and then call
    /// [`Self::sync_after_restart`]. `decide` is consulted only when the
    /// target's directory is missing.
    pub fn switch_to(
        &mut self,
        name: &str,
        mut decide: impl FnMut(&Desktop) -> MissingPathDecision,
    ) -> Result<SwitchOutcome, SwitchError> {
        // VALIDATE_TARGET
        let mut desktops = self.desktops()?;
        let Some(target_idx) = desktops.iter().position(|d| d.name == name) else {
            warn!(name = %name, "switch target not found");
            return Ok(SwitchOutcome::NotFound(name.to_string()));
        };
        if desktops[target_idx].is_active {
            info!(name = %name, "switch target is already active");
            return Ok(SwitchOutcome::AlreadyActive(name.to_string()));
        }
        let target_dir = expand_env(&desktops[target_idx].path);
        if !Path::new(&target_dir).exists() {
            match decide(&desktops[target_idx]) {
                MissingPathDecision::Recreate => {
                    fs::create_dir_all(&target_dir).map_err(|source| SwitchError::Path {
                        path: target_dir.clone(),
                        source,
                    })?;
                    info!(path = %target_dir, "recreated missing desktop directory");
                }
                MissingPathDecision::Forget => {
                    if desktops[target_idx].protected {
                        warn!(name = %name, "refusing to forget a protected profile");
                        return Ok(SwitchOutcome::Aborted);
                    }
                    desktops.remove(target_idx);
                    self.store.save(&desktops)?;
                    info!(name = %name, "removed profile with missing directory");
                    return Ok(SwitchOutcome::Aborted);
                }
                MissingPathDecision::Abort => return Ok(SwitchOutcome::Aborted),
            }
        }

        // BACKUP (best effort)
        self.backup_registry();

        // ANIMATE (optional collaborator)
        self.launch_transition();

        // CAPTURE_CURRENT_ICONS
        let previous_idx = desktops.iter().position(|d| d.is_active);
        match previous_idx {
            Some(idx) => {
                let snapshot = self.icons.capture();
                debug!(desktop = %desktops[idx].name, icons = snapshot.len(), "captured outgoing icon layout");
                desktops[idx].icon_positions = snapshot;
                desktops[idx].is_active = false;
                self.store.save(&desktops)?;
            }
            None => {
                warn!("no profile is currently active, skipping icon capture");
            }
        }

        // SWAP_REGISTRY
        let target_path = desktops[target_idx].path.clone();
        if let Err(e) = self.backend.set_desktop_path(&target_path) {
            // Roll back so the pre-switch desktop stays current; the caller
            // must not restart the shell.
            if let Some(idx) = previous_idx {
                desktops[idx].is_active = true;
                self.store.save(&desktops)?;
            }
            warn!(error = %e, "registry swap failed, switch rolled back");
            return Err(SwitchError::Registry(e.to_string()));
        }
        desktops[target_idx].is_active = true;
        self.store.save(&desktops)?;

        let from = previous_idx.map(|idx| desktops[idx].name.clone());
        info!(from = ?from, to = %name, "registry swapped, awaiting shell restart");
        Ok(SwitchOutcome::Switched {
            from,
            to: name.to_string(),
        })
    }

    /// Post-restart entry point: re-derive the active profile from the
    /// registry, apply its wallpaper if one is associated, and restore its
    /// stored icon layout.
    pub fn sync_after_restart(&mut self) -> Result<SyncReport, SwitchError> {
        let desktops = self.desktops()?;
        let Some(active) = desktops.iter().find(|d| d.is_active) else {
            warn!("no profile matches the registered desktop path after restart");
            return Ok(SyncReport::default());
        };

        let mut wallpaper_applied = false;
        if let Some(wallpaper) = active.wallpaper() {
            match self.backend.set_wallpaper(wallpaper) {
                Ok(()) => wallpaper_applied = true,
                Err(e) => warn!(wallpaper = %wallpaper, error = %e, "wallpaper apply failed"),
            }
        }

        let icons = self.icons.restore(&active.icon_positions);
        Ok(SyncReport {
            desktop: Some(active.name.clone()),
            wallpaper_applied,
            icons,
        })
    }

    fn backup_registry(&self) {
        let result = self
            .backend
            .raw_desktop_values()
            .and_then(|values| write_backup(&self.backup_dir, &values));
        match result {
            Ok(path) => debug!(backup = %path.display(), "registry snapshot written"),
            Err(e) => warn!(error = %e, "registry backup failed, continuing with the switch"),
        }
    }

    fn launch_transition(&self) {
        let Some(helper) = &self.transition_helper else {
            return;
        };
        match Command::new(helper).spawn() {
            Ok(child) => info!(pid = child.id(), "transition helper launched"),
            Err(e) => {
                warn!(helper = %helper.display(), error = %e, "transition helper unavailable, continuing")
            }
        }
    }
}
