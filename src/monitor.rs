//! Background auto-switching keyed on running processes.
//!
//! A rules file maps lowercase executable names to desktop names; insertion
//! order is priority, earliest wins. The monitor polls the process list on a
//! background thread, picks the highest-priority rule whose process is
//! running, and drives a full switch when that rule's desktop is not already
//! active.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::constants::monitor::{COOLDOWN, POLL_INTERVAL};
use crate::traits::{DesktopSwitching, ProcessScanner};

/// Ordered process-name → desktop-name rules.
///
/// An explicit sequence of pairs, not a hash map: priority is the insertion
/// order of the backing JSON object and must survive round trips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<(String, String)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a rule. Process names are matched case-insensitively,
    /// so the key is folded to lower case here and on load. Updating an
    /// existing rule keeps its priority slot.
    pub fn add(&mut self, process: &str, desktop: &str) {
        let process = process.to_lowercase();
        match self.rules.iter_mut().find(|(p, _)| *p == process) {
            Some(rule) => rule.1 = desktop.to_string(),
            None => self.rules.push((process, desktop.to_string())),
        }
    }

    pub fn remove(&mut self, process: &str) -> bool {
        let process = process.to_lowercase();
        let before = self.rules.len();
        self.rules.retain(|(p, _)| *p != process);
        self.rules.len() != before
    }

    pub fn position(&self, process: &str) -> Option<usize> {
        self.rules.iter().position(|(p, _)| p == process)
    }

    pub fn get(&self, index: usize) -> Option<&(String, String)> {
        self.rules.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Load from the JSON object file; a missing file is an empty rule set.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e).context(format!("cannot read rules file {}", path.display())),
        };
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("rules file {} is not valid JSON", path.display()))?;
        let object = value
            .as_object()
            .with_context(|| format!("rules file {} is not a JSON object", path.display()))?;
        let mut rules = Self::new();
        for (process, desktop) in object {
            match desktop.as_str() {
                Some(desktop) => rules.add(process, desktop),
                None => warn!(process = %process, "rule value is not a string, skipping"),
            }
        }
        Ok(rules)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create rules directory {}", parent.display()))?;
        }
        let mut object = serde_json::Map::new();
        for (process, desktop) in &self.rules {
            object.insert(process.clone(), Value::String(desktop.clone()));
        }
        let raw = serde_json::to_string_pretty(&Value::Object(object))?;
        fs::write(path, raw)
            .with_context(|| format!("cannot write rules file {}", path.display()))
    }
}

/// One pass over the live process list: track the lowest rule index seen and
/// short-circuit on an index-0 match, which nothing can beat.
pub fn select_rule<'r>(rules: &'r RuleSet, running: &[String]) -> Option<&'r (String, String)> {
    let mut best: Option<usize> = None;
    for name in running {
        let name = name.to_lowercase();
        if let Some(index) = rules.position(&name) {
            if best.is_none_or(|b| index < b) {
                best = Some(index);
            }
            if index == 0 {
                break;
            }
        }
    }
    best.and_then(|index| rules.get(index))
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub cooldown: Duration,
    pub rules_path: PathBuf,
}

impl MonitorConfig {
    pub fn new(rules_path: PathBuf) -> Self {
        Self {
            enabled: true,
            interval: POLL_INTERVAL,
            cooldown: COOLDOWN,
            rules_path,
        }
    }
}

pub struct AutoSwitchMonitor<S: DesktopSwitching, P: ProcessScanner> {
    config: MonitorConfig,
    switcher: S,
    scanner: P,
    rules: RuleSet,
    rules_mtime: Option<SystemTime>,
    last_switch: Option<Instant>,
}

impl<S: DesktopSwitching, P: ProcessScanner> AutoSwitchMonitor<S, P> {
    pub fn new(config: MonitorConfig, switcher: S, scanner: P) -> Self {
        let mut monitor = Self {
            config,
            switcher,
            scanner,
            rules: RuleSet::new(),
            rules_mtime: None,
            last_switch: None,
        };
        monitor.reload_rules_if_changed();
        monitor
    }

    /// Re-read the rules file when its modification time has advanced, so
    /// edits take effect without restarting the loop.
    fn reload_rules_if_changed(&mut self) {
        let mtime = fs::metadata(&self.config.rules_path)
            .and_then(|m| m.modified())
            .ok();
        if mtime == self.rules_mtime && self.rules_mtime.is_some() {
            return;
        }
        match RuleSet::load(&self.config.rules_path) {
            Ok(rules) => {
                if rules != self.rules {
                    info!(count = rules.len(), "auto-switch rules loaded");
                }
                self.rules = rules;
                self.rules_mtime = mtime;
            }
            Err(e) => warn!(error = %e, "rules file unreadable, keeping previous rules"),
        }
    }

    /// One poll: reload rules, enforce the cooldown, scan processes once and
    /// switch when the winning rule's desktop is not already active.
    pub fn tick(&mut self) {
        if !self.config.enabled {
            return;
        }
        self.reload_rules_if_changed();
        if self.rules.is_empty() {
            return;
        }
        if let Some(last) = self.last_switch
            && last.elapsed() < self.config.cooldown
        {
            debug!("auto-switch cooldown active, skipping scan");
            return;
        }

        let running = self.scanner.running_names();
        let Some((process, desktop)) = select_rule(&self.rules, &running).cloned() else {
            return;
        };
        if self.switcher.active_desktop().as_deref() == Some(desktop.as_str()) {
            return;
        }

        info!(process = %process, desktop = %desktop, "auto-switch rule matched");
        match self.switcher.switch_to(&desktop) {
            Ok(true) => {
                self.last_switch = Some(Instant::now());
                info!(desktop = %desktop, "auto-switch complete, cooldown reset");
            }
            Ok(false) => debug!(desktop = %desktop, "auto-switch was a no-op"),
            Err(e) => warn!(desktop = %desktop, error = %e, "auto-switch failed"),
        }
    }

    /// Poll until a stop message arrives. The sleep doubles as the stop wait,
    /// so a stop wakes the loop immediately instead of after the interval.
    pub fn run(mut self, stop: mpsc::Receiver<()>) {
        info!(
            interval = ?self.config.interval,
            cooldown = ?self.config.cooldown,
            enabled = self.config.enabled,
            "auto-switch monitor started"
        );
        loop {
            match stop.recv_timeout(self.config.interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => self.tick(),
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("auto-switch monitor stopped");
    }

    /// Run the loop on a daemon-style background thread.
    pub fn spawn(self) -> MonitorHandle
    where
        S: Send + 'static,
        P: Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel();
        let join = thread::spawn(move || self.run(stop_rx));
        MonitorHandle {
            stop: stop_tx,
            join,
        }
    }
}

pub struct MonitorHandle {
    stop: mpsc::Sender<()>,
    join: thread::JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop and wait for it to finish. The loop only ticks or
    /// waits on the stop channel, so the join is prompt.
    pub fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.join.join();
    }
}

/// Live process scan via sysinfo. Processes the current user may not inspect
/// are simply absent from the refresh, which matches the policy of skipping
/// inaccessible processes.
pub struct SystemProcessScanner {
    system: sysinfo::System,
}

impl SystemProcessScanner {
    pub fn new() -> Self {
        Self {
            system: sysinfo::System::new(),
        }
    }
}

impl ProcessScanner for SystemProcessScanner {
    fn running_names(&mut self) -> Vec<String> {
        self.system
            .refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        self.system
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().into_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs::File;
    use std::rc::Rc;

    fn rules(pairs: &[(&str, &str)]) -> RuleSet {
        let mut set = RuleSet::new();
        for (process, desktop) in pairs {
            set.add(process, desktop);
        }
        set
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[derive(Default)]
    struct SwitchLog {
        active: Option<String>,
        switches: Vec<String>,
        fail: bool,
    }

    struct FakeSwitcher(Rc<RefCell<SwitchLog>>);

    impl DesktopSwitching for FakeSwitcher {
        fn active_desktop(&mut self) -> Option<String> {
            self.0.borrow().active.clone()
        }

        fn switch_to(&mut self, name: &str) -> Result<bool> {
            if self.0.borrow().fail {
                anyhow::bail!("switch failed");
            }
            let mut log = self.0.borrow_mut();
            log.switches.push(name.to_string());
            log.active = Some(name.to_string());
            Ok(true)
        }
    }

    struct FakeScanner(Vec<String>);

    impl ProcessScanner for FakeScanner {
        fn running_names(&mut self) -> Vec<String> {
            self.0.clone()
        }
    }

    fn monitor_with(
        dir: &tempfile::TempDir,
        pairs: &[(&str, &str)],
        running: &[&str],
    ) -> (AutoSwitchMonitor<FakeSwitcher, FakeScanner>, Rc<RefCell<SwitchLog>>) {
        let rules_path = dir.path().join("rules.json");
        rules(pairs).save(&rules_path).unwrap();
        let log = Rc::new(RefCell::new(SwitchLog::default()));
        let mut config = MonitorConfig::new(rules_path);
        config.cooldown = Duration::from_secs(60);
        let monitor = AutoSwitchMonitor::new(config, FakeSwitcher(log.clone()), FakeScanner(names(running)));
        (monitor, log)
    }

    #[test]
    fn test_earliest_rule_wins_when_both_processes_run() {
        let set = rules(&[("a.exe", "Desktop1"), ("b.exe", "Desktop2")]);
        let selected = select_rule(&set, &names(&["b.exe", "a.exe"])).unwrap();
        assert_eq!(selected.1, "Desktop1");
    }

    #[test]
    fn test_later_rule_selected_when_alone() {
        let set = rules(&[("a.exe", "Desktop1"), ("b.exe", "Desktop2")]);
        let selected = select_rule(&set, &names(&["b.exe", "x.exe"])).unwrap();
        assert_eq!(selected.1, "Desktop2");
    }

    #[test]
    fn test_no_match_selects_nothing() {
        let set = rules(&[("a.exe", "Desktop1")]);
        assert!(select_rule(&set, &names(&["x.exe", "y.exe"])).is_none());
    }

    #[test]
    fn test_matching_ignores_process_name_case() {
        let set = rules(&[("Notepad.EXE", "Notes")]);
        let selected = select_rule(&set, &names(&["NOTEPAD.exe"])).unwrap();
        assert_eq!(selected.0, "notepad.exe");
        assert_eq!(selected.1, "Notes");
    }

    #[test]
    fn test_add_updates_in_place_keeping_priority() {
        let mut set = rules(&[("a.exe", "Desktop1"), ("b.exe", "Desktop2")]);
        set.add("A.EXE", "Desktop9");
        assert_eq!(set.position("a.exe"), Some(0));
        assert_eq!(set.get(0).unwrap().1, "Desktop9");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_rules_round_trip_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let set = rules(&[("z.exe", "Last"), ("a.exe", "First"), ("m.exe", "Mid")]);
        set.save(&path).unwrap();
        let loaded = RuleSet::load(&path).unwrap();
        let order: Vec<&str> = loaded.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(order, ["z.exe", "a.exe", "m.exe"]);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RuleSet::load(&dir.path().join("rules.json")).unwrap().is_empty());
    }

    #[test]
    fn test_tick_switches_once_and_respects_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, log) =
            monitor_with(&dir, &[("a.exe", "Desktop1"), ("b.exe", "Desktop2")], &["b.exe", "a.exe"]);

        monitor.tick();
        assert_eq!(log.borrow().switches, ["Desktop1"]);

        // Conditions still match, but two more ticks inside the cooldown
        // window must not switch again.
        log.borrow_mut().active = None;
        monitor.tick();
        monitor.tick();
        assert_eq!(log.borrow().switches.len(), 1);
    }

    #[test]
    fn test_tick_does_nothing_when_target_already_active() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, log) = monitor_with(&dir, &[("a.exe", "Desktop1")], &["a.exe"]);
        log.borrow_mut().active = Some("Desktop1".to_string());

        monitor.tick();
        assert!(log.borrow().switches.is_empty());
    }

    #[test]
    fn test_tick_does_nothing_without_matches() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, log) = monitor_with(&dir, &[("a.exe", "Desktop1")], &["other.exe"]);

        monitor.tick();
        assert!(log.borrow().switches.is_empty());
    }

    #[test]
    fn test_disabled_monitor_never_switches() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, log) = monitor_with(&dir, &[("a.exe", "Desktop1")], &["a.exe"]);
        monitor.config.enabled = false;

        monitor.tick();
        assert!(log.borrow().switches.is_empty());
    }

    #[test]
    fn test_failed_switch_does_not_start_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, log) = monitor_with(&dir, &[("a.exe", "Desktop1")], &["a.exe"]);
        log.borrow_mut().fail = true;

        monitor.tick();
        assert!(monitor.last_switch.is_none());

        log.borrow_mut().fail = false;
        monitor.tick();
        assert_eq!(log.borrow().switches, ["Desktop1"]);
    }

    #[test]
    fn test_rules_hot_reload_on_mtime_advance() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, log) = monitor_with(&dir, &[("a.exe", "Desktop1")], &["b.exe"]);

        monitor.tick();
        assert!(log.borrow().switches.is_empty());

        let rules_path = dir.path().join("rules.json");
        rules(&[("b.exe", "Desktop2")]).save(&rules_path).unwrap();
        let f = File::options().write(true).open(&rules_path).unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(2)).unwrap();

        monitor.tick();
        assert_eq!(log.borrow().switches, ["Desktop2"]);
    }

    #[test]
    fn test_stop_wakes_a_sleeping_monitor_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let rules_path = dir.path().join("rules.json");
        rules(&[]).save(&rules_path).unwrap();
        let mut config = MonitorConfig::new(rules_path);
        config.interval = Duration::from_secs(3600);

        struct NullSwitcher;
        impl DesktopSwitching for NullSwitcher {
            fn active_desktop(&mut self) -> Option<String> {
                None
            }
            fn switch_to(&mut self, _name: &str) -> Result<bool> {
                Ok(false)
            }
        }

        let monitor = AutoSwitchMonitor::new(config, NullSwitcher, FakeScanner(Vec::new()));
        let handle = monitor.spawn();
        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
