use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::Level as TraceLevel;
use tracing_subscriber::FmtSubscriber;

use multidesk::constants::{monitor as monitor_consts, store as store_consts};
use multidesk::monitor::RuleSet;

#[derive(Parser)]
#[command(name = "multidesk", version, about = "Virtual desktops for the Windows shell")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List desktop profiles and show which one is active
    List,
    /// Create a new desktop profile backed by a directory
    Create { name: String, path: String },
    /// Delete a profile (refused for the active or protected profile)
    Delete { name: String },
    /// Rename a profile
    Rename { name: String, new_name: String },
    /// Point a profile at a different directory
    Repath { name: String, path: String },
    /// Associate a wallpaper image with a profile
    Wallpaper { name: String, image: String },
    /// Switch to a profile: capture icons, swap the registry, restart the shell
    Switch {
        name: String,
        /// What to do when the target's directory no longer exists
        #[arg(long, value_enum, default_value_t = OnMissingPath::Abort)]
        on_missing_path: OnMissingPath,
        /// Optional visual-transition helper launched during the switch
        #[arg(long)]
        transition: Option<PathBuf>,
        /// Swap the registry only; the caller owns the shell restart and sync
        #[arg(long)]
        no_restart: bool,
    },
    /// Re-derive the active profile and restore its wallpaper and icon layout
    Sync,
    /// Run the auto-switch monitor in the foreground
    Monitor {
        /// Seconds between process scans
        #[arg(long, default_value_t = monitor_consts::POLL_INTERVAL.as_secs())]
        interval: u64,
        /// Seconds to wait after an auto-switch before attempting another
        #[arg(long, default_value_t = monitor_consts::COOLDOWN.as_secs())]
        cooldown: u64,
    },
    /// Manage auto-switch rules (process name -> desktop, first match wins)
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Show rules in priority order
    List,
    /// Add a rule, or retarget an existing one in place
    Add { process: String, desktop: String },
    /// Remove a rule
    Remove { process: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum OnMissingPath {
    /// Abort the switch without changes
    Abort,
    /// Recreate the directory and continue
    Recreate,
    /// Drop the now-invalid profile and abort
    Forget,
}

fn init_tracing() -> Result<()> {
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// All persisted state lives under one directory in the platform config dir.
fn app_dir() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push(store_consts::APP_DIR);
    dir
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    match cli.command {
        Command::Rules { action } => rules_command(action),
        command => run(command),
    }
}

fn rules_command(action: RulesCommand) -> Result<()> {
    let path = app_dir().join(monitor_consts::RULES_FILENAME);
    match action {
        RulesCommand::List => {
            let rules = RuleSet::load(&path)?;
            if rules.is_empty() {
                println!("no auto-switch rules configured");
            }
            for (i, (process, desktop)) in rules.iter().enumerate() {
                println!("{:>3}. {process} -> {desktop}", i + 1);
            }
        }
        RulesCommand::Add { process, desktop } => {
            let mut rules = RuleSet::load(&path)?;
            rules.add(&process, &desktop);
            rules.save(&path)?;
            println!("rule saved: {} -> {desktop}", process.to_lowercase());
        }
        RulesCommand::Remove { process } => {
            let mut rules = RuleSet::load(&path)?;
            if rules.remove(&process) {
                rules.save(&path)?;
                println!("rule removed: {}", process.to_lowercase());
            } else {
                println!("no rule for {}", process.to_lowercase());
            }
        }
    }
    Ok(())
}

#[cfg(not(windows))]
fn run(_command: Command) -> Result<()> {
    anyhow::bail!("multidesk manages the Windows shell; only `rules` is available on this platform")
}

#[cfg(windows)]
fn run(command: Command) -> Result<()> {
    use win::{full_switch, restart_explorer, switcher};
    use multidesk::monitor::{AutoSwitchMonitor, MonitorConfig, SystemProcessScanner};
    use multidesk::switcher::{MissingPathDecision, SwitchOutcome};
    use std::sync::mpsc;
    use std::time::Duration;

    match command {
        Command::List => {
            let mut sw = switcher(None)?;
            for desktop in sw.desktops()? {
                let marker = if desktop.is_active { "*" } else { " " };
                let guard = if desktop.protected { " (protected)" } else { "" };
                println!(
                    "{marker} {name}{guard}\n      {path}  [{icons} icons]",
                    name = desktop.name,
                    path = desktop.path,
                    icons = desktop.icon_positions.len(),
                );
            }
        }
        Command::Create { name, path } => {
            switcher(None)?.create(&name, &path)?;
            println!("created desktop '{name}'");
        }
        Command::Delete { name } => {
            switcher(None)?.delete(&name)?;
            println!("deleted desktop '{name}'");
        }
        Command::Rename { name, new_name } => {
            switcher(None)?.rename(&name, &new_name)?;
            println!("renamed '{name}' to '{new_name}'");
        }
        Command::Repath { name, path } => {
            switcher(None)?.repath(&name, &path)?;
            println!("repointed '{name}' at {path}");
        }
        Command::Wallpaper { name, image } => {
            switcher(None)?.set_wallpaper_path(&name, &image)?;
            println!("wallpaper for '{name}' set to {image}");
        }
        Command::Switch {
            name,
            on_missing_path,
            transition,
            no_restart,
        } => {
            let decision = match on_missing_path {
                OnMissingPath::Abort => MissingPathDecision::Abort,
                OnMissingPath::Recreate => MissingPathDecision::Recreate,
                OnMissingPath::Forget => MissingPathDecision::Forget,
            };
            let mut sw = switcher(transition)?;
            match sw.switch_to(&name, |_| decision)? {
                SwitchOutcome::Switched { from, to } => {
                    match from {
                        Some(from) => println!("switching {from} -> {to}"),
                        None => println!("switching to {to}"),
                    }
                    if no_restart {
                        println!("registry swapped; restart the shell and run `multidesk sync`");
                    } else {
                        restart_explorer()?;
                        let report = sw.sync_after_restart()?;
                        print_sync(&report);
                    }
                }
                SwitchOutcome::AlreadyActive(name) => println!("'{name}' is already active"),
                SwitchOutcome::NotFound(name) => println!("no desktop named '{name}'"),
                SwitchOutcome::Aborted => println!("switch aborted"),
            }
        }
        Command::Sync => {
            let report = switcher(None)?.sync_after_restart()?;
            print_sync(&report);
        }
        Command::Monitor { interval, cooldown } => {
            let mut config = MonitorConfig::new(app_dir().join(monitor_consts::RULES_FILENAME));
            config.interval = Duration::from_secs(interval.max(1));
            config.cooldown = Duration::from_secs(cooldown);
            let monitor =
                AutoSwitchMonitor::new(config, full_switch()?, SystemProcessScanner::new());
            // Foreground loop: the stop sender is parked so only process
            // termination ends the wait.
            let (_stop_tx, stop_rx) = mpsc::channel();
            monitor.run(stop_rx);
        }
        Command::Rules { .. } => unreachable!("handled before platform dispatch"),
    }
    Ok(())
}

#[cfg(windows)]
fn print_sync(report: &multidesk::switcher::SyncReport) {
    match &report.desktop {
        Some(name) => println!(
            "synchronized '{name}': wallpaper {}, icons restored {}, skipped {}, failed {}",
            if report.wallpaper_applied { "applied" } else { "unchanged" },
            report.icons.restored,
            report.icons.skipped,
            report.icons.failed,
        ),
        None => println!("no profile matches the registered desktop path"),
    }
}

#[cfg(windows)]
mod win {
    use super::app_dir;
    use anyhow::{Context, Result};
    use multidesk::constants::{registry as registry_consts, shell as shell_consts};
    use multidesk::registry::ShellFolders;
    use multidesk::shell::LiveIconSurface;
    use multidesk::store::DesktopStore;
    use multidesk::switcher::{DesktopSwitcher, MissingPathDecision, SwitchOutcome};
    use multidesk::traits::DesktopSwitching;
    use std::path::PathBuf;
    use tracing::info;

    pub type LiveSwitcher = DesktopSwitcher<ShellFolders, LiveIconSurface>;

    /// Wire the orchestrator against the live registry and shell, creating
    /// the protected baseline profile on first run.
    pub fn switcher(transition: Option<PathBuf>) -> Result<LiveSwitcher> {
        let store = DesktopStore::open_default();
        let backups = app_dir().join(registry_consts::BACKUP_DIR);
        let mut sw = DesktopSwitcher::new(store, ShellFolders, LiveIconSurface, backups);
        if let Some(helper) = transition {
            sw = sw.with_transition_helper(helper);
        }
        sw.ensure_baseline()?;
        Ok(sw)
    }

    /// The shell must re-read the shell-folder values, and that only happens
    /// on a fresh explorer process.
    pub fn restart_explorer() -> Result<()> {
        info!("restarting explorer to adopt the new desktop folder");
        let killed = std::process::Command::new("taskkill")
            .args(["/F", "/IM", "explorer.exe"])
            .status()
            .context("cannot run taskkill")?;
        if !killed.success() {
            tracing::warn!(status = ?killed.code(), "taskkill reported failure, relaunching anyway");
        }
        std::process::Command::new("explorer.exe")
            .spawn()
            .context("cannot relaunch explorer")?;
        std::thread::sleep(shell_consts::RESTART_SETTLE);
        Ok(())
    }

    /// Monitor-facing switch surface performing the complete sequence:
    /// switch, shell restart, post-restart sync.
    pub struct FullSwitch {
        switcher: LiveSwitcher,
    }

    pub fn full_switch() -> Result<FullSwitch> {
        Ok(FullSwitch {
            switcher: switcher(None)?,
        })
    }

    impl DesktopSwitching for FullSwitch {
        fn active_desktop(&mut self) -> Option<String> {
            self.switcher
                .desktops()
                .ok()?
                .into_iter()
                .find(|d| d.is_active)
                .map(|d| d.name)
        }

        fn switch_to(&mut self, name: &str) -> Result<bool> {
            match self.switcher.switch_to(name, |_| MissingPathDecision::Abort)? {
                SwitchOutcome::Switched { .. } => {
                    restart_explorer()?;
                    let report = self.switcher.sync_after_restart()?;
                    info!(
                        desktop = ?report.desktop,
                        restored = report.icons.restored,
                        skipped = report.icons.skipped,
                        "auto-switch synchronized"
                    );
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }
}
