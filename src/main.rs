//! `bt-dualboot`: sync Bluetooth keys from Linux to Windows.

use anyhow::{bail, Context, Result};
use bt_dualboot::config::DEFAULT_BACKUP_DIR;
use bt_dualboot::mounts::locate_windows_mount_points;
use bt_dualboot::{Config, DeviceRecord, LinuxStore, Mac, Reged, SyncError, SyncManager, VERSION};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "bt-dualboot",
    version,
    about = format!("Sync bluetooth keys from Linux to Windows (v{VERSION})")
)]
struct Cli {
    /// [root required] list bluetooth devices
    #[arg(short, long, help_heading = "List resources")]
    list: bool,

    /// list mounted Windows locations
    #[arg(long, help_heading = "List resources")]
    list_win_mounts: bool,

    /// parsable output for robots (supported: -l)
    #[arg(long, help_heading = "List resources")]
    bot: bool,

    /// print actions to do without invocation
    #[arg(long, help_heading = "Sync keys")]
    dry_run: bool,

    /// Windows mount point (advanced usage)
    #[arg(long, value_name = "MOUNT", help_heading = "Sync keys")]
    win: Option<PathBuf>,

    /// [root required] sync specified device
    #[arg(long, value_name = "MAC", num_args = 1.., help_heading = "Sync keys")]
    sync: Option<Vec<Mac>>,

    /// [root required] sync all paired devices
    #[arg(long, help_heading = "Sync keys")]
    sync_all: bool,

    /// path to backup directory [default: /var/backup/bt-dualboot]
    #[arg(short, long, value_name = "path", num_args = 0..=1, help_heading = "Backup Windows Registry")]
    backup: Option<Option<PathBuf>>,

    /// process without backup
    #[arg(short, long, help_heading = "Backup Windows Registry")]
    no_backup: bool,

    /// BlueZ storage directory [env: BT_DUALBOOT_LINUX_DIR]
    #[arg(long, value_name = "DIR", help_heading = "Advanced")]
    bt_dir: Option<PathBuf>,

    /// reged executable [env: BT_DUALBOOT_REGED]
    #[arg(long, value_name = "PROGRAM", help_heading = "Advanced")]
    reged: Option<PathBuf>,
}

impl Cli {
    fn is_sync(&self) -> bool {
        self.sync_all || self.sync.is_some()
    }

    fn win_mount_point(&self) -> Option<&PathBuf> {
        self.win.as_ref().filter(|path| !path.as_os_str().is_empty())
    }

    /// Cross-argument rules clap can't express on its own.
    fn validate(&self) -> std::result::Result<(), String> {
        if !(self.list || self.list_win_mounts || self.is_sync()) {
            return Err("missing required argument".to_string());
        }
        if self.sync_all && self.sync.is_some() {
            return Err("`--sync-all` can't be used alongside with `--sync MAC`".to_string());
        }
        if self.no_backup && self.backup.is_some() {
            return Err("`--backup` can't be used alongside with `--no-backup`".to_string());
        }

        let is_backup_concern = self.no_backup || self.backup.is_some();
        if is_backup_concern && !self.is_sync() {
            return Err("--backup/--no-backup options makes sense only with --sync/--sync-all options".to_string());
        }
        if self.is_sync() && !is_backup_concern {
            return Err(format!(
                "Neither backup option given!

    Windows Registry Hive file will be updated!
    chntpw/reged tool is non-official and hackish Hive file editing tool.
    It is recommended to do backup prior writing into Hive file.

    Use:
      -b [path], --backup [path]    [default: {DEFAULT_BACKUP_DIR}]
      -n, --no-backup               process without backup

    WARNING:
        Windows Registry Hive file may contain sensitive data. You shouldn't keep this file
        on a storage which may be accessed by others. Consider to remove backup files as soon
        as possible after ensure Windows boots and works correctly."
            ));
        }
        Ok(())
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_header(caption: &str) {
    println!();
    println!("{caption}");
    println!("{}", "=".repeat(caption.chars().count()));
}

fn print_devices_list(
    section_id: &str,
    caption: &str,
    devices: &[DeviceRecord],
    annotation: Option<&str>,
    message_not_found: Option<&str>,
    bot: bool,
) {
    let name = |device: &DeviceRecord| device.name.clone().unwrap_or_default();

    if bot {
        if devices.is_empty() {
            println!("{section_id} NONE");
        }
        for device in devices {
            println!("{section_id} {} {}", device.mac, name(device));
        }
        return;
    }

    if devices.is_empty() {
        if let Some(message) = message_not_found {
            print_header(caption);
            println!();
            println!("{message}");
        }
        return;
    }

    print_header(caption);
    if let Some(annotation) = annotation {
        println!();
        println!("{annotation}");
        println!();
    }
    for device in devices {
        println!(" {device}");
    }
}

struct App {
    cli: Cli,
    config: Config,
    manager: Option<SyncManager<Reged>>,
}

impl App {
    fn new(cli: Cli, config: Config) -> Self {
        Self {
            cli,
            config,
            manager: None,
        }
    }

    fn windows_mount_point(&self) -> Result<PathBuf> {
        if let Some(mount_point) = self.cli.win_mount_point() {
            return Ok(mount_point.clone());
        }

        let found = locate_windows_mount_points().context("Can't read mount table")?;
        match found.as_slice() {
            [mount_point] => Ok(mount_point.clone()),
            others => {
                let how_much = if others.is_empty() {
                    "None".to_string()
                } else {
                    others.len().to_string()
                };
                bail!("{how_much} Windows locations found, use `--win MOUNT` to point actual Windows location")
            }
        }
    }

    fn manager(&mut self) -> Result<&mut SyncManager<Reged>> {
        let manager = match self.manager.take() {
            Some(manager) => manager,
            None => {
                let store = LinuxStore::new(&self.config.linux_bt_dir);
                if store.device_info_paths().map(|paths| paths.is_empty()).unwrap_or(true) {
                    bail!(
                        "No Bluetooth devices found!\nCheck if your user have access to {} and at least one device paired. Try use sudo.",
                        store.root().display()
                    );
                }
                let editor = Reged::for_windows_mount(self.windows_mount_point()?)
                    .with_program(&self.config.reged_program);
                SyncManager::new(editor, store)
            }
        };
        Ok(self.manager.insert(manager))
    }

    fn list_win_mounts(&self) -> Result<()> {
        print_header("Windows locations:");
        for mount_point in locate_windows_mount_points()? {
            println!(" {}", mount_point.display());
        }
        Ok(())
    }

    fn list_devices(&mut self) -> Result<()> {
        let bot = self.cli.bot;
        let manager = self.manager()?;

        print_devices_list(
            "works",
            "Works both in Linux and Windows",
            &manager.devices_both_synced()?,
            None,
            None,
            bot,
        );
        print_devices_list(
            "needs_sync",
            "Needs sync",
            &manager.devices_needing_sync()?,
            Some("Following devices available for sync with `--sync-all` or `--sync MAC` options."),
            Some("No device found ready to sync.\nTry pair devices first."),
            bot,
        );
        print_devices_list(
            "missing_win",
            "Have to be paired in Windows",
            &manager.devices_absent_on_windows()?,
            Some("Following devices unavailable for sync unless you boot Windows and pair them"),
            None,
            bot,
        );
        Ok(())
    }

    fn backup(&mut self, path: Option<PathBuf>) -> Result<()> {
        let dry_run = self.cli.dry_run;
        let backup_dir = path.unwrap_or_else(|| self.config.backup_dir.clone());
        let backup = self.manager()?.editor().backup(&backup_dir, dry_run)?;

        let heading = if dry_run { "DRY RUN BACKUP" } else { "BACKUP" };
        println!(
            "> {heading} {} to {}",
            backup.target_file.display(),
            backup.backup_file.display()
        );
        Ok(())
    }

    fn sync_devices(&mut self, macs: Vec<Mac>) -> Result<()> {
        let dry_run = self.cli.dry_run;
        let outcome = self.manager()?.push(macs, dry_run)?;

        let macs: Vec<String> = outcome.pushed.iter().map(Mac::to_string).collect();
        println!("synced {} successfully", macs.join(", "));
        Ok(())
    }

    fn sync_all(&mut self) -> Result<()> {
        let (bot, dry_run) = (self.cli.bot, self.cli.dry_run);

        self.manager()?.with_no_cache(|manager| -> Result<()> {
            let devices = manager.devices_needing_sync()?;
            if devices.is_empty() {
                println!("Nothing to sync");
                return Ok(());
            }

            print_devices_list("syncing", "Syncing...", &devices, None, None, bot);
            manager.push(&devices, dry_run)?;
            println!("...done");
            Ok(())
        })
    }

    fn run(&mut self) -> Result<()> {
        if self.cli.list_win_mounts {
            self.list_win_mounts()?;
        }
        if self.cli.list {
            self.list_devices()?;
        }
        if self.cli.is_sync() {
            if let Some(path) = self.cli.backup.clone() {
                self.backup(path)?;
            }
        }
        if let Some(macs) = self.cli.sync.clone() {
            self.sync_devices(macs)?;
        }
        if self.cli.sync_all {
            self.sync_all()?;
        }
        Ok(())
    }
}

fn main() -> ExitCode {
    if !cfg!(target_os = "linux") {
        eprintln!("ERROR: Intended to be used only from Linux.");
        return ExitCode::FAILURE;
    }

    if std::env::args_os().len() == 1 {
        // Help output only; a failed write to stdout is not worth reporting.
        let _ = Cli::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();
    if let Err(message) = cli.validate() {
        Cli::command().error(ErrorKind::ArgumentConflict, message).exit();
    }

    let mut config = Config::from_env();
    if let Some(dir) = &cli.bt_dir {
        config.linux_bt_dir = dir.clone();
    }
    if let Some(program) = &cli.reged {
        config.reged_program = program.clone();
    }
    init_tracing(config.debug);
    tracing::debug!(?cli, ?config, "Starting");

    match App::new(cli, config).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<SyncError>() {
                Some(
                    rejected @ (SyncError::DeviceNotFound { .. } | SyncError::CredentialMismatch { .. }),
                ) => {
                    eprintln!("ERROR: {rejected}\nNothing changed.");
                }
                _ => eprintln!("ERROR: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
