#![forbid(unsafe_code)]

//! `app-lock-ctl`: local CLI companion for `app-lock`.
//!
//! Connects to the IPC socket as one configured caller and sends a single
//! command, or with `watch` follows unlock requests or lock state changes.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use uuid::Uuid;

use app_lock::client::AppLockClient;
use app_lock::engine::catalog::PackageInfo;
use app_lock::Result;

#[derive(Debug, Parser)]
#[command(
    name = "app-lock-ctl",
    about = "Local CLI for the app-lock server",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the server's `ipc_name` config).
    #[arg(long, default_value = "app-lock")]
    ipc_name: String,

    /// Caller token; the server derives user and permissions from it.
    #[arg(long, env = "APP_LOCK_TOKEN", hide_env_values = true)]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum Feed {
    /// Unlock requests for a credential UI.
    Unlocks,
    /// Lock state changes.
    Locks,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Protect a package.
    Add {
        /// Android package name.
        package: String,
    },
    /// Stop protecting a package.
    Remove {
        /// Android package name.
        package: String,
    },
    /// Show protected packages.
    List,
    /// Show every protected package with its lock state.
    Status,
    /// Show or change the re-lock timeout.
    Timeout {
        /// New timeout in milliseconds; omit to show the current value.
        millis: Option<i64>,
    },
    /// Show or change whether biometrics may unlock packages.
    Biometrics {
        /// New value; omit to show the current value.
        #[arg(action = clap::ArgAction::Set)]
        allowed: Option<bool>,
    },
    /// Toggle notification redaction for a package.
    Redact {
        /// Android package name.
        package: String,
        /// Whether to redact.
        #[arg(action = clap::ArgAction::Set)]
        redact: bool,
    },
    /// Toggle launcher visibility for a package.
    Hide {
        /// Android package name.
        package: String,
        /// Whether to hide.
        #[arg(action = clap::ArgAction::Set)]
        hidden: bool,
    },
    /// Show launcher-hidden packages.
    Hidden,
    /// Show the lock state of a package.
    Check {
        /// Android package name.
        package: String,
    },
    /// Unlock a package directly.
    Unlock {
        /// Android package name.
        package: String,
    },
    /// Start a credential flow for a package.
    RequestUnlock {
        /// Android package name.
        package: String,
        /// Never offer biometrics for this request.
        #[arg(long)]
        no_biometrics: bool,
    },
    /// Report a credential flow verdict.
    Result {
        /// Android package name.
        package: String,
        /// Flow identifier from the unlock request.
        #[arg(long)]
        request_id: Option<Uuid>,
        /// Report a failed authentication.
        #[arg(long)]
        failed: bool,
    },
    /// Re-lock an unlocked package.
    Relock {
        /// Android package name.
        package: String,
    },
    /// Re-lock every package (device lock).
    DeviceLocked,
    /// Report an installed package.
    Installed {
        /// Android package name.
        package: String,
        /// Application label.
        #[arg(long)]
        label: Option<String>,
        /// The package ships with the system image.
        #[arg(long)]
        system: bool,
    },
    /// Report an uninstalled package.
    Uninstalled {
        /// Android package name.
        package: String,
    },
    /// Purge all app lock data of the caller's user.
    UserRemoved,
    /// Whether notifications of a package must be redacted now.
    Redacted {
        /// Android package name.
        package: String,
    },
    /// Follow server events until interrupted.
    Watch {
        /// Which feed to follow.
        #[arg(value_enum, default_value_t = Feed::Unlocks)]
        feed: Feed,
    },
}

fn main() {
    let args = Cli::parse();
    let ipc_name = args.ipc_name.clone();

    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        if matches!(err, app_lock::AppError::Ipc(_)) {
            eprintln!("Is app-lock running with ipc_name '{ipc_name}'?");
        }
        std::process::exit(1);
    }
}

fn run(args: Cli) -> Result<()> {
    let mut client = AppLockClient::connect(&args.ipc_name, args.token)?;

    match args.command {
        Command::Add { package } => print(&client.add_package(&package)?),
        Command::Remove { package } => {
            client.remove_package(&package)?;
            println!("OK");
        }
        Command::List => print(&client.get_package_data()?),
        Command::Status => print(&client.lock_states()?),
        Command::Timeout { millis: None } => print(&client.get_timeout()?),
        Command::Timeout {
            millis: Some(millis),
        } => {
            client.set_timeout(millis)?;
            println!("OK");
        }
        Command::Biometrics { allowed: None } => print(&client.is_biometrics_allowed()?),
        Command::Biometrics {
            allowed: Some(allowed),
        } => {
            client.set_biometrics_allowed(allowed)?;
            println!("OK");
        }
        Command::Redact { package, redact } => {
            client.set_should_redact_notification(&package, redact)?;
            println!("OK");
        }
        Command::Hide { package, hidden } => {
            client.set_package_hidden(&package, hidden)?;
            println!("OK");
        }
        Command::Hidden => print(&client.get_hidden_packages()?),
        Command::Check { package } => print(&client.check_locked(&package)?),
        Command::Unlock { package } => {
            client.unlock_package(&package)?;
            println!("OK");
        }
        Command::RequestUnlock {
            package,
            no_biometrics,
        } => print(&client.request_unlock(&package, !no_biometrics)?),
        Command::Result {
            package,
            request_id,
            failed,
        } => print(&client.report_authentication_result(&package, request_id, !failed)?),
        Command::Relock { package } => print(&client.relock_package(&package)?),
        Command::DeviceLocked => print(&client.device_locked()?),
        Command::Installed {
            package,
            label,
            system,
        } => {
            client.package_installed(PackageInfo {
                label: label.unwrap_or_else(|| package.clone()),
                package_name: package,
                system,
            })?;
            println!("OK");
        }
        Command::Uninstalled { package } => print(&client.package_removed(&package)?),
        Command::UserRemoved => print(&client.user_removed()?),
        Command::Redacted { package } => print(&client.should_redact_notification(&package)?),
        Command::Watch { feed } => {
            let events = match feed {
                Feed::Unlocks => client.subscribe_unlock_requests()?,
                Feed::Locks => client.subscribe_lock_events()?,
            };
            for event in events {
                println!("{}", serde_json::to_string(&event?)?);
            }
        }
    }

    Ok(())
}

fn print<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
