use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use devicelink::{
    DeviceLink, DeviceLinkConfig, DeviceLinkManager, LinkOutcome, LinkRequestHandle, UserOutcome,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Link, list and revoke secondary devices of this account.
#[derive(Parser)]
#[command(name = "devicelink", author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List linked devices
    List {
        #[arg(long, help = "Print as JSON")]
        json: bool,
    },
    /// Authorize a signed link request read from a JSON file ("-" for stdin)
    Authorize { file: PathBuf },
    /// Revoke a linked device
    Unlink {
        /// Hex public key of the device
        device: String,
    },
    /// Set or clear a device's display name
    Rename {
        device: String,
        name: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devicelink=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = DeviceLinkConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&redacted(config))?);
            Ok(())
        }
        command => run(command, &config).await,
    }
}

async fn run(command: Commands, config: &DeviceLinkConfig) -> Result<()> {
    let manager = DeviceLinkManager::from_config(config)?;
    let master = config.local_public_key.as_str();

    match command {
        Commands::List { json } => {
            let devices = manager.list_devices(master);
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No linked devices");
            } else {
                for device in &devices {
                    println!(
                        "{}  {}  linked {}",
                        device.id,
                        device.display_name(),
                        device.linked_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        Commands::Authorize { file } => {
            let candidate = read_candidate(&file)?;
            let (request, handle) = match manager.request_link(master) {
                Ok(pair) => pair,
                Err(e) => bail!("{}: {e}", UserOutcome::for_request_error(&e)),
            };
            hand_off(&handle, candidate)?;
            drop(handle);

            let outcome = manager.await_link(request).await;
            let category = UserOutcome::for_link(&outcome);
            match outcome {
                LinkOutcome::Authorized(device) => {
                    println!("Linked {}", device.display_name());
                }
                LinkOutcome::Failed(e) => bail!(
                    "{}: {e}",
                    category.unwrap_or(UserOutcome::LinkAuthorizationFailed)
                ),
                LinkOutcome::Canceled => bail!("{}", UserOutcome::LinkCanceled),
            }
        }
        Commands::Unlink { device } => {
            let result = manager.unlink_device(master, &device).await;
            let category = UserOutcome::for_unlink(&result);
            match result {
                Ok(summary) => {
                    println!("{category}: {} device(s) unlinked", summary.unlinked.len());
                    for id in &summary.undelivered {
                        eprintln!("warning: unlink notification not delivered to {id}");
                    }
                }
                Err(e) => bail!("{category}: {e}"),
            }
        }
        Commands::Rename { device, name } => {
            let device = manager
                .rename_device(master, &device, name.as_deref())
                .await?;
            println!("Renamed to {}", device.display_name());
        }
        Commands::Config => {}
    }

    Ok(())
}

fn read_candidate(path: &Path) -> Result<DeviceLink> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&text).context("Invalid device link request")
}

/// Deliver the candidate to the pending request, failing loudly if it is
/// refused instead of letting the wait report a cancel.
fn hand_off(handle: &LinkRequestHandle, candidate: DeviceLink) -> Result<()> {
    if !handle.submit(candidate) {
        bail!(
            "{}: link request was not accepted",
            UserOutcome::LinkAuthorizationFailed
        );
    }
    Ok(())
}

fn redacted(mut config: DeviceLinkConfig) -> DeviceLinkConfig {
    if config.directory.auth_token.is_some() {
        config.directory.auth_token = Some("***".into());
    }
    for key in config.messaging.unidentified_access.values_mut() {
        *key = "***".into();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &Path) -> DeviceLinkManager {
        let config = DeviceLinkConfig {
            data_dir: Some(dir.to_path_buf()),
            ..DeviceLinkConfig::default()
        };
        DeviceLinkManager::from_config(&config).unwrap()
    }

    #[test]
    fn hand_off_reports_refused_submission() {
        let tmp = tempfile::TempDir::new().unwrap();
        let manager = manager_in(tmp.path());
        let (_request, handle) = manager.request_link("master").unwrap();
        handle.cancel();

        let err = hand_off(&handle, DeviceLink::new("master", "slave")).unwrap_err();
        assert!(err.to_string().contains("not accepted"));
        assert!(err.to_string().starts_with("link_authorization_failed"));
    }

    #[test]
    fn hand_off_accepts_first_candidate() {
        let tmp = tempfile::TempDir::new().unwrap();
        let manager = manager_in(tmp.path());
        let (_request, handle) = manager.request_link("master").unwrap();

        hand_off(&handle, DeviceLink::new("master", "slave")).unwrap();
    }

    #[test]
    fn config_output_hides_secrets() {
        let mut config = DeviceLinkConfig::default();
        config.directory.auth_token = Some("token".into());
        config
            .messaging
            .unidentified_access
            .insert("device".into(), "AQEBAQ==".into());

        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("token\""));
        assert!(!shown.contains("AQEBAQ=="));
    }
}
