use std::io::IsTerminal;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tracing_subscriber::EnvFilter;

use vagabond::address::AddressLedger;
use vagabond::cli::{Cli, Command};
use vagabond::config::{self, Settings};
use vagabond::error::VagabondError;
use vagabond::image::ImageCatalog;
use vagabond::instance::InstanceSpec;
use vagabond::lifecycle::{InstanceAction, Lifecycle};
use vagabond::output::{OutputMultiplexer, Palette};
use vagabond::paths;
use vagabond::process::ToolRunner;

#[tokio::main(flavor = "current_thread")]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("vagabond=debug")
    } else if cli.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::from_default_env()
            .add_directive("vagabond=info".parse().expect("valid log directive"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let settings = config::load_settings(cli.config.as_deref())?;

    let colored = !cli.no_color && std::io::stdout().is_terminal() && console::colors_enabled();
    let lifecycle = Lifecycle::new(
        settings.config.tool.clone(),
        settings.state_dir.clone(),
        settings.provision_script(),
        ImageCatalog::with_extra(&settings.config.images),
        Arc::new(ToolRunner),
        Arc::new(OutputMultiplexer::stdout(colored)),
        Arc::new(Palette::new()),
    );

    match cli.command {
        Command::Create {
            name,
            image,
            ram,
            cpus,
            ssh_key,
            ip,
        } => {
            let request = CreateRequest {
                name,
                image,
                ram,
                cpus,
                ssh_key,
                ip,
            };
            run_create(&lifecycle, &settings, request).await?
        }
        Command::Start { addresses } => {
            run_fleet(&lifecycle, &addresses, InstanceAction::Start).await?
        }
        Command::Stop { addresses } => {
            run_fleet(&lifecycle, &addresses, InstanceAction::Stop).await?
        }
        Command::Destroy { addresses } => {
            run_fleet(&lifecycle, &addresses, InstanceAction::Destroy).await?
        }
        Command::List => list_instances(&settings.state_dir)?,
        Command::Images => list_images(&lifecycle).await?,
    }

    Ok(())
}

struct CreateRequest {
    name: String,
    image: Option<String>,
    ram: Option<u32>,
    cpus: Option<u32>,
    ssh_key: Option<PathBuf>,
    ip: Option<Ipv4Addr>,
}

async fn run_create(
    lifecycle: &Lifecycle,
    settings: &Settings,
    request: CreateRequest,
) -> Result<(), VagabondError> {
    let defaults = &settings.config.defaults;
    let ram = request.ram.unwrap_or(defaults.ram_mb);
    let cpus = request.cpus.unwrap_or(defaults.cpus);
    config::validate_name(&request.name)?;
    config::validate_resources(ram, cpus)?;

    let image = request.image.unwrap_or_else(|| defaults.image.clone());
    let public_key = read_public_key(request.ssh_key.as_deref())?;

    let mut spec = InstanceSpec::new(request.name, image)
        .with_resources(ram, cpus)
        .with_ssh_public_key(public_key);
    if let Some(ip) = request.ip {
        spec = spec.at_address(ip, lifecycle.state_dir());
    }

    lifecycle.create(&mut spec).await?;

    if let (Some(address), Some(dir)) = (spec.address(), spec.work_dir()) {
        println!(
            "Instance '{}' created at {address} ({})",
            spec.name,
            dir.display()
        );
    }
    Ok(())
}

fn read_public_key(explicit: Option<&Path>) -> Result<String, VagabondError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let default = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".ssh")
                .join("id_rsa.pub");
            if !default.exists() {
                tracing::warn!("no public key found, instance will not accept key logins");
                return Ok(String::new());
            }
            default
        }
    };

    std::fs::read_to_string(&path)
        .map(|key| key.trim().to_string())
        .map_err(|e| VagabondError::Io {
            context: format!("reading public key {}", path.display()),
            source: e,
        })
}

/// Run `action` on every address concurrently.
///
/// Instance names are not persisted past `create`, so the address doubles as
/// the output label here. A fatal error ends the command straight away. Other
/// failures are reported per instance and the remaining operations carry on.
/// Destroying an address with no state directory counts as done.
async fn run_fleet(
    lifecycle: &Lifecycle,
    addresses: &[Ipv4Addr],
    action: InstanceAction,
) -> Result<(), VagabondError> {
    let state_dir = lifecycle.state_dir();

    let mut pending: FuturesUnordered<_> = addresses
        .iter()
        .map(|&address| async move {
            let spec = InstanceSpec::existing(address.to_string(), address, state_dir);
            let result = match spec.work_dir() {
                Some(dir) if !dir.is_dir() => match action {
                    InstanceAction::Destroy => {
                        tracing::info!(address = %address, "no instance state, already destroyed");
                        Ok(())
                    }
                    _ => Err(VagabondError::Validation {
                        message: format!("no instance at {address}"),
                    }),
                },
                _ => match action {
                    InstanceAction::Destroy => lifecycle.destroy(&spec).await,
                    action => lifecycle.run_action(&spec, action).await,
                },
            };
            (address, result)
        })
        .collect();

    let mut failed = 0;
    while let Some((address, result)) = pending.next().await {
        match result {
            Ok(()) => println!("Instance {address} {}.", action.verb()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!(address = %address, "{e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(VagabondError::OperationsFailed {
            failed,
            total: addresses.len(),
        });
    }
    Ok(())
}

fn list_instances(state_dir: &Path) -> Result<(), VagabondError> {
    let ledger = AddressLedger::snapshot(state_dir)?;
    if ledger.is_empty() {
        println!("No instances.");
        return Ok(());
    }

    for address in ledger.iter() {
        println!(
            "  {address:<16} {}",
            paths::instance_dir(state_dir, address).display()
        );
    }
    println!("\n{} instance(s)", ledger.len());
    Ok(())
}

async fn list_images(lifecycle: &Lifecycle) -> Result<(), VagabondError> {
    let known = lifecycle.images().known_images().await?;

    println!("Available:");
    if known.is_empty() {
        println!("  (none)");
    }
    for name in &known {
        println!("  {name}");
    }

    println!("Importable:");
    for (name, url) in lifecycle.images().catalog().iter() {
        if !known.contains(name) {
            println!("  {name:<12} {url}");
        }
    }
    Ok(())
}
