//! dokku-reconcile CLI entrypoint.
//!
//! This is the main entrypoint for the dokku-reconcile command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use dokku_reconcile::cli::{Cli, Commands, OutputFormatter, StateCommands};
use dokku_reconcile::config::{find_config_file, ConfigParser, ConfigValidator, Manifest};
use dokku_reconcile::dokku::{check_compatibility, DokkuClient, DokkuProvisioner};
use dokku_reconcile::error::{ConfigError, ReconcileError, Result};
use dokku_reconcile::reconciler::{PlanPreview, ReconciliationResult, Reconciler};
use dokku_reconcile::state::{LocalStateStore, StateStore};

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config, detailed, &formatter).await,
        Commands::Apply {
            yes,
            continue_on_error,
        } => cmd_apply(config, yes, continue_on_error, &formatter).await,
        Commands::Status => cmd_status(config, &formatter).await,
        Commands::Drift => cmd_drift(config, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config, yes, &formatter).await,
        Commands::Apps => cmd_apps(config, &formatter).await,
        Commands::Version => cmd_version(config, &formatter).await,
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Validate the manifest.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating manifest: {}", config_file.display());

    let manifest = load_manifest(&config_file)?;
    let report = ConfigValidator::new().check(&manifest);

    println!("{}", formatter.format_validation(&report, &manifest, show_warnings));

    match report.errors.first() {
        None => Ok(()),
        Some(issue) => {
            Err(ConfigError::validation(issue.message.clone(), issue.field.clone()).into())
        }
    }
}

/// Show the plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, state_store) = load_manifest_and_state(config_path)?;
    let provisioner = connect(&manifest, formatter).await?;

    let preview = Reconciler::new(&manifest, &state_store, &provisioner).plan().await?;
    println!("{}", formatter.format_plan(&preview, detailed));

    Ok(())
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    continue_on_error: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, state_store) = load_manifest_and_state(config_path)?;
    let provisioner = connect(&manifest, formatter).await?;

    let reconciler = Reconciler::new(&manifest, &state_store, &provisioner)
        .with_continue_on_error(continue_on_error);

    let result = reconciler
        .reconcile(|preview: &PlanPreview| {
            println!("{}", formatter.format_plan(preview, false));
            if auto_approve {
                return Ok(true);
            }
            confirm("Do you want to apply this plan? [y/N]: ", "y")
        })
        .await?;

    finish(&result, formatter)
}

/// Show recorded resources.
async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (_manifest, state_store) = load_manifest_and_state(config_path)?;

    let state = state_store.load().await?;
    let lock = state_store.get_lock_info().await?;
    println!("{}", formatter.format_status(state.as_ref(), lock.as_ref()));

    Ok(())
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (manifest, state_store) = load_manifest_and_state(config_path)?;
    let provisioner = connect(&manifest, formatter).await?;

    let report = Reconciler::new(&manifest, &state_store, &provisioner)
        .check_drift()
        .await?;
    println!("{}", formatter.format_drift(&report));

    Ok(())
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, state_store) = load_manifest_and_state(config_path)?;
    let provisioner = connect(&manifest, formatter).await?;

    let result = Reconciler::new(&manifest, &state_store, &provisioner)
        .destroy(|preview: &PlanPreview| {
            println!("{}", formatter.format_plan(preview, false));
            if auto_approve {
                return Ok(true);
            }
            confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")
        })
        .await?;

    finish(&result, formatter)
}

/// List the apps on the host.
async fn cmd_apps(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (manifest, _state_store) = load_manifest_and_state(config_path)?;
    let provisioner = connect(&manifest, formatter).await?;

    let apps = provisioner.observer().list_apps().await?;
    println!("{}", formatter.format_apps(&apps));

    Ok(())
}

/// Show the host version.
async fn cmd_version(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (mut manifest, _state_store) = load_manifest_and_state(config_path)?;
    // Report the version even when it is outside the tested range.
    manifest.provider.fail_on_untested_version = false;

    let connection = DokkuClient::from_provider(&manifest.provider).await?;
    let version = connection.client.version();
    let compatibility = check_compatibility(version, false)?;
    println!("{}", formatter.format_version(version, &compatibility));

    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, state_store) = load_manifest_and_state(config_path)?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                println!("{}", formatter.format_state(&state));
            } else {
                eprintln!("No state found at {}.", state_store.location());
            }
        }
        StateCommands::Import {
            kind,
            key,
            remote_name,
        } => {
            let provisioner = connect(&manifest, formatter).await?;
            let imported = Reconciler::new(&manifest, &state_store, &provisioner)
                .import(kind, &key, remote_name.as_deref())
                .await?;
            eprintln!(
                "{}",
                formatter.success(&format!("Imported {kind} '{key}' as {}", imported.id))
            );
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match state_store.force_unlock().await? {
                    Some(lock) => eprintln!(
                        "{}",
                        formatter.success(&format!(
                            "Removed lock held by {} ({})",
                            lock.holder, lock.lock_id
                        ))
                    ),
                    None => eprintln!("State is not locked."),
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Prints a reconciliation result, failing if any action failed.
fn finish(result: &ReconciliationResult, formatter: &OutputFormatter) -> Result<()> {
    println!("{}", formatter.format_reconciliation(result));
    if result.success || result.cancelled {
        Ok(())
    } else {
        Err(ReconcileError::Aborted {
            reason: format!("{} action(s) failed", result.errors.len()),
        }
        .into())
    }
}

/// Asks for confirmation on the terminal.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    let accepted = input.trim().eq_ignore_ascii_case(expected);
    if !accepted {
        eprintln!("Cancelled.");
    }
    Ok(accepted)
}

/// Resolves the manifest path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Returns the directory holding the manifest.
fn manifest_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Loads the manifest with `.env` and environment overrides applied.
fn load_manifest(config_file: &Path) -> Result<Manifest> {
    let parser = ConfigParser::new().with_base_path(manifest_dir(config_file));
    parser.load_dotenv()?;
    parser.load_with_env(config_file)
}

/// Loads and validates the manifest and opens its state store.
fn load_manifest_and_state(config_path: Option<&PathBuf>) -> Result<(Manifest, LocalStateStore)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading manifest from: {}", config_file.display());

    let manifest = load_manifest(&config_file)?;
    let report = ConfigValidator::new().validate(&manifest)?;
    for warning in &report.warnings {
        debug!("Manifest warning: {warning}");
    }

    let state_store =
        LocalStateStore::from_config(manifest.state.path.as_deref(), manifest_dir(&config_file));
    debug!("Using state file {}", state_store.location());

    Ok((manifest, state_store))
}

/// Connects to the host and builds a provisioner.
async fn connect(manifest: &Manifest, formatter: &OutputFormatter) -> Result<DokkuProvisioner> {
    let connection = DokkuClient::from_provider(&manifest.provider).await?;
    for warning in &connection.warnings {
        eprintln!("{}", formatter.warning(warning));
    }
    Ok(DokkuProvisioner::new(connection.client))
}
