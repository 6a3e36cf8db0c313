//! flyrec CLI entrypoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use flyrec::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use flyrec::config::{find_config_file, ConfigParser, ConfigValidator, Manifest};
use flyrec::error::{FlyrecError, PlanError, Result};
use flyrec::resources::ResourceKind;
use flyrec::state::{generate_holder_id, LocalStateStore, StateStore};
use flyrec::workspace::Workspace;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan { refresh, detailed } => {
            cmd_plan(config, refresh, detailed, &formatter).await
        }
        Commands::Apply { yes, continue_on_error } => {
            cmd_apply(config, yes, continue_on_error, &formatter).await
        }
        Commands::Refresh => cmd_refresh(config, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config, yes, &formatter).await,
        Commands::Import { kind, name, id } => {
            cmd_import(config, kind, &name, &id, &formatter).await
        }
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Validate the manifest.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating manifest: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let manifest = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&manifest);
    emit(formatter, &formatter.format_validation(&result, show_warnings))?;

    if !formatter.is_json() && result.is_valid() {
        eprintln!("\nManifest summary:");
        eprintln!("  Apps: {}", manifest.apps.len());
        eprintln!("  Machines: {}", manifest.machines.len());
        eprintln!("  IP addresses: {}", manifest.ips.len());
        eprintln!("  State file: {}", manifest.state.path());
    }

    Ok(exit_code(result.is_valid()))
}

/// Show what apply would do.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    refresh: bool,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (manifest, workspace) = open_workspace(config_path)?;

    if refresh {
        let report = workspace.refresh().await?;
        if !formatter.is_json() {
            eprintln!("{}", formatter.format_refresh(&report));
        }
    }

    let outcome = workspace.plan(&manifest).await?;
    emit(formatter, &formatter.format_plan(&outcome.plan, &outcome.diff, detailed))?;
    Ok(ExitCode::SUCCESS)
}

/// Apply the manifest.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    continue_on_error: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (manifest, workspace) = open_workspace(config_path)?;

    let outcome = workspace.plan(&manifest).await?;
    if outcome.plan.is_empty() && outcome.plan.adopted.is_empty() {
        eprintln!("No changes to apply.");
        return Ok(ExitCode::SUCCESS);
    }

    if !formatter.is_json() {
        eprintln!("{}", formatter.format_plan(&outcome.plan, &outcome.diff, false));
    }

    let needs_confirmation = !auto_approve && !outcome.plan.is_empty();
    if needs_confirmation
        && !confirm("Do you want to apply this plan? [y/N]: ", |input| {
            input.eq_ignore_ascii_case("y")
        })?
    {
        eprintln!("Apply cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let result = workspace.apply(&manifest, continue_on_error).await?;
    emit(formatter, &formatter.format_execution(&result))?;

    if !result.all_successful() {
        warn!(
            "{}",
            PlanError::ApplyFailed {
                failed: result.failed,
                total: result.total_executed() + result.not_run,
            }
        );
    }
    Ok(exit_code(result.all_successful()))
}

/// Re-read tracked resources from Fly.
async fn cmd_refresh(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (_manifest, workspace) = open_workspace(config_path)?;

    let report = workspace.refresh().await?;
    emit(formatter, &formatter.format_refresh(&report))?;
    Ok(exit_code(!report.has_errors()))
}

/// Delete every tracked resource.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (_manifest, workspace) = open_workspace(config_path)?;

    let state = workspace.store().load_or_default().await?;
    if state.resources.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(ExitCode::SUCCESS);
    }

    if !auto_approve {
        eprintln!("The following resources will be destroyed:");
        for address in state.addresses() {
            eprintln!("  - {address}");
        }
        if !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            |input| input == "destroy",
        )? {
            eprintln!("Destroy cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let result = workspace.destroy().await?;
    emit(formatter, &formatter.format_execution(&result))?;
    Ok(exit_code(result.all_successful()))
}

/// Track an existing remote resource.
async fn cmd_import(
    config_path: Option<&PathBuf>,
    kind: ResourceKind,
    name: &str,
    id: &str,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (_manifest, workspace) = open_workspace(config_path)?;

    let report = workspace.import(kind, name, id).await?;
    emit(formatter, &formatter.format_import(&report))?;
    Ok(exit_code(report.record.is_some()))
}

/// State management commands. These never talk to Fly.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (_manifest, store) = load_manifest_and_store(config_path)?;

    match command {
        StateCommands::Show => match store.load().await? {
            Some(state) => emit(formatter, &formatter.format_state(&state))?,
            None => eprintln!("No state found at {}.", store.state_path().display()),
        },
        StateCommands::List => {
            let state = store.load_or_default().await?;
            emit(formatter, &formatter.format_resources(&state))?;
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder, "manual").await?;
            emit(formatter, &formatter.format_lock(Some(&lock)))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                eprintln!("State forcefully unlocked.");
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                let current = store.get_lock_info().await?;
                emit(formatter, &formatter.format_lock(current.as_ref()))?;
                eprintln!("Provide --lock-id or use --force to unlock.");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the manifest path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

/// Loads and validates the manifest and opens its state store. A relative
/// state path is resolved against the manifest's directory.
fn load_manifest_and_store(config_path: Option<&PathBuf>) -> Result<(Manifest, LocalStateStore)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading manifest from: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let manifest = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&manifest)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    let base_dir = config_file.parent().unwrap_or_else(|| Path::new("."));
    let store = LocalStateStore::new(base_dir.join(manifest.state.path()));
    Ok((manifest, store))
}

/// Loads the manifest and connects a workspace to Fly.
fn open_workspace(config_path: Option<&PathBuf>) -> Result<(Manifest, Workspace<LocalStateStore>)> {
    let (manifest, store) = load_manifest_and_store(config_path)?;
    let token = ConfigParser::resolve_token()?;
    let workspace = Workspace::connect(&manifest, &token, store)?;
    Ok((manifest, workspace))
}

/// Prompts on stderr and checks the trimmed answer.
fn confirm(prompt: &str, accept: impl Fn(&str) -> bool) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(accept(input.trim()))
}

/// JSON goes to stdout for piping; text goes to stderr.
fn emit(formatter: &OutputFormatter, output: &str) -> Result<()> {
    if formatter.is_json() {
        writeln!(std::io::stdout(), "{output}").map_err(FlyrecError::Io)?;
    } else {
        eprintln!("{output}");
    }
    Ok(())
}

const fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
