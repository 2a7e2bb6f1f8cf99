//! Convergent CLI entrypoint.
//!
//! This is the main entrypoint for the convergent command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use convergent::cli::{Cli, Commands, OutputFormatter, StateCommands};
use convergent::config::{
    ConfigHasher, ConfigParser, ConfigValidator, EngineConfig, RemoteBackend, RemoteConfig, ResourceConfig,
    find_config_file,
};
use convergent::error::{ConfigError, ConvergentError, Result};
use convergent::planner::{ManifestPlan, PlanAction};
use convergent::reconciler::{ManagedResource, Reconciler, Verifier};
use convergent::remote::{HttpRemoteClient, InMemoryRemote, RemoteClient};
use convergent::schema::{SchemaRegistry, global, install_global};
use convergent::state::{Journal, LocalStateStore, StateStore};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

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

/// Initializes the logging system. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config, warnings),
        Commands::Schemas { kind } => cmd_schemas(kind.as_deref(), &formatter),
        Commands::Plan { expect, detailed } => cmd_plan(config, expect, detailed, &formatter).await,
        Commands::Apply { yes } => cmd_apply(config, yes, &formatter).await,
        Commands::Import { kind, id, name } => cmd_import(config, &kind, &id, name, &formatter).await,
        Commands::Verify { import } => cmd_verify(config, import, &formatter).await,
        Commands::Drift => cmd_drift(config, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config, yes, &formatter).await,
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Validate configuration.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let registry = registry()?;
    let result = ConfigValidator::new(&registry).validate(&config)?;

    eprintln!("Configuration is valid!");
    if show_warnings && result.warning_count() > 0 {
        eprintln!("\nWarnings:");
        for warning in &result.warnings {
            eprintln!("  - {warning}");
        }
    } else if result.warning_count() > 0 {
        eprintln!("({} warnings, use --warnings to show)", result.warning_count());
    }

    let hasher = ConfigHasher::new();
    eprintln!("\nConfiguration summary:");
    eprintln!("  Backend: {}", config.remote.backend);
    eprintln!("  Resources: {}", config.resources.len());
    for resource in &config.resources {
        eprintln!(
            "    - {} ({}) {}",
            resource.name,
            resource.kind,
            hasher.short_hash(&hasher.hash_resource(resource))
        );
    }
    eprintln!("  Config hash: {}", hasher.short_hash(&hasher.hash_config(&config)));

    Ok(())
}

/// List registered kinds, or the fields of one kind.
fn cmd_schemas(kind: Option<&str>, formatter: &OutputFormatter) -> Result<()> {
    let registry = registry()?;
    let output = match kind {
        Some(kind) => formatter.format_schema(&*registry.lookup(kind)?),
        None => formatter.format_schemas(&registry),
    };
    println!("{output}");
    Ok(())
}

/// Show the plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    expect: Option<PlanAction>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::load(config_path)?;
    let plan = workspace.plan().await?;

    println!("{}", formatter.format_plan(&plan, detailed));

    if let Some(expected) = expect {
        for resource in &plan.resources {
            Verifier::expect_action(resource, expected)?;
        }
        eprintln!(
            "{}",
            formatter.success(&format!("All {} resources plan to {expected}", plan.resources.len()))
        );
    }

    Ok(())
}

/// Apply the plan.
async fn cmd_apply(config_path: Option<&PathBuf>, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(config_path)?;
    let plan = workspace.plan().await?;

    if plan.is_empty() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    eprintln!("{}", formatter.format_plan(&plan, true));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    workspace.cancel_on_interrupt();
    let mut journal = workspace.store.load().await?.unwrap_or_default();
    let resources = workspace.resources_from(&journal)?;
    let names: Vec<String> = resources.iter().map(|r| r.name.clone()).collect();

    let mut reports = Vec::with_capacity(resources.len());
    let mut failures = Vec::new();

    for (name, outcome) in names.iter().zip(workspace.reconciler.reconcile_all(resources).await) {
        match outcome {
            Ok(report) => {
                journal.record(&report.name, &report.plan.config_hash, &report.record);
                reports.push(report);
            }
            Err(e) => {
                error!(resource = %name, "Cycle failed: {e}");
                failures.push(format!("{name}: {e}"));
            }
        }
    }

    if failures.is_empty() && reports.iter().all(|r| r.is_converged()) {
        journal.config_hash.clone_from(&plan.config_hash);
    }
    warn_unmanaged(&journal, &names);
    workspace.store.save(&journal).await?;

    println!("{}", formatter.format_cycles(&reports, &failures));

    if let Some(e) = failures.first() {
        return Err(ConvergentError::internal(format!(
            "{} of {} resources failed: {e}",
            failures.len(),
            names.len()
        )));
    }
    for report in reports {
        report.into_result()?;
    }
    Ok(())
}

/// Import a resource and print it as a manifest entry.
async fn cmd_import(
    config_path: Option<&PathBuf>,
    kind: &str,
    remote_id: &str,
    name: Option<String>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::load(config_path)?;
    let desired = workspace.reconciler.import(kind, remote_id).await?;

    let entry = ResourceConfig {
        name: name.unwrap_or_else(|| remote_id.rsplit('/').next().unwrap_or(remote_id).to_string()),
        kind: kind.to_string(),
        desired: desired.document.into_value(),
    };

    println!("{}", formatter.format_import(&entry)?);
    Ok(())
}

/// Verify that managed resources are stable.
async fn cmd_verify(config_path: Option<&PathBuf>, with_import: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(config_path)?;
    let verifier = workspace.reconciler.verifier();

    let mut outcomes = Vec::new();
    for resource in workspace.resources().await? {
        let mut outcome = verifier
            .verify_stable(&resource.kind, &resource.desired)
            .await
            .map(|_| ());

        if with_import && outcome.is_ok() {
            outcome = match workspace.remote_id(&resource) {
                Ok(remote_id) => {
                    verifier
                        .verify_import(&resource.kind, &remote_id, &resource.desired)
                        .await
                }
                Err(e) => Err(e),
            };
        }
        outcomes.push((resource.name, outcome));
    }

    println!("{}", formatter.format_verification(&outcomes));

    let failed = outcomes.iter().filter(|(_, o)| o.is_err()).count();
    if failed > 0 {
        return Err(ConvergentError::internal(format!(
            "{failed} of {} resources failed verification",
            outcomes.len()
        )));
    }
    Ok(())
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(config_path)?;
    let report = workspace.reconciler.check_drift(&workspace.resources().await?).await?;

    println!("{}", formatter.format_drift(&report));
    Ok(())
}

/// Destroy every managed resource.
async fn cmd_destroy(config_path: Option<&PathBuf>, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(config_path)?;
    let plan = workspace.plan().await?;

    let existing: Vec<_> = plan
        .resources
        .iter()
        .filter(|r| r.plan.action() != PlanAction::Create)
        .collect();

    if existing.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for resource in &existing {
        eprintln!("  - {} ({})", resource.name, resource.existing_remote_id());
    }

    if !auto_approve && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    workspace.cancel_on_interrupt();
    let verifier = workspace.reconciler.verifier();
    let mut journal = workspace.store.load().await?.unwrap_or_default();
    let mut failed = 0usize;

    // Reverse manifest order.
    for resource in existing.iter().rev() {
        eprintln!("Destroying {}...", resource.name);
        let remote_id = resource.existing_remote_id();
        let record = workspace.reconciler.destroy_by_id(&resource.kind, remote_id).await;
        journal.record(&resource.name, "", &record);

        let outcome = match record.into_result() {
            Ok(_) => verifier.verify_destroyed(&resource.kind, remote_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            error!(resource = %resource.name, "Failed to destroy: {e}");
            eprintln!("{}", formatter.error(&format!("{}: {e}", resource.name)));
            failed += 1;
        }
    }

    if journal.resources.is_empty() {
        journal.config_hash.clear();
    }
    workspace.store.save(&journal).await?;

    if failed > 0 {
        return Err(ConvergentError::internal(format!(
            "{failed} of {} resources were not destroyed",
            existing.len()
        )));
    }

    eprintln!("{}", formatter.success("All resources destroyed."));
    Ok(())
}

/// Journal commands.
async fn cmd_state(config_path: Option<&PathBuf>, command: StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    let store = LocalStateStore::new(state_dir(&config, &config_file));

    match command {
        StateCommands::Show => {
            if let Some(journal) = store.load().await? {
                println!("{}", formatter.format_journal(&journal));
            } else {
                eprintln!("No journal found.");
            }
        }
        StateCommands::Clear { yes } => {
            if !store.exists().await? {
                eprintln!("No journal found.");
                return Ok(());
            }
            if !yes && !confirm("Delete the journal? Remote resources are not affected. [y/N]: ", "y")? {
                eprintln!("Clear cancelled.");
                return Ok(());
            }
            store.delete().await?;
            eprintln!("{}", formatter.success("Journal deleted."));
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Everything a command needs to talk to the remote.
struct Workspace {
    config: EngineConfig,
    reconciler: Reconciler,
    store: LocalStateStore,
}

impl Workspace {
    /// Loads and validates the manifest, then wires the engine.
    fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let (config, config_file) = load_config(config_path)?;

        let registry = registry()?;
        let result = ConfigValidator::new(&registry).validate(&config)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }

        let client = create_client(&config.remote)?;
        let reconciler = Reconciler::from_config(registry, client, &config);
        let store = LocalStateStore::new(state_dir(&config, &config_file));

        Ok(Self {
            config,
            reconciler,
            store,
        })
    }

    /// Manifest resources linked to the identifiers the journal last saw.
    async fn resources(&self) -> Result<Vec<ManagedResource>> {
        let journal = self.store.load().await?.unwrap_or_default();
        self.resources_from(&journal)
    }

    fn resources_from(&self, journal: &Journal) -> Result<Vec<ManagedResource>> {
        self.config
            .resources
            .iter()
            .map(|config| {
                let resource = ManagedResource::from_config(config)?;
                Ok(match journal.get(&config.name) {
                    Some(record) if record.kind == config.kind && !record.remote_id.is_empty() => {
                        resource.with_previous_remote_id(&record.remote_id)
                    }
                    _ => resource,
                })
            })
            .collect()
    }

    fn remote_id(&self, resource: &ManagedResource) -> Result<String> {
        let schema = self.reconciler.executor().registry().lookup(&resource.kind)?;
        Ok(schema.resolve_identity(&resource.desired.document)?)
    }

    async fn plan(&self) -> Result<ManifestPlan> {
        let plans = self.reconciler.plan_all(&self.resources().await?).await?;
        Ok(ManifestPlan::new(ConfigHasher::new().hash_config(&self.config), plans))
    }

    /// Cancels in-flight cycles on Ctrl-C.
    fn cancel_on_interrupt(&self) {
        let token = self.reconciler.cancellation_token().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling in-flight operations");
                token.cancel();
            }
        });
    }
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads `.env` and the manifest with environment overrides.
fn load_config(config_path: Option<&PathBuf>) -> Result<(EngineConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    Ok((config, config_file))
}

fn config_dir(config_file: &Path) -> &Path {
    config_file.parent().unwrap_or_else(|| Path::new("."))
}

/// Resolves the journal directory relative to the manifest.
fn state_dir(config: &EngineConfig, config_file: &Path) -> PathBuf {
    if config.state.path.is_absolute() {
        config.state.path.clone()
    } else {
        config_dir(config_file).join(&config.state.path)
    }
}

/// Returns the process-wide registry, installing the builtin kinds on first use.
fn registry() -> Result<Arc<SchemaRegistry>> {
    match global() {
        Some(registry) => Ok(registry),
        None => install_global(SchemaRegistry::builtin()?),
    }
}

/// Creates the remote client for the configured backend.
fn create_client(remote: &RemoteConfig) -> Result<Arc<dyn RemoteClient>> {
    match remote.backend {
        RemoteBackend::Http => {
            let base_url = remote
                .base_url
                .as_deref()
                .ok_or_else(|| ConfigError::validation("Base URL is required for the http backend", "remote.base_url"))?;
            Ok(Arc::new(HttpRemoteClient::new(base_url, remote.token(), remote.timeout())?))
        }
        RemoteBackend::Memory => {
            warn!("Using the in-memory remote; nothing is sent to a real API");
            Ok(Arc::new(InMemoryRemote::new()))
        }
    }
}

/// Journal entries no longer declared in the manifest.
fn warn_unmanaged(journal: &Journal, names: &[String]) {
    for name in journal.names() {
        if !names.iter().any(|n| n == name) {
            warn!(resource = name, "Resource is in the journal but not in the manifest; it is no longer managed");
        }
    }
}

/// Prompts on stderr and compares the answer with `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}
