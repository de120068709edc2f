use anyhow::{Context, Result};
use prober::cli::commands::{CompileCommand, DescribeCommand, HistoryCommand, RunCommand, ValidateCommand};
use prober::cli::output::*;
use prober::cli::prompt::ConsolePrompt;
use prober::cli::{Cli, Command};
use prober::compiler::PatternCompiler;
use prober::core::{
    CapabilityDescriptor, CapabilityRegistry, CompiledConfiguration, DataMap, DeviceDescriptor,
    ExperimentResult, GeneratedProcedure, HardwareRegistry, ParsedProcedure, RunStatus, Settings,
    StageDescriptor,
};
use prober::device::{DeviceLifecycleManager, DriverRegistry};
use prober::execution::{ExecutionEngine, ExecutionEvent, StageRegistry};
use prober::persistence::{create_summary, save_run_output, ArtifactStore, ResultStore, RunSummary};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    install_capabilities(&builtin_drivers(&settings))?;

    // Execute command
    match &cli.command {
        Command::Compile(cmd) => compile_procedure(cmd, &settings)?,
        Command::Validate(cmd) => validate_procedure(cmd, &settings)?,
        Command::Run(cmd) => run_experiment(cmd, &settings).await?,
        Command::Describe(cmd) => describe_drivers(cmd, &settings)?,
        Command::History(cmd) => show_history(cmd, &settings).await?,
    }

    Ok(())
}

fn builtin_drivers(settings: &Settings) -> DriverRegistry {
    DriverRegistry::builtin(Duration::from_millis(settings.device_timeout_ms))
}

/// Freeze the capabilities of every built-in driver before compiling or running
fn install_capabilities(drivers: &DriverRegistry) -> Result<()> {
    drivers.capability_registry()?.install()?;
    Ok(())
}

fn installed_capabilities() -> Result<&'static CapabilityRegistry> {
    CapabilityRegistry::global().context("Driver capabilities were not installed")
}

fn load_hardware(settings: &Settings) -> Result<HardwareRegistry> {
    HardwareRegistry::from_file(&settings.hardware_file).with_context(|| {
        format!(
            "Failed to load hardware registry {}",
            settings.hardware_file.display()
        )
    })
}

/// Compile an authored procedure, exiting with the compile error on failure
fn compile(
    parsed: &ParsedProcedure,
    name: &str,
    settings: &Settings,
) -> Result<(CompiledConfiguration, GeneratedProcedure)> {
    let capabilities = installed_capabilities()?;
    let hardware = load_hardware(settings)?;

    match PatternCompiler::new(capabilities, &hardware).compile(parsed, name) {
        Ok(compiled) => Ok(compiled),
        Err(e) => {
            println!("{} Compilation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

fn print_pending_inputs(config: &CompiledConfiguration) {
    let missing = config.missing_data();
    if missing.is_empty() {
        return;
    }
    println!("{} Inputs to supply with --set before running:", WARN);
    for key in missing {
        println!("  {}", style(key).cyan());
    }
}

fn compile_procedure(cmd: &CompileCommand, settings: &Settings) -> Result<()> {
    let parsed = ParsedProcedure::from_file(&cmd.file).context("Failed to load procedure")?;
    let name = cmd.name.clone().unwrap_or_else(|| parsed.name.clone());

    println!("{} Compiling {} ({} steps)", INFO, style(&name).bold(), parsed.steps.len());
    let (mut config, procedure) = compile(&parsed, &name, settings)?;

    let builtins = StageRegistry::new();
    for (stage, order) in &cmd.stage {
        if !builtins.builtin_names().any(|known| known == stage.as_str()) {
            anyhow::bail!("Unknown built-in stage: {}", stage);
        }
        config = config.with_stage(StageDescriptor::builtin(stage, *order));
    }

    let (config_path, procedure_path) =
        ArtifactStore::from_settings(settings).save(&name, &config, &procedure)?;

    println!("{} Compiled {}", CHECK, style(&name).bold());
    println!("  Devices: {}", style(config.devices.join(", ")).cyan());
    println!("  Configuration: {}", style(config_path.display()).dim());
    println!("  Procedure: {}", style(procedure_path.display()).dim());
    print_pending_inputs(&config);

    if cmd.json {
        println!("\n{}", config.to_json()?);
    }
    Ok(())
}

fn validate_procedure(cmd: &ValidateCommand, settings: &Settings) -> Result<()> {
    println!("{} Validating procedure...", INFO);

    let parsed = ParsedProcedure::from_file(&cmd.file).context("Failed to load procedure")?;
    let name = parsed.name.clone();
    let (config, procedure) = compile(&parsed, &name, settings)?;

    println!("{} Procedure compiles!", CHECK);
    println!("  Name: {}", style(&config.name).bold());
    println!("  Steps: {}", style(procedure.statements.len()).cyan());
    println!("  Devices: {}", style(config.devices.join(", ")).cyan());
    println!("\n{}", procedure);
    print_pending_inputs(&config);
    Ok(())
}

async fn run_experiment(cmd: &RunCommand, settings: &Settings) -> Result<()> {
    let artifacts = ArtifactStore::from_settings(settings);
    let config = artifacts
        .load_config(&cmd.experiment)
        .with_context(|| format!("Failed to load experiment {}", cmd.experiment))?;
    let procedures = artifacts.load_procedures(&config)?;
    let hardware = load_hardware(settings)?;

    println!("{} Loaded experiment: {}", INFO, style(&config.name).bold());

    let drivers = builtin_drivers(settings);
    let drivers = if cmd.simulate {
        println!("{} Using simulated instruments", WARN);
        drivers.simulated()
    } else {
        drivers
    };

    let mut lifecycle = DeviceLifecycleManager::new(Arc::new(drivers));
    for (device, address) in &cmd.address {
        println!(
            "{} Address override: {} = {}",
            INFO,
            style(device).cyan(),
            style(address).dim()
        );
        lifecycle = lifecycle.with_address(device, address);
    }
    if cmd.simulate {
        lifecycle = lifecycle.with_resolver(Arc::new(|_: &str, _: &DeviceDescriptor| {
            Some("simulated".to_string())
        }));
    } else if let Some(prompt) = ConsolePrompt::interactive() {
        lifecycle = lifecycle.with_resolver(Arc::new(prompt));
    }

    // Apply data overrides
    let mut overrides = DataMap::new();
    for (key, value) in &cmd.set {
        println!(
            "{} Data override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
        overrides.insert_text(key.clone(), value.clone());
    }
    let unset: Vec<&str> = config
        .missing_data()
        .into_iter()
        .filter(|key| !overrides.contains(key))
        .collect();
    if !unset.is_empty() {
        println!("{} No value for: {}", WARN, style(unset.join(", ")).yellow());
    }

    let stages = procedures
        .into_iter()
        .fold(StageRegistry::new(), StageRegistry::with_procedure);
    let mut engine = ExecutionEngine::new(lifecycle, stages, cmd.strategy.into());

    // Set up event handler for console output
    let progress = create_progress_bar(config.experiment.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        if matches!(
            event,
            ExecutionEvent::StageCompleted { .. } | ExecutionEvent::StageFailed { .. }
        ) {
            bar.inc(1);
        }
        bar.println(format_execution_event(&event));
    });

    println!();
    let result = ExperimentResult::timestamped(&settings.results_dir, &cmd.experiment);
    let outcome = engine.run(&config, &hardware, overrides, result).await?;
    progress.finish_and_clear();

    let manifest = save_run_output(&outcome, cmd.save_data)?;
    println!("{} Manifest: {}", INFO, style(manifest.display()).dim());

    // Save to history
    if !cmd.no_history {
        let store = open_history(settings).await?;
        let summary = create_summary(&outcome);
        store.save_run(&summary).await?;
        println!(
            "{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    // Print final status
    match &outcome.failure {
        None => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&config.name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        Some(failure) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&config.name).bold(),
                style("failed").red()
            );
            error!("{}", failure);
            std::process::exit(1);
        }
    }
}

fn describe_drivers(cmd: &DescribeCommand, settings: &Settings) -> Result<()> {
    let capabilities = installed_capabilities()?;

    let driver_types = match &cmd.driver {
        Some(driver) => {
            capabilities.describe(driver)?;
            vec![driver.as_str()]
        }
        None => capabilities.driver_types(),
    };

    if cmd.json {
        let mut described: BTreeMap<&str, &CapabilityDescriptor> = BTreeMap::new();
        for driver_type in &driver_types {
            described.insert(*driver_type, capabilities.describe(driver_type)?);
        }
        println!("{}", serde_json::to_string_pretty(&described)?);
        return Ok(());
    }

    println!("{} Drivers:", INFO);
    for driver_type in &driver_types {
        println!("{}\n", format_capabilities(driver_type, capabilities.describe(driver_type)?));
    }

    if cmd.driver.is_none() && settings.hardware_file.exists() {
        let hardware = load_hardware(settings)?;
        println!("{} Devices in {}:", INFO, settings.hardware_file.display());
        for (name, descriptor) in hardware.iter() {
            let connection: String = descriptor.connection.clone().into();
            println!(
                "  {} - {} ({}, {})",
                style(name).bold(),
                style(&descriptor.driver).cyan(),
                connection,
                descriptor.default_address.as_deref().unwrap_or("no default address")
            );
        }
    }
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history(settings: &Settings) -> Result<Arc<dyn ResultStore>> {
    let store = prober::persistence::SqliteResultStore::new(&settings.history_db).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history(_settings: &Settings) -> Result<Arc<dyn ResultStore>> {
    Ok(Arc::new(prober::persistence::InMemoryResultStore::new()))
}

async fn show_history(cmd: &HistoryCommand, settings: &Settings) -> Result<()> {
    let store = open_history(settings).await?;

    // If a specific run is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = store.list_runs(cmd.experiment.as_deref(), cmd.limit).await?;
    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Experiment: {}", style(&summary.experiment).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(finished) = summary.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Stages: {}/{}",
        summary.completed_stages, summary.total_stages
    );
    println!("  Artifacts: {}", summary.artifact_count);
    println!("  Results: {}", style(&summary.results_dir).dim());
    if summary.status == RunStatus::Failed {
        if let Some(stage) = &summary.failed_stage {
            println!("  Failed stage: {}", style(stage).red());
        }
        if let Some(error) = &summary.error {
            println!("  Error: {}", style(error).red());
        }
    }

    Ok(())
}
