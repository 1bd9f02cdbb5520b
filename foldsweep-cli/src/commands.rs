//! Subcommand handlers.

use crate::report;
use crate::{Commands, ConfigAction, RunArgs};
use foldsweep_core::config::{load_config, workspace_config_path};
use foldsweep_core::{
    AmbientState, ConfigOverrides, NormalResultGenerator, SweepConfig, SweepOrchestrator,
    SweepSummary, TrackingClient, build_backend,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => handle_run(args, workspace).await,
        Commands::Config { action } => handle_config(action, workspace),
    }
}

impl RunArgs {
    /// Flags that were given, as config overrides.
    pub fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        overrides
            .set_opt("sweep.num_folds", self.num_folds)
            .set_opt("generator.mu", self.mu)
            .set_opt("generator.sigma", self.sigma)
            .set_opt("generator.seed", self.seed)
            .set_opt("tracker.project", self.project.clone())
            .set_opt("tracker.entity", self.entity.clone());
        if self.offline {
            overrides.set("tracker.offline", true);
        }
        overrides
    }
}

async fn handle_run(args: RunArgs, workspace: &Path) -> anyhow::Result<()> {
    let config = load_config(Some(workspace), &args.config, Some(&args.overrides()))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.validate()?;

    let summary = run_sweep(
        &config,
        &args.config,
        workspace,
        AmbientState::from_env(),
        &mut std::io::stdout(),
    )
    .await?;
    info!(
        record_id = %summary.sweep_record_id,
        aggregate = summary.aggregate,
        "Sweep finished"
    );
    Ok(())
}

/// Run one sweep with a fully resolved configuration, reporting to `out`.
pub async fn run_sweep(
    config: &SweepConfig,
    config_files: &[PathBuf],
    workspace: &Path,
    ambient: AmbientState,
    out: &mut impl Write,
) -> anyhow::Result<SweepSummary> {
    let api_key = std::env::var(&config.tracker.api_key_env).ok();
    if api_key.is_none() && !config.tracker.is_offline() {
        warn!(
            var = %config.tracker.api_key_env,
            "No API key found; requests will be sent unauthenticated"
        );
    }
    let backend = build_backend(&config.tracker, api_key);
    let client = TrackingClient::new(backend, config.tracker.project_ref(), ambient);

    let resolved = config.to_config_map(config_files, Some(workspace));
    let mut generator = NormalResultGenerator::from_config(&config.generator);
    report::write_preamble(out, &resolved, &generator)?;

    let mut orchestrator = SweepOrchestrator::new(client, config.sweep.clone());
    let summary = orchestrator.run(&mut generator, resolved).await?;

    report::write_summary(out, &summary)?;
    Ok(summary)
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&config_path, SweepConfig::default().to_toml()?)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), &[], None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
