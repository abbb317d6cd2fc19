//! Magento platform - compile a platform definition into a deployment plan

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use magento_platform::compiler::PlatformCompiler;
use magento_platform::config::{DeploymentPhase, PlatformConfig};
use magento_platform::plan::DeploymentPlan;
use magento_platform::realize::{deploy, DryRunRealizer};

/// Magento platform - declarative deployment plans for a Magento storefront
#[derive(Parser, Debug)]
#[command(name = "magento-platform", version, about, long_about = None)]
struct Cli {
    /// Print the JSON schema of the configuration document and exit
    #[arg(long)]
    schema: bool,

    /// Path to the platform configuration YAML
    ///
    /// When omitted the built-in defaults are used.
    #[arg(short = 'f', long = "config", env = "MAGENTO_PLATFORM_CONFIG", global = true)]
    config_file: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Json, global = true)]
    format: Format,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile the configuration and print the full deployment plan
    Synth {
        /// Write the plan to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print units, deployment waves and cross-unit references
    Graph,

    /// Validate the configuration and report findings
    Validate,

    /// Walk the plan with generated attributes and print the resolved outputs
    DryRun,

    /// Move the application to another deployment phase
    ///
    /// Rewrites the configuration file in place with the new phase.
    Promote {
        /// Target phase: first-boot, bootstrapping or steady
        #[arg(long)]
        to: DeploymentPhase,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.schema {
        let schema = serde_json::to_string_pretty(&PlatformConfig::json_schema())
            .map_err(|e| anyhow::anyhow!("Failed to serialize schema: {}", e))?;
        println!("{schema}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Synth { output }) => run_synth(&cli.config_file, cli.format, output),
        Some(Commands::Graph) => run_graph(&cli.config_file),
        Some(Commands::Validate) => run_validate(&cli.config_file),
        Some(Commands::DryRun) => run_dry_run(&cli.config_file, cli.format),
        Some(Commands::Promote { to }) => run_promote(&cli.config_file, to),
        None => run_synth(&cli.config_file, cli.format, None),
    }
}

fn load_config(path: &Option<PathBuf>) -> anyhow::Result<PlatformConfig> {
    match path {
        Some(path) => PlatformConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {:?}: {}", path, e)),
        None => Ok(PlatformConfig::default()),
    }
}

fn compile(path: &Option<PathBuf>) -> anyhow::Result<DeploymentPlan> {
    let config = load_config(path)?;
    PlatformCompiler::new()
        .compile(&config)
        .map_err(|e| anyhow::anyhow!("Failed to compile platform {}: {}", config.name, e))
}

fn render<T: serde::Serialize>(value: &T, format: Format) -> anyhow::Result<String> {
    match format {
        Format::Json => serde_json::to_string_pretty(value)
            .map_err(|e| anyhow::anyhow!("Failed to render JSON: {}", e)),
        Format::Yaml => {
            serde_yaml::to_string(value).map_err(|e| anyhow::anyhow!("Failed to render YAML: {}", e))
        }
    }
}

fn run_synth(path: &Option<PathBuf>, format: Format, output: Option<PathBuf>) -> anyhow::Result<()> {
    let plan = compile(path)?;
    let rendered = render(&plan, format)?;
    match output {
        Some(file) => {
            std::fs::write(&file, rendered)
                .map_err(|e| anyhow::anyhow!("Failed to write plan to {:?}: {}", file, e))?;
            info!(path = %file.display(), resources = plan.resources.len(), "wrote plan");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn run_graph(path: &Option<PathBuf>) -> anyhow::Result<()> {
    let plan = compile(path)?;

    println!("Units:");
    for unit in &plan.units {
        let parent = unit.parent.as_deref().unwrap_or("-");
        println!(
            "  {} (parent: {}, resources: {}, depends on: [{}])",
            unit.id,
            parent,
            unit.resources.len(),
            unit.depends_on.join(", ")
        );
    }

    println!("Waves:");
    for (i, wave) in plan.waves.iter().enumerate() {
        println!("  {}: {}", i, wave.join(", "));
    }

    if !plan.cross_unit_references.is_empty() {
        println!("Cross-unit references:");
        for r in &plan.cross_unit_references {
            println!(
                "  {} -> {}: {}.{} ({})",
                r.producer_unit, r.consumer_unit, r.resource, r.attribute, r.export_name
            );
        }
    }
    Ok(())
}

fn run_validate(path: &Option<PathBuf>) -> anyhow::Result<()> {
    let plan = compile(path)?;
    println!(
        "{}: {} resources in {} units, {} waves",
        plan.name,
        plan.resources.len(),
        plan.units.len(),
        plan.waves.len()
    );
    for finding in &plan.findings {
        println!(
            "  [{:?}] {}: {}",
            finding.severity, finding.resource, finding.message
        );
    }
    Ok(())
}

fn run_dry_run(path: &Option<PathBuf>, format: Format) -> anyhow::Result<()> {
    let plan = compile(path)?;
    let deployment = deploy(&plan, &DryRunRealizer::new())
        .map_err(|e| anyhow::anyhow!("Dry run failed: {}", e))?;
    println!("{}", render(&deployment.outputs, format)?);
    Ok(())
}

fn run_promote(path: &Option<PathBuf>, to: DeploymentPhase) -> anyhow::Result<()> {
    let file: &Path = path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("promote requires --config (or MAGENTO_PLATFORM_CONFIG)"))?;
    let mut config = PlatformConfig::from_file(file)
        .map_err(|e| anyhow::anyhow!("Failed to load config {:?}: {}", file, e))?;

    let transition = config
        .promote(to)
        .map_err(|e| anyhow::anyhow!("Failed to promote {}: {}", config.name, e))?;
    if transition.is_noop() {
        println!("{} is already in phase {}", config.name, transition.to);
        return Ok(());
    }

    PlatformCompiler::new()
        .compile(&config)
        .map_err(|e| anyhow::anyhow!("Promoted config does not compile: {}", e))?;
    let yaml = config
        .to_yaml()
        .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
    std::fs::write(file, yaml)
        .map_err(|e| anyhow::anyhow!("Failed to write config {:?}: {}", file, e))?;

    println!("{}: {} -> {}", config.name, transition.from, transition.to);
    Ok(())
}
