use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};

use irprep::passes::{audit_operand_types, verify_module};
use irprep::{Module, PipelineConfig, SwitchImpl};

#[derive(Parser)]
#[command(name = "irprep")]
#[command(about = "Prepare IR modules for the instruction-level interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full preparation pipeline.
    Prepare {
        #[arg(help = "Input module (JSON)")]
        input: PathBuf,

        #[arg(short, long, help = "Output file")]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = Emit::Json, help = "Output format")]
        emit: Emit,

        #[arg(short, long, help = "JSON pipeline configuration; flags override it")]
        config: Option<PathBuf>,

        #[command(flatten)]
        flags: PipelineFlags,
    },
    /// Run the structural verifier and the operand type auditor only.
    Verify {
        #[arg(help = "Input module (JSON)")]
        input: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Emit {
    Json,
    Text,
}

#[derive(Clone, Copy, ValueEnum)]
enum SwitchArg {
    Native,
    Simple,
    Canonical,
}

impl From<SwitchArg> for SwitchImpl {
    fn from(arg: SwitchArg) -> Self {
        match arg {
            SwitchArg::Native => SwitchImpl::Native,
            SwitchArg::Simple => SwitchImpl::Simple,
            SwitchArg::Canonical => SwitchImpl::Canonical,
        }
    }
}

#[derive(clap::Args)]
#[allow(clippy::struct_excessive_bools)]
struct PipelineFlags {
    #[arg(long, help = "Do not guard divisions against zero divisors")]
    no_check_div_zero: bool,

    #[arg(long, help = "Do not guard shifts against oversized amounts")]
    no_check_overshift: bool,

    #[arg(long, help = "Skip structural verification")]
    dont_verify: bool,

    #[arg(long, help = "Allow optimizing functions that call interpreter hooks")]
    optimize_interpreter_calls: bool,

    #[arg(short = 'O', long, help = "Run the optimization stage")]
    optimize: bool,

    #[arg(long, value_enum, help = "Switch lowering strategy")]
    switch_impl: Option<SwitchArg>,

    #[arg(short, long, help = "Entry function (default: main)")]
    entry_point: Option<String>,

    #[arg(long = "preserve", value_name = "NAME", help = "Keep NAME external and alive")]
    preserved_functions: Vec<String>,

    #[arg(long)]
    disable_inline: bool,

    #[arg(long)]
    disable_internalize: bool,

    #[arg(long, help = "Report verifier findings after optimization")]
    verify_each: bool,

    #[arg(long, help = "Strip debug info and value names")]
    strip: bool,

    #[arg(long, help = "Strip debug info only")]
    strip_debug: bool,
}

impl PipelineFlags {
    fn apply(self, config: &mut PipelineConfig) {
        if self.no_check_div_zero {
            config.check_div_zero = false;
        }
        if self.no_check_overshift {
            config.check_overshift = false;
        }
        config.dont_verify |= self.dont_verify;
        config.optimize_interpreter_calls |= self.optimize_interpreter_calls;
        config.optimize |= self.optimize;
        if let Some(switch_impl) = self.switch_impl {
            config.switch_impl = switch_impl.into();
        }
        if let Some(entry_point) = self.entry_point {
            config.entry_point = entry_point;
        }
        config.preserved_functions.extend(self.preserved_functions);
        config.disable_inline |= self.disable_inline;
        config.disable_internalize |= self.disable_internalize;
        config.verify_each |= self.verify_each;
        config.strip |= self.strip;
        config.strip_debug |= self.strip_debug;
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare {
            input,
            output,
            emit,
            config,
            flags,
        } => {
            let mut pipeline_config = match config {
                Some(path) => read_config(&path)?,
                None => PipelineConfig::default(),
            };
            flags.apply(&mut pipeline_config);
            tracing::debug!("pipeline configuration: {pipeline_config:?}");

            let module = read_module(&input)?;
            let prepared =
                irprep::prepare(&pipeline_config, module).context("Preparation failed")?;

            let rendered = match emit {
                Emit::Json => serde_json::to_string_pretty(&prepared)
                    .context("Failed to serialize prepared module")?,
                Emit::Text => prepared.to_string(),
            };
            fs::write(&output, rendered)
                .with_context(|| format!("Failed to write output to {}", output.display()))?;
            println!(
                "Prepared {} -> {} ({} functions)",
                input.display(),
                output.display(),
                prepared.functions.len()
            );
        }
        Commands::Verify { input } => {
            let module = read_module(&input)?;
            let diagnostics = verify_module(&module);
            for diagnostic in &diagnostics {
                eprintln!("{diagnostic}");
            }
            if !diagnostics.is_empty() {
                anyhow::bail!(
                    "{}: {} verification error(s)",
                    input.display(),
                    diagnostics.len()
                );
            }
            audit_operand_types(&module).context("Operand type audit failed")?;
            println!("{}: ok", input.display());
        }
    }

    Ok(())
}

fn read_module(path: &Path) -> Result<Module> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse module {}", path.display()))
}

fn read_config(path: &Path) -> Result<PipelineConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))
}
