//! Cactus/RaMAx alignment plan runner.
//!
//! Loads a JSON plan, plans the external commands against the species tree,
//! and runs them with resume support. Run artifacts live under the plan's log
//! root (`<out_dir>/logs` or `<base_dir>/logs`).

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cax::error::StepFailure;
use cax::exit_codes;
use cax::io::config::{RunSettings, SETTINGS_FILE, load_settings};
use cax::io::plan_store::load_plan;
use cax::io::script::{render_run_script, write_run_script};
use cax::preview::{command_rows, preview_resume};
use cax::run::{RunRequest, master_log_path, plan_commands, run_plan, subprocess_launcher};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "cax",
    version,
    about = "Resumable Cactus/RaMAx progressive alignment runner"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory relative paths resolve against (default: current directory).
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Settings file (default: `<base-dir>/cax.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Thread override passed as `--maxCores` / `--threads`.
    #[arg(long, global = true)]
    threads: Option<u32>,

    /// Echo every child output line.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Echo nothing from child processes.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print the planned command sequence.
    Plan {
        plan: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Execute the plan, skipping the verified prefix of a previous run.
    Run {
        plan: PathBuf,
        /// Log commands without executing them.
        #[arg(long)]
        dry_run: bool,
        /// Ignore previous run state and jobstores.
        #[arg(long)]
        no_resume: bool,
    },
    /// Show what a resumed run would skip and rerun.
    Status {
        plan: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Write the planned sequence as a bash script.
    Script {
        plan: PathBuf,
        #[arg(short, long, default_value = "run.sh")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();
    cax::logging::init(cli.global.verbose);
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            if let Some(failure) = err.downcast_ref::<StepFailure>() {
                eprintln!("Plan failed at {}", failure.display_name());
                eprintln!("  step log: {}", failure.log_path().display());
                exit_codes::STEP_FAILED
            } else {
                eprintln!("{:#}", err);
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let base_dir = match &cli.global.base_dir {
        Some(dir) => dir.clone(),
        None => env::current_dir().context("resolve current directory")?,
    };
    let mut settings = settings_for(&cli.global, &base_dir)?;
    match cli.command {
        Command::Plan { plan, format } => cmd_plan(&plan, &base_dir, &settings, format),
        Command::Run {
            plan,
            dry_run,
            no_resume,
        } => {
            if no_resume {
                settings.resume = false;
            }
            cmd_run(&plan, &base_dir, &settings, dry_run)
        }
        Command::Status { plan, format } => cmd_status(&plan, &base_dir, &settings, format),
        Command::Script { plan, output } => cmd_script(&plan, &base_dir, &settings, &output),
    }
}

fn settings_for(global: &GlobalArgs, base_dir: &Path) -> Result<RunSettings> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(|| base_dir.join(SETTINGS_FILE));
    let mut settings = load_settings(&path)?;
    if global.threads.is_some() {
        settings.thread_count = global.threads;
    }
    if global.verbose {
        settings.verbose = true;
        settings.quiet = false;
    }
    if global.quiet {
        settings.quiet = true;
        settings.verbose = false;
    }
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

fn cmd_plan(plan_path: &Path, base_dir: &Path, settings: &RunSettings, format: Format) -> Result<()> {
    let plan = load_plan(plan_path)?;
    let commands = plan_commands(&plan, base_dir, settings);
    match format {
        Format::Text => {
            for (index, command) in commands.iter().enumerate() {
                println!("{:>3}  {:<24} {}", index + 1, command.display_name, command.shell_preview());
            }
        }
        Format::Json => {
            let rows: Vec<serde_json::Value> = commands
                .iter()
                .map(|command| {
                    serde_json::json!({
                        "display_name": command.display_name,
                        "category": command.category,
                        "args": command.args,
                        "log_path": command.log_path,
                        "workdir": command.workdir,
                        "round": command.round_name,
                        "ramax": command.is_ramax,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

fn cmd_run(plan_path: &Path, base_dir: &Path, settings: &RunSettings, dry_run: bool) -> Result<()> {
    let plan = load_plan(plan_path)?;
    let request = RunRequest {
        plan: &plan,
        base_dir,
        settings,
        dry_run: dry_run.then_some(true),
    };
    let summary = run_plan(&request, &subprocess_launcher(settings))?;
    if !settings.quiet {
        eprintln!(
            "Plan completed: {}/{} commands succeeded ({} skipped by resume).",
            summary.succeeded + summary.skipped,
            summary.total,
            summary.skipped
        );
        eprintln!("Logs written to {}", master_log_path(&plan, base_dir).display());
    }
    Ok(())
}

fn cmd_status(plan_path: &Path, base_dir: &Path, settings: &RunSettings, format: Format) -> Result<()> {
    let plan = load_plan(plan_path)?;
    let preview = preview_resume(&plan, base_dir, settings);
    let rows = command_rows(&plan, base_dir, settings);
    if format == Format::Json {
        let doc = serde_json::json!({ "summary": preview, "commands": rows });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    match &preview {
        Some(preview) => {
            println!("State file: {}", preview.state_path.display());
            if !preview.plan_matches {
                println!("Plan signature differs from the recorded run; matching commands individually.");
            }
            println!(
                "Skippable: {}  Pending: {}  Needs rerun (outputs): {}  Failed last run: {}",
                preview.completed.len(),
                preview.pending.len(),
                preview.missing_outputs.len(),
                preview.failed.len()
            );
        }
        None => println!("No run state found; every command is pending."),
    }
    for row in &rows {
        println!("{:>3}  {:<9} {:<24} {}", row.index + 1, row.status, row.name, row.note);
    }
    Ok(())
}

fn cmd_script(plan_path: &Path, base_dir: &Path, settings: &RunSettings, output: &Path) -> Result<()> {
    let plan = load_plan(plan_path)?;
    let commands = plan_commands(&plan, base_dir, settings);
    let script = render_run_script(&plan, &commands)?;
    let output = if output.is_absolute() {
        output.to_path_buf()
    } else {
        base_dir.join(output)
    };
    write_run_script(&output, &script)?;
    println!("{}", output.display());
    Ok(())
}
