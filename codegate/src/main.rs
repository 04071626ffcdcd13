//! Proposal-gate-execute repair agent.
//!
//! Runs one repair task against a working tree: the agent proposes actions,
//! the gate admits or rejects them, and admitted actions are executed until
//! the task is finalized or a budget runs out.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use codegate::core::diff::{header_files, repair_patch, validate_patch};
use codegate::core::phase::{allowed_kinds, format_kinds};
use codegate::core::types::{AgentState, Phase};
use codegate::episode::{EpisodeLimits, run_episode};
use codegate::execute::{ActionExecutor, ExecutorSettings};
use codegate::exit_codes;
use codegate::io::config::{AgentConfig, DEFAULT_CONFIG_FILE, load_config, write_config};
use codegate::io::prompt::ContextBuilder;
use codegate::io::suggest::{CommandSuggester, NoSuggester, Suggester};
use codegate::io::test_runner::CommandTestRunner;
use codegate::logging;
use codegate::propose::ProposalGenerator;

#[derive(Parser)]
#[command(
    name = "codegate",
    version,
    about = "Proposal-gate-execute code repair agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default `codegate.toml` if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Run one repair episode and print its outcome as JSON.
    Run {
        /// Working tree to repair.
        #[arg(long)]
        workdir: PathBuf,
        /// File holding the problem statement.
        #[arg(long)]
        problem: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Validate and repair a unified diff, printing the repaired diff.
    CheckPatch {
        file: PathBuf,
    },
    /// Print the actions each phase admits.
    Phases,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run {
            workdir,
            problem,
            config,
        } => cmd_run(&workdir, &problem, &config),
        Command::CheckPatch { file } => cmd_check_patch(&file),
        Command::Phases => cmd_phases(),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        return Ok(exit_codes::OK);
    }
    write_config(path, &AgentConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(exit_codes::OK)
}

fn cmd_run(workdir: &Path, problem: &Path, config: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    if !workdir.is_dir() {
        bail!("workdir is not a directory: {}", workdir.display());
    }
    let problem_statement =
        fs::read_to_string(problem).with_context(|| format!("read {}", problem.display()))?;
    let workdir = workdir
        .canonicalize()
        .with_context(|| format!("resolve {}", workdir.display()))?;

    if cfg.suggester.command.is_empty() {
        return run_with(NoSuggester, &cfg, workdir, problem_statement);
    }
    let suggester = CommandSuggester {
        command: cfg.suggester.command.clone(),
        workdir: workdir.clone(),
        timeout: cfg.timeouts.suggest(),
        output_limit_bytes: cfg.output_limit_bytes,
    };
    run_with(suggester, &cfg, workdir, problem_statement)
}

fn run_with<S: Suggester>(
    suggester: S,
    cfg: &AgentConfig,
    workdir: PathBuf,
    problem_statement: String,
) -> Result<i32> {
    let generator = ProposalGenerator::new(
        suggester,
        ContextBuilder::new(cfg.context_budget_bytes),
        cfg.temperature,
    );
    let executor = ActionExecutor::new(CommandTestRunner, ExecutorSettings::from_config(cfg));
    let mut state = AgentState::new(workdir, problem_statement);
    let limits = EpisodeLimits {
        wall_clock: cfg.wall_clock(),
    };

    let outcome = run_episode(&cfg.profile, &mut state, &generator, &executor, limits, |record| {
        eprintln!(
            "round {} [{}] {} {}",
            record.round,
            record.phase,
            record.kind,
            if record.accepted { &record.summary } else { &record.reason }
        );
    });

    let payload = serde_json::to_string_pretty(&outcome).context("serialize outcome")?;
    println!("{payload}");
    Ok(if outcome.solved {
        exit_codes::OK
    } else {
        exit_codes::UNSOLVED
    })
}

fn cmd_check_patch(file: &Path) -> Result<i32> {
    let diff = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let parsed = match validate_patch(&diff) {
        Ok(parsed) => parsed,
        Err(reason) => bail!("invalid patch: {reason}"),
    };
    eprintln!(
        "{} files, {} removed, {} added",
        header_files(&diff).len(),
        parsed.removed.len(),
        parsed.added.len()
    );
    print!("{}", repair_patch(&diff));
    Ok(exit_codes::OK)
}

fn cmd_phases() -> Result<i32> {
    for phase in Phase::ALL {
        println!("{:<17}{}", phase.as_str(), format_kinds(allowed_kinds(phase)));
    }
    Ok(exit_codes::OK)
}
