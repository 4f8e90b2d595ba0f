//! examkit - build, solve and grade agent-authored coding exams
//!
//! ## Commands
//!
//! - `build`: author an exam from a project, a library and a topic
//! - `solve`: let the agent attempt a built exam
//! - `evaluate`: grade an attempt against the exam rubric
//! - `verify`: check the git invariants of a built exam
//! - `show`: print an exam record

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use examkit_core::{
    parse_total_score, verify_exam, Agent, CommandAgent, ExamBuilder, ExamConfig, ExamRecord,
    ExamRunner, GitRepository, Sandbox, Topic,
};

#[derive(Parser)]
#[command(name = "examkit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, solve and grade agent-authored coding exams", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Agent program, run once per turn (JSON over stdin/stdout). Split on
    /// whitespace unless --agent-arg is given
    #[arg(long, env = "EXAMKIT_AGENT_CMD", global = true)]
    agent_cmd: Option<String>,

    /// Argument passed verbatim to the agent program; makes --agent-cmd the
    /// program path
    #[arg(long = "agent-arg", global = true, allow_hyphen_values = true)]
    agent_args: Vec<String>,

    /// Wall-clock limit for a single agent turn, in seconds
    #[arg(long, global = true)]
    agent_timeout_secs: Option<u64>,

    /// Sandbox image
    #[arg(long, env = "EXAMKIT_IMAGE", global = true)]
    image: Option<String>,

    /// Container engine CLI (docker or podman)
    #[arg(long, env = "EXAMKIT_ENGINE", global = true)]
    engine: Option<String>,

    /// Mount sccache and cargo caches into every sandbox
    #[arg(long, global = true)]
    cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Author a new exam and push it to the project as `exam-<id>`
    Build {
        /// Project repository the exam is built on
        #[arg(long)]
        project: PathBuf,

        /// Library repository the solution must use
        #[arg(long)]
        library: PathBuf,

        /// Exam topic title
        #[arg(short, long)]
        title: String,

        /// Exam topic description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Where to write the exam record
        #[arg(short, long, default_value = "exam.json")]
        output: PathBuf,

        /// Keep the build workspace at this path instead of pointing the
        /// record at the project repository
        #[arg(long)]
        keep_workspace: Option<PathBuf>,
    },

    /// Attempt an exam; prints the workspace holding the attempt
    Solve {
        /// Exam record (JSON)
        #[arg(short, long, default_value = "exam.json")]
        exam: PathBuf,
    },

    /// Grade an attempt against the exam rubric
    Evaluate {
        /// Exam record (JSON)
        #[arg(short, long, default_value = "exam.json")]
        exam: PathBuf,

        /// Workspace produced by `solve`
        #[arg(short, long)]
        workspace: PathBuf,
    },

    /// Check the commits and artifacts of a built exam
    Verify {
        /// Exam record (JSON)
        #[arg(short, long, default_value = "exam.json")]
        exam: PathBuf,
    },

    /// Print an exam record
    Show {
        /// Exam record (JSON)
        #[arg(short, long, default_value = "exam.json")]
        exam: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    examkit_core::init_tracing(cli.json, level);

    let mut config = ExamConfig::from_env().context("Invalid examkit configuration")?;
    if let Some(image) = &cli.image {
        config.image = image.clone();
    }
    if let Some(engine) = &cli.engine {
        config.engine_binary = engine.clone();
    }
    if let Some(cmd) = &cli.agent_cmd {
        config.agent_command = Some(cmd.clone());
    }
    config.use_cache |= cli.cache;
    config.validate().context("Invalid examkit configuration")?;

    match cli.command {
        Commands::Build {
            project,
            library,
            title,
            description,
            output,
            keep_workspace,
        } => {
            let agent = agent_from(&config, &cli.agent_args, cli.agent_timeout_secs)?;
            let topic = Topic::new(title, description);
            cmd_build(
                &config,
                agent,
                &project,
                &library,
                &topic,
                &output,
                keep_workspace.as_deref(),
            )
            .await
        }
        Commands::Solve { exam } => {
            let agent = agent_from(&config, &cli.agent_args, cli.agent_timeout_secs)?;
            cmd_solve(&config, agent, &exam).await
        }
        Commands::Evaluate { exam, workspace } => {
            let agent = agent_from(&config, &cli.agent_args, cli.agent_timeout_secs)?;
            cmd_evaluate(&config, agent, &exam, &workspace).await
        }
        Commands::Verify { exam } => cmd_verify(&exam).await,
        Commands::Show { exam } => cmd_show(&exam).await,
    }
}

fn build_agent(
    config: &ExamConfig,
    args: &[String],
    timeout_secs: Option<u64>,
) -> Result<CommandAgent> {
    let Some(command) = config.agent_command.as_deref() else {
        bail!("No agent configured: pass --agent-cmd or set EXAMKIT_AGENT_CMD");
    };
    let mut agent = if args.is_empty() {
        CommandAgent::from_command_line(command)
            .with_context(|| format!("Invalid agent command '{command}'"))?
    } else {
        CommandAgent::new(command.trim(), args.iter().cloned())
    };
    if let Some(secs) = timeout_secs {
        agent = agent.with_timeout(Duration::from_secs(secs));
    }
    Ok(agent)
}

fn agent_from(
    config: &ExamConfig,
    args: &[String],
    timeout_secs: Option<u64>,
) -> Result<Arc<dyn Agent>> {
    Ok(Arc::new(build_agent(config, args, timeout_secs)?))
}

async fn load_exam(path: &Path) -> Result<ExamRecord> {
    ExamRecord::load(path)
        .await
        .with_context(|| format!("Failed to load exam record {}", path.display()))
}

/// Build an exam and write its record
async fn cmd_build(
    config: &ExamConfig,
    agent: Arc<dyn Agent>,
    project: &Path,
    library: &Path,
    topic: &Topic,
    output: &Path,
    keep_workspace: Option<&Path>,
) -> Result<()> {
    let project = GitRepository::open("project", project)
        .await
        .context("Failed to open project repository")?;
    let library = GitRepository::open("library", library)
        .await
        .context("Failed to open library repository")?;

    let builder = ExamBuilder::new(Sandbox::docker(config), agent, config.clone());
    let built = builder
        .build(&project, &library, topic)
        .await
        .context("Exam build failed")?;

    let record = match keep_workspace {
        Some(dest) => built
            .persist(dest)
            .await
            .with_context(|| format!("Failed to move workspace to {}", dest.display()))?,
        None => built.into_published(),
    };
    record
        .save(output)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(exam_id = %record.id, record = %output.display(), "exam built");
    println!("Exam:     {}", record.id);
    println!("Branch:   {}", record.branch_name());
    println!("Solution: {}", record.solution_commit);
    println!("Problem:  {}", record.problem_commit);
    println!("Record:   {}", output.display());
    Ok(())
}

/// Solve an exam
async fn cmd_solve(config: &ExamConfig, agent: Arc<dyn Agent>, exam: &Path) -> Result<()> {
    let record = load_exam(exam).await?;
    let runner = ExamRunner::new(Sandbox::docker(config), agent, config.clone());
    let workspace = runner.solve(&record).await.context("Solve failed")?;
    println!("{}", workspace.display());
    Ok(())
}

/// Grade an attempt
async fn cmd_evaluate(
    config: &ExamConfig,
    agent: Arc<dyn Agent>,
    exam: &Path,
    workspace: &Path,
) -> Result<()> {
    let record = load_exam(exam).await?;
    let runner = ExamRunner::new(Sandbox::docker(config), agent, config.clone());
    let report = runner
        .evaluate(&record, workspace)
        .await
        .context("Evaluation failed")?;

    println!("{report}");
    match parse_total_score(&report) {
        Some(score) => info!(exam_id = %record.id, score = %score, "evaluation complete"),
        None => info!(exam_id = %record.id, "evaluation report has no score line"),
    }
    Ok(())
}

/// Verify exam invariants
async fn cmd_verify(exam: &Path) -> Result<()> {
    let record = load_exam(exam).await?;
    let report = verify_exam(&record)
        .await
        .context("Failed to inspect exam repository")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_valid() {
        bail!("Exam {} failed verification", record.id);
    }
    Ok(())
}

/// Print an exam record
async fn cmd_show(exam: &Path) -> Result<()> {
    let record = load_exam(exam).await?;
    println!("Exam:     {}", record.id);
    println!("Image:    {}", record.image);
    println!(
        "Project:  {} ({})",
        record.project.name,
        record.project.local_dir.display()
    );
    println!(
        "Library:  {} ({})",
        record.library.name,
        record.library.local_dir.display()
    );
    println!("Solution: {}", record.solution_commit);
    println!("Problem:  {}", record.problem_commit);
    println!(
        "Created:  {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!("{}", record.question);
    Ok(())
}
