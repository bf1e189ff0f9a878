// GradeFlow command-line entry point.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (stderr; RUST_LOG, else --verbose picks the level)
// 3. Load settings, copying defaults into config/ on first run
// 4. Build the HTTP client, backend, provider registry and session
// 5. Run the requested command

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use gradeflow_app::coordinator::ProgressOutcome;
use gradeflow_app::{Backend, GradingSession, HttpBackend, ProviderRegistry};
use gradeflow_core::config::{self, GradingMode, ProviderConfigStore, Settings};
use gradeflow_core::{AssignmentId, GradeTier, SubmissionId};

#[derive(Parser)]
#[command(name = "gradeflow", version, about = "AI-assisted grading for programming assignments")]
struct Cli {
    /// Project directory holding config/ and defaults/ (default: current directory)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Log grading internals at debug level (RUST_LOG overrides this)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List AI providers and whether they are reachable
    Providers,
    /// List the models a provider offers
    Models { provider: String },
    /// Show or change the provider selection
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List assignments stored on the backend
    Assignments,
    /// Create an assignment from a rubric file
    CreateAssignment {
        #[arg(long)]
        name: String,
        #[arg(long)]
        rubric: PathBuf,
        #[arg(long)]
        syllabus: Option<PathBuf>,
    },
    /// Upload a .zip of student submissions
    Import {
        #[arg(long)]
        assignment: i64,
        archive: PathBuf,
    },
    /// AI-grade one submission, or every submission of the assignment
    Grade {
        #[arg(long)]
        assignment: i64,
        #[arg(long)]
        submission: Option<i64>,
        /// Let the backend grade everything itself (reports a count only)
        #[arg(long, conflicts_with = "submission")]
        server_side: bool,
    },
    /// Record the grader's final grade (0, 50 or 100)
    FinalGrade {
        #[arg(long)]
        assignment: i64,
        #[arg(long)]
        submission: i64,
        #[arg(long)]
        grade: GradeTier,
    },
    /// Write the grade sheet as CSV
    Export {
        #[arg(long)]
        assignment: i64,
        /// Output file (default: grades_<assignment>.csv)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print the backend's own export instead
        #[arg(long)]
        server: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set {
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "")]
        model: String,
        /// API key; omit to keep the stored one
        #[arg(long, default_value = "")]
        credential: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let base_dir = match &cli.base_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    let settings =
        config::load_settings_in(&base_dir).context("failed to load configuration")?;
    info!(
        "Settings loaded: backend={}, mode={:?}, max_concurrent={}",
        settings.backend.base_url, settings.grading.mode, settings.grading.max_concurrent
    );

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;
    let backend: Arc<dyn Backend> =
        Arc::new(HttpBackend::new(http.clone(), settings.backend.base_url.clone()));
    let provider_file =
        ProviderConfigStore::default_location().context("no provider config location")?;
    let registry = Arc::new(ProviderRegistry::for_mode(
        provider_file,
        &settings,
        http,
        Arc::clone(&backend),
    ));

    run(cli.command, &settings, backend, registry).await
}

async fn run(
    command: Command,
    settings: &Settings,
    backend: Arc<dyn Backend>,
    registry: Arc<ProviderRegistry>,
) -> anyhow::Result<()> {
    match command {
        Command::Providers => {
            for p in registry.list_providers().await {
                let key = if p.requires_credential { "key required" } else { "no key" };
                println!("{:<12} {:<16} {:<14} {:?}", p.id, p.display_name, key, p.status);
            }
        }
        Command::Models { provider } => {
            for model in registry.list_models(&provider)? {
                println!("{model}");
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Show => print_config(&registry)?,
            ConfigAction::Set {
                provider,
                model,
                credential,
            } => {
                let view = registry.set_config(&provider, &model, &credential)?;
                if settings.grading.mode == GradingMode::Backend {
                    backend
                        .set_provider_config(view.provider.id(), &view.model)
                        .await
                        .context("failed to update the backend's provider")?;
                }
                print_config(&registry)?;
            }
        },
        Command::Assignments => {
            for a in backend.list_assignments().await? {
                println!("{:>5}  {}", a.id, a.name);
            }
        }
        Command::CreateAssignment {
            name,
            rubric,
            syllabus,
        } => {
            let rubric = read_text(&rubric)?;
            let syllabus = syllabus.as_deref().map(read_text).transpose()?;
            let session = GradingSession::new(backend, registry, &settings.grading);
            let id = session
                .create_assignment(&name, &rubric, syllabus.as_deref())
                .await?;
            println!("Created assignment {id}");
        }
        Command::Import {
            assignment,
            archive,
        } => {
            let session = GradingSession::new(backend, registry, &settings.grading);
            let summary = session
                .import_archive(AssignmentId(assignment), &archive)
                .await?;
            println!("Imported {} students", summary.imported);
            for s in summary.students {
                println!(
                    "  {:<30} {} code file(s), {} screenshot(s)",
                    s.student, s.code_files, s.screenshots
                );
            }
        }
        Command::Grade {
            assignment,
            submission,
            server_side,
        } => grade(settings, backend, registry, AssignmentId(assignment), submission, server_side)
            .await?,
        Command::FinalGrade {
            assignment,
            submission,
            grade,
        } => {
            let session = GradingSession::new(backend, registry, &settings.grading);
            session.open_assignment(AssignmentId(assignment)).await?;
            let sub = session
                .set_final_grade(SubmissionId(submission), grade)
                .await?;
            println!("{}: {}", sub.student_name, sub.effective_grade());
        }
        Command::Export {
            assignment,
            out,
            server,
        } => {
            let id = AssignmentId(assignment);
            let session = GradingSession::new(backend, registry, &settings.grading);
            if server {
                print!("{}", session.export_server_csv(id).await?);
                return Ok(());
            }
            session.open_assignment(id).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(format!("grades_{id}.csv")));
            let rows = session.export_csv(&out)?;
            println!("Wrote {rows} rows to {}", out.display());
        }
    }
    Ok(())
}

async fn grade(
    settings: &Settings,
    backend: Arc<dyn Backend>,
    registry: Arc<ProviderRegistry>,
    assignment: AssignmentId,
    submission: Option<i64>,
    server_side: bool,
) -> anyhow::Result<()> {
    // Refresh the probe cache so an offline local server fails fast.
    registry.list_providers().await;

    let (tx, mut rx) = mpsc::channel(64);
    let session = GradingSession::with_progress(backend, registry, &settings.grading, tx);

    if server_side {
        let graded = session.grade_all_server_side(assignment).await?;
        println!("Backend graded {graded} submissions");
        return Ok(());
    }

    session.open_assignment(assignment).await?;
    if let Some(id) = submission {
        let result = session.grade_one(SubmissionId(id)).await?;
        println!(
            "Recommended {} ({:?} confidence)\n{}",
            result.recommended_grade, result.confidence, result.feedback
        );
        return Ok(());
    }

    let printer = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            let outcome = match p.outcome {
                ProgressOutcome::Graded => "graded".to_string(),
                ProgressOutcome::Failed(kind) => format!("failed ({kind})"),
                ProgressOutcome::Discarded => "discarded".to_string(),
                ProgressOutcome::Skipped => "skipped".to_string(),
            };
            eprintln!("[{}/{}] submission {} {}", p.completed, p.total, p.submission_id, outcome);
        }
    });

    let report = session.grade_all().await?;
    drop(session);
    let _ = printer.await;

    println!(
        "Graded {}/{} submissions in {}s",
        report.graded_count,
        report.total,
        (report.finished_at - report.started_at).num_seconds()
    );
    for f in &report.failures {
        println!("  submission {}: {} ({})", f.submission_id, f.kind, f.message);
    }
    if report.failures.len() == report.attempted && report.attempted > 0 {
        bail!("every submission failed to grade");
    }
    Ok(())
}

fn print_config(registry: &ProviderRegistry) -> anyhow::Result<()> {
    let view = registry.get_config()?;
    println!("provider:   {}", view.provider.display_name());
    println!("model:      {}", view.model);
    println!(
        "credential: {}",
        if view.has_credential { "stored" } else { "none" }
    );
    Ok(())
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

/// Level for the gradeflow crates when RUST_LOG is unset. Dependencies
/// only surface warnings.
fn default_log_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    ["gradeflow_app", "gradeflow_core", "gradeflow_llm"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .chain(std::iter::once("warn".to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(verbose)));
    // stdout carries command output (CSV, listings).
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}
