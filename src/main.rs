//! taskplan
//!
//! Command-line shell over the plan store: creates epics, features and
//! tasks, applies workflow transitions and reports integrity drift.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use taskplan::cli::{
    Cli, Command, EpicCommand, FeatureCommand, TaskCommand, WorkflowCommand,
};
use taskplan::config::{Config, WorkflowConfig, config_path};
use taskplan::creator::Creator;
use taskplan::db::Database;
use taskplan::error::{PlanError, PlanResult};
use taskplan::paths::PathResolver;
use taskplan::types::{NewEpic, NewFeature, StatusChangeRequest};
use taskplan::workflow::{TaskTransitions, WorkflowStateMachine};
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Everything a command needs, built once per invocation.
struct Context {
    root: PathBuf,
    config: Config,
    workflow: WorkflowConfig,
    db: Database,
}

impl Context {
    fn load(cli: &Cli) -> PlanResult<Self> {
        let root = match &cli.root {
            Some(root) => root.clone(),
            None => std::env::current_dir().map_err(|e| PlanError::io(".", e))?,
        };

        let mut config = Config::load_or_default(&root);
        if let Some(db_path) = &cli.database {
            config.database.path = db_path.clone();
        }
        let workflow = WorkflowConfig::load_or_default(config_path(&root));

        config.ensure_db_dir(&root)?;
        let db_path = config.db_path(&root);
        debug!(root = %root.display(), db = %db_path.display(), "Opening plan database");
        let db = Database::open(&db_path)?;

        Ok(Self {
            root,
            config,
            workflow,
            db,
        })
    }

    fn creator(&self) -> Creator {
        Creator::from_config(
            self.db.clone(),
            &self.config,
            self.workflow.clone(),
            self.root.clone(),
        )
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose { "debug" } else { "info" };
    // RUST_LOG wins over --verbose when set
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> PlanResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> PlanResult<()> {
    let ctx = Context::load(&cli)?;

    match cli.command {
        Command::Epic(EpicCommand::Create(args)) => {
            let epic = ctx.creator().create_epic(&NewEpic {
                key: args.key,
                title: args.title,
                slug: args.slug,
                file_path: args.filename,
                custom_folder_path: args.path,
            })?;
            print_json(&epic)
        }
        Command::Feature(FeatureCommand::Create(args)) => {
            let feature = ctx.creator().create_feature(&NewFeature {
                epic_key: args.epic,
                key: args.key,
                title: args.title,
                slug: args.slug,
                file_path: args.filename,
                custom_folder_path: args.path,
            })?;
            print_json(&feature)
        }
        Command::Task(TaskCommand::Create(args)) => {
            let created = ctx.creator().create_task(&args.into())?;
            print_json(&created)
        }
        Command::Task(TaskCommand::Status(args)) => {
            let transitions = TaskTransitions::new(
                ctx.db.clone(),
                WorkflowStateMachine::new(ctx.workflow.clone()),
            );
            let task = transitions.change_status(&StatusChangeRequest {
                task_key: args.key,
                new_status: args.status,
                reason: args.reason,
                force: args.force,
            })?;
            print_json(&task)
        }
        Command::Task(TaskCommand::History { key }) => print_json(&ctx.db.get_task_history(&key)?),
        Command::Task(TaskCommand::Path { key }) => {
            let resolver = PathResolver::new(ctx.db.clone(), ctx.root.clone());
            let path = resolver.resolve_task_path(&key)?;
            print_json(&serde_json::json!({ "key": key, "path": path }))
        }
        Command::Workflow(WorkflowCommand::Show) => print_json(&ctx.workflow),
        Command::Integrity => print_json(&ctx.db.check_integrity(&ctx.root)?),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    // An explicit --config is resolved like TASKPLAN_CONFIG_PATH
    if let Some(config_path) = &cli.config {
        // SAFETY: single-threaded at this point; nothing else reads the environment yet
        unsafe {
            std::env::set_var("TASKPLAN_CONFIG_PATH", config_path);
        }
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = e.kind();
            error!(kind = %kind, error = %e, "Command failed");
            let body = serde_json::json!({ "error": { "kind": kind, "message": e.to_string() } });
            eprintln!("{body}");
            ExitCode::from(u8::try_from(kind.exit_code()).unwrap_or(1))
        }
    }
}
