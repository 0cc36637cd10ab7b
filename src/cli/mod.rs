//! CLI command definitions for taskplan.
//!
//! This module defines the CLI structure using clap's derive macros.
//! Every command prints JSON on stdout; failures exit with the code of
//! their error kind.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Epic/feature/task planning with a SQLite store and markdown files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project root (default: current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Path to configuration file (overrides .taskplan.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage epics
    #[command(subcommand)]
    Epic(EpicCommand),

    /// Manage features
    #[command(subcommand)]
    Feature(FeatureCommand),

    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),

    /// Inspect the active workflow
    #[command(subcommand)]
    Workflow(WorkflowCommand),

    /// Report drift between task rows and markdown files
    Integrity,
}

#[derive(Subcommand, Debug)]
pub enum EpicCommand {
    /// Create an epic
    Create(EpicCreateArgs),
}

#[derive(Args, Debug)]
pub struct EpicCreateArgs {
    /// Epic key, e.g. E01
    #[arg(long)]
    pub key: String,

    #[arg(long)]
    pub title: String,

    /// Folder name slug (default: derived from the title)
    #[arg(long)]
    pub slug: Option<String>,

    /// Explicit markdown file, relative to the project root
    #[arg(long)]
    pub filename: Option<String>,

    /// Folder for this epic and its features, relative to the project root
    #[arg(long)]
    pub path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum FeatureCommand {
    /// Create a feature under an epic
    Create(FeatureCreateArgs),
}

#[derive(Args, Debug)]
pub struct FeatureCreateArgs {
    /// Parent epic key
    #[arg(long)]
    pub epic: String,

    /// Feature key, F02 or E01-F02
    #[arg(long)]
    pub key: String,

    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub slug: Option<String>,

    #[arg(long)]
    pub filename: Option<String>,

    #[arg(long)]
    pub path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Create a task and its markdown file
    Create(TaskCreateArgs),

    /// Move a task to another status
    Status(TaskStatusArgs),

    /// Show a task's status history
    History {
        /// Task key
        key: String,
    },

    /// Print the resolved markdown path of a task
    Path {
        /// Task key
        key: String,
    },
}

#[derive(Args, Debug)]
pub struct TaskCreateArgs {
    #[arg(long)]
    pub epic: String,

    /// Feature key, F02 or E01-F02
    #[arg(long)]
    pub feature: String,

    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub description: Option<String>,

    /// Agent type (free-form, default from config)
    #[arg(long)]
    pub agent: Option<String>,

    /// Template file overriding agent-based selection
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Priority 1-10
    #[arg(long, default_value_t = crate::types::PRIORITY_DEFAULT)]
    pub priority: i32,

    /// Comma-separated task keys this task depends on
    #[arg(long)]
    pub depends_on: Option<String>,

    #[arg(long)]
    pub order: Option<i32>,

    /// Custom task key instead of the next sequence number
    #[arg(long)]
    pub key: Option<String>,

    /// Markdown file relative to the project root
    #[arg(long)]
    pub filename: Option<String>,

    /// Take over a file already claimed by another task
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct TaskStatusArgs {
    /// Task key
    pub key: String,

    /// Target status
    pub status: String,

    /// Why the task moves (required for backward moves)
    #[arg(long)]
    pub reason: Option<String>,

    /// Skip workflow validation
    #[arg(long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// Print the workflow in effect
    Show,
}

impl From<TaskCreateArgs> for crate::types::CreateTaskInput {
    fn from(args: TaskCreateArgs) -> Self {
        Self {
            epic_key: args.epic,
            feature_key: args.feature,
            title: args.title,
            description: args.description,
            agent_type: args.agent,
            template: args.template,
            priority: args.priority,
            depends_on: args.depends_on,
            execution_order: args.order,
            custom_key: args.key,
            filename: args.filename,
            force: args.force,
        }
    }
}
