//! Project configuration.
//!
//! Everything lives in one JSON dotfile at the project root
//! (`.taskplan.json`):
//! - [`Config`] - database location, template directory, agent defaults
//! - [`WorkflowConfig`] - status graph, status metadata and special status sets
//!
//! ## Environment Variables
//! - `TASKPLAN_CONFIG_PATH` - Explicit config file (overrides the dotfile)
//! - `TASKPLAN_DB_PATH` - Database path
//! - `TASKPLAN_TEMPLATE_DIR` - Directory of `task-{agent}.md` templates

mod types;
pub mod workflows;

pub use types::*;
pub use workflows::*;
