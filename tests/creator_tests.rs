//! Integration tests for atomic task creation.
//!
//! Each test runs against an in-memory database and a temporary project
//! root, and checks both stores after the call.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use taskplan::config::WorkflowConfig;
use taskplan::creator::{Cancellation, Creator, Deadline};
use taskplan::db::Database;
use taskplan::error::{CreateStage, ErrorKind, PlanError, PlanResult};
use taskplan::render::{Renderer, TemplateData, TemplateRenderer};
use taskplan::types::{CreateTaskInput, NewEpic, NewFeature};
use tempfile::TempDir;

const TASK_DIR: &str = "docs/plan/E01-identity/E01-F02-login/tasks";

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn setup_creator<R: Renderer>(db: &Database, root: &Path, renderer: R) -> Creator<R> {
    let creator = Creator::new(db.clone(), WorkflowConfig::default(), renderer, root);
    creator
        .create_epic(&NewEpic {
            key: "E01".into(),
            title: "Identity".into(),
            ..Default::default()
        })
        .expect("Failed to create epic");
    creator
        .create_feature(&NewFeature {
            epic_key: "E01".into(),
            key: "F02".into(),
            title: "Login".into(),
            ..Default::default()
        })
        .expect("Failed to create feature");
    creator
}

fn input(title: &str) -> CreateTaskInput {
    CreateTaskInput {
        epic_key: "E01".into(),
        feature_key: "F02".into(),
        title: title.into(),
        ..Default::default()
    }
}

/// Fires at one chosen stage.
struct CancelAt(CreateStage);

impl Cancellation for CancelAt {
    fn checkpoint(&self, stage: CreateStage) -> PlanResult<()> {
        if stage == self.0 {
            Err(PlanError::Cancelled(stage))
        } else {
            Ok(())
        }
    }
}

struct FailingRenderer;

impl Renderer for FailingRenderer {
    fn render(&self, _: &str, _: Option<&Path>, _: &TemplateData) -> PlanResult<String> {
        Err(PlanError::Template {
            template: "task-general.md".into(),
            reason: "boom".into(),
        })
    }
}

/// Loses the race for the task key a fixed number of times, then renders.
struct ContendedRenderer {
    collisions: u32,
    calls: AtomicU32,
}

impl ContendedRenderer {
    fn new(collisions: u32) -> Self {
        Self {
            collisions,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Renderer for &ContendedRenderer {
    fn render(
        &self,
        agent_type: &str,
        template_override: Option<&Path>,
        data: &TemplateData,
    ) -> PlanResult<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.collisions {
            let err = rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE);
            return Err(PlanError::Database(rusqlite::Error::SqliteFailure(
                err,
                Some("UNIQUE constraint failed: tasks.key".into()),
            )));
        }
        TemplateRenderer::default().render(agent_type, template_override, data)
    }
}

/// No task rows, no history rows, no plan tree on disk.
fn assert_untouched(db: &Database, root: &Path) {
    assert!(db.list_tasks().unwrap().is_empty(), "task rows left behind");
    assert_eq!(db.count_history().unwrap(), 0, "history rows left behind");
    assert!(!root.join("docs").exists(), "files left behind");
}

mod create_tests {
    use super::*;

    #[test]
    fn creates_row_history_and_file() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());

        let mut request = input("Build login form");
        request.agent_type = Some("frontend".into());
        let created = creator.create_task(&request).expect("create task");

        assert_eq!(created.task.key, "T-E01-F02-001");
        assert_eq!(created.task.status, "draft");
        assert_eq!(created.task.agent_type, "frontend");
        assert!(created.file_written);
        assert_eq!(
            created.file_path,
            root.path().join(TASK_DIR).join("T-E01-F02-001.md")
        );
        assert_eq!(
            created.task.file_path.as_deref(),
            Some("docs/plan/E01-identity/E01-F02-login/tasks/T-E01-F02-001.md")
        );

        let body = fs::read_to_string(&created.file_path).unwrap();
        assert!(body.contains("T-E01-F02-001"));
        assert!(body.contains("Build login form"));

        let history = db.get_task_history("T-E01-F02-001").unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].old_status.is_none());
        assert_eq!(history[0].new_status, "draft");
        assert!(history[0].agent.is_some());
    }

    #[test]
    fn keys_are_sequential() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());

        creator.create_task(&input("One")).unwrap();
        let second = creator.create_task(&input("Two")).unwrap();
        assert_eq!(second.task.key, "T-E01-F02-002");
    }

    #[test]
    fn dependencies_and_order_are_stored() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        creator.create_task(&input("First")).unwrap();

        let mut request = input("Second");
        request.depends_on = Some("T-E01-F02-001".into());
        request.execution_order = Some(2);
        request.priority = 8;
        let created = creator.create_task(&request).unwrap();

        let stored = db.require_task(&created.task.key).unwrap();
        assert_eq!(stored.depends_on, vec!["T-E01-F02-001".to_string()]);
        assert_eq!(stored.execution_order, Some(2));
        assert_eq!(stored.priority, 8);
    }

    #[test]
    fn initial_status_follows_workflow_start() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let mut workflow = WorkflowConfig::default();
        workflow.special_statuses.insert(
            "_start_".into(),
            vec!["ready_for_development".into(), "draft".into()],
        );
        let creator = Creator::new(db.clone(), workflow, TemplateRenderer::default(), root.path());
        creator
            .create_epic(&NewEpic {
                key: "E01".into(),
                title: "Identity".into(),
                ..Default::default()
            })
            .unwrap();
        creator
            .create_feature(&NewFeature {
                epic_key: "E01".into(),
                key: "F02".into(),
                title: "Login".into(),
                ..Default::default()
            })
            .unwrap();

        let created = creator.create_task(&input("Ready")).unwrap();
        assert_eq!(created.task.status, "ready_for_development");
    }

    #[test]
    fn custom_key_is_used() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());

        let mut request = input("Spike");
        request.custom_key = Some("spike-auth".into());
        let created = creator.create_task(&request).unwrap();
        assert_eq!(created.task.key, "SPIKE-AUTH");
        assert!(created.file_path.ends_with("tasks/SPIKE-AUTH.md"));

        // Custom keys do not move the sequence.
        let next = creator.create_task(&input("Next")).unwrap();
        assert_eq!(next.task.key, "T-E01-F02-001");
    }

    #[test]
    fn custom_key_in_use_is_a_conflict() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        creator.create_task(&input("First")).unwrap();

        let mut request = input("Clash");
        request.custom_key = Some("T-E01-F02-001".into());
        let err = creator.create_task(&request).unwrap_err();
        assert!(matches!(err, PlanError::KeyInUse { .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(db.list_tasks().unwrap().len(), 1);
    }

    #[test]
    fn existing_unclaimed_file_is_linked_not_overwritten() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        fs::create_dir_all(root.path().join("notes")).unwrap();
        fs::write(root.path().join("notes/design.md"), "hand written").unwrap();

        let mut request = input("Adopt notes");
        request.filename = Some("notes/design.md".into());
        let created = creator.create_task(&request).unwrap();

        assert!(!created.file_written);
        assert_eq!(
            fs::read_to_string(root.path().join("notes/design.md")).unwrap(),
            "hand written"
        );
    }
}

mod key_allocation_tests {
    use super::*;

    #[test]
    fn custom_key_shaped_like_another_features_key() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        let signup = creator
            .create_feature(&NewFeature {
                epic_key: "E01".into(),
                key: "F03".into(),
                title: "Signup".into(),
                ..Default::default()
            })
            .unwrap();

        let mut request = input("Borrowed number");
        request.custom_key = Some("T-E01-F03-001".into());
        let borrowed = creator.create_task(&request).unwrap();
        assert_eq!(borrowed.task.key, "T-E01-F03-001");

        let mut request = input("First signup task");
        request.feature_key = "F03".into();
        let first = creator.create_task(&request).unwrap();
        assert_eq!(first.task.key, "T-E01-F03-002");

        request.title = "Second signup task".into();
        let second = creator.create_task(&request).unwrap();
        assert_eq!(second.task.key, "T-E01-F03-003");

        let keys: Vec<String> = db
            .list_tasks_by_feature(signup.id)
            .unwrap()
            .into_iter()
            .map(|t| t.key)
            .collect();
        assert_eq!(keys, vec!["T-E01-F03-002", "T-E01-F03-003"]);
    }

    #[test]
    fn lost_race_is_retried() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let renderer = ContendedRenderer::new(1);
        let creator = setup_creator(&db, root.path(), &renderer);

        let created = creator.create_task(&input("Raced")).expect("retry succeeds");

        assert_eq!(renderer.calls(), 2);
        assert_eq!(created.task.key, "T-E01-F02-001");
        assert!(created.file_path.exists());
        assert_eq!(db.list_tasks().unwrap().len(), 1);
        assert_eq!(db.count_history().unwrap(), 1);
    }

    #[test]
    fn exhausted_retries_are_a_conflict() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let renderer = ContendedRenderer::new(u32::MAX);
        let creator = setup_creator(&db, root.path(), &renderer);

        let err = creator.create_task(&input("Starved")).unwrap_err();

        assert_eq!(renderer.calls(), 3);
        match &err {
            PlanError::KeyInUse { key, .. } => assert_eq!(key, "T-E01-F02-001"),
            other => panic!("expected KeyInUse, got {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_untouched(&db, root.path());
    }

    #[test]
    fn custom_key_is_not_retried() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let renderer = ContendedRenderer::new(u32::MAX);
        let creator = setup_creator(&db, root.path(), &renderer);

        let mut request = input("Named");
        request.custom_key = Some("spike-7".into());
        let err = creator.create_task(&request).unwrap_err();

        assert_eq!(renderer.calls(), 1);
        assert!(matches!(err, PlanError::KeyInUse { ref key, .. } if key == "SPIKE-7"));
        assert_untouched(&db, root.path());
    }
}

mod path_safety_tests {
    use super::*;

    #[test]
    fn traversal_filename_creates_nothing() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());

        let mut request = input("Escape");
        request.filename = Some("../outside.md".into());
        let err = creator.create_task(&request).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PathSafety);
        assert_untouched(&db, root.path());
        assert!(!root.path().parent().unwrap().join("outside.md").exists());
    }

    #[test]
    fn absolute_and_non_markdown_filenames_rejected() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());

        for filename in ["/tmp/abs.md", "docs/task.txt"] {
            let mut request = input("Bad path");
            request.filename = Some(filename.into());
            let err = creator.create_task(&request).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PathSafety, "{filename}");
        }
        assert_untouched(&db, root.path());
    }
}

mod rollback_tests {
    use super::*;

    #[test]
    fn failure_after_insert_leaves_nothing() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());

        let err = creator
            .create_task_with(&input("Doomed"), &CancelAt(CreateStage::AfterInsert))
            .unwrap_err();

        assert!(matches!(err, PlanError::Cancelled(CreateStage::AfterInsert)));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_untouched(&db, root.path());
    }

    #[test]
    fn failure_after_file_write_deletes_the_file() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());

        let err = creator
            .create_task_with(&input("Doomed"), &CancelAt(CreateStage::AfterFileWrite))
            .unwrap_err();

        assert!(matches!(err, PlanError::Cancelled(CreateStage::AfterFileWrite)));
        assert!(!root.path().join(TASK_DIR).join("T-E01-F02-001.md").exists());
        assert_untouched(&db, root.path());
    }

    #[test]
    fn render_failure_leaves_nothing() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), FailingRenderer);

        let err = creator.create_task(&input("Unrenderable")).unwrap_err();
        assert!(matches!(err, PlanError::Template { .. }));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_untouched(&db, root.path());
    }

    #[test]
    fn expired_deadline_aborts_before_any_write() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());

        let err = creator
            .create_task_with(&input("Late"), &Deadline::at(Instant::now()))
            .unwrap_err();
        assert!(matches!(err, PlanError::Cancelled(CreateStage::BeforeWrite)));
        assert_untouched(&db, root.path());
    }

    #[test]
    fn generous_deadline_does_not_interfere() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());

        creator
            .create_task_with(&input("On time"), &Deadline::after(Duration::from_secs(60)))
            .unwrap();
    }

    #[test]
    fn failure_keeps_preexisting_file_and_directories() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        fs::create_dir_all(root.path().join("notes")).unwrap();
        fs::write(root.path().join("notes/keep.md"), "keep me").unwrap();

        let mut request = input("Doomed");
        request.filename = Some("notes/keep.md".into());
        creator
            .create_task_with(&request, &CancelAt(CreateStage::AfterFileWrite))
            .unwrap_err();

        assert_eq!(
            fs::read_to_string(root.path().join("notes/keep.md")).unwrap(),
            "keep me"
        );
        assert!(db.list_tasks().unwrap().is_empty());
    }
}

mod collision_tests {
    use super::*;

    fn claim_shared(creator: &Creator, title: &str) -> String {
        let mut request = input(title);
        request.filename = Some("docs/shared.md".into());
        creator.create_task(&request).unwrap().task.key
    }

    #[test]
    fn claimed_path_without_force_names_the_claimant() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        let owner = claim_shared(&creator, "Owner");

        let mut request = input("Intruder");
        request.filename = Some("docs/shared.md".into());
        let err = creator.create_task(&request).unwrap_err();

        match &err {
            PlanError::FileClaimed { claimant, title, .. } => {
                assert_eq!(claimant, &owner);
                assert_eq!(title, "Owner");
            }
            other => panic!("expected FileClaimed, got {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(db.list_tasks().unwrap().len(), 1);
        assert_eq!(
            db.require_task(&owner).unwrap().file_path.as_deref(),
            Some("docs/shared.md")
        );
    }

    #[test]
    fn forced_claim_clears_previous_holder() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        let owner = claim_shared(&creator, "Owner");

        let mut request = input("New owner");
        request.filename = Some("docs/shared.md".into());
        request.force = true;
        let created = creator.create_task(&request).unwrap();

        assert_eq!(created.reassigned_from.as_deref(), Some(owner.as_str()));
        assert_eq!(created.task.file_path.as_deref(), Some("docs/shared.md"));
        assert!(db.require_task(&owner).unwrap().file_path.is_none());
        let holder = db.find_task_by_file_path("docs/shared.md").unwrap().unwrap();
        assert_eq!(holder.key, created.task.key);
    }

    #[test]
    fn forced_claim_is_rolled_back_with_the_creation() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        let owner = claim_shared(&creator, "Owner");

        let mut request = input("New owner");
        request.filename = Some("docs/shared.md".into());
        request.force = true;
        creator
            .create_task_with(&request, &CancelAt(CreateStage::AfterInsert))
            .unwrap_err();

        assert_eq!(
            db.require_task(&owner).unwrap().file_path.as_deref(),
            Some("docs/shared.md")
        );
        assert_eq!(db.list_tasks().unwrap().len(), 1);
        assert!(root.path().join("docs/shared.md").exists());
    }
}

mod integrity_tests {
    use super::*;

    #[test]
    fn fresh_creations_are_clean() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        creator.create_task(&input("One")).unwrap();
        creator.create_task(&input("Two")).unwrap();

        let report = db.check_integrity(root.path()).unwrap();
        assert_eq!(report.tasks_checked, 2);
        assert!(report.is_clean(), "{report:?}");
    }

    #[test]
    fn reports_broken_unlinked_and_orphaned() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        let first = creator.create_task(&input("One")).unwrap();
        let second = creator.create_task(&input("Two")).unwrap();

        fs::remove_file(&first.file_path).unwrap();
        fs::write(root.path().join(TASK_DIR).join("T-E01-F02-077.md"), "stray").unwrap();

        let mut request = input("Takeover");
        request.filename = second.task.file_path.clone();
        request.force = true;
        creator.create_task(&request).unwrap();

        let report = db.check_integrity(root.path()).unwrap();
        assert_eq!(report.broken_file_paths.len(), 1);
        assert_eq!(report.broken_file_paths[0].task_key, first.task.key);
        assert_eq!(report.unlinked_tasks, vec![second.task.key.clone()]);
        assert_eq!(
            report.orphaned_files,
            vec![format!("{TASK_DIR}/T-E01-F02-077.md")]
        );
    }

    #[test]
    fn custom_folders_are_scanned_for_orphans() {
        let db = setup_db();
        let root = TempDir::new().unwrap();
        let creator = setup_creator(&db, root.path(), TemplateRenderer::default());
        creator
            .create_feature(&NewFeature {
                epic_key: "E01".into(),
                key: "F04".into(),
                title: "Billing".into(),
                custom_folder_path: Some("specs/billing".into()),
                ..Default::default()
            })
            .unwrap();
        creator
            .create_feature(&NewFeature {
                epic_key: "E01".into(),
                key: "F05".into(),
                title: "Signup".into(),
                file_path: Some("notes/signup.md".into()),
                ..Default::default()
            })
            .unwrap();

        let mut request = input("Invoice export");
        request.feature_key = "F04".into();
        let billed = creator.create_task(&request).unwrap();
        assert_eq!(
            billed.task.file_path.as_deref(),
            Some("specs/billing/tasks/T-E01-F04-001.md")
        );

        fs::write(root.path().join("specs/billing/tasks/T-E01-F04-050.md"), "stray").unwrap();
        fs::create_dir_all(root.path().join("notes/tasks")).unwrap();
        fs::write(root.path().join("notes/tasks/old.md"), "stray").unwrap();

        let report = db.check_integrity(root.path()).unwrap();
        assert!(report.broken_file_paths.is_empty());
        assert_eq!(
            report.orphaned_files,
            vec![
                "notes/tasks/old.md".to_string(),
                "specs/billing/tasks/T-E01-F04-050.md".to_string(),
            ]
        );
    }
}
