//! Integration tests for markdown path resolution.

use std::path::{Path, PathBuf};
use taskplan::db::tasks::insert_task;
use taskplan::db::{Database, now_utc};
use taskplan::error::ErrorKind;
use taskplan::paths::{PathResolver, validate_custom_filename};
use taskplan::types::{NewEpic, NewFeature, NewTask};

const ROOT: &str = "/work/project";

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn resolver(db: &Database) -> PathResolver {
    PathResolver::new(db.clone(), ROOT)
}

fn epic(db: &Database, slug: Option<&str>, folder: Option<&str>) {
    db.create_epic(&NewEpic {
        key: "E01".into(),
        title: "Identity".into(),
        slug: slug.map(String::from),
        custom_folder_path: folder.map(String::from),
        ..Default::default()
    })
    .expect("Failed to create epic");
}

fn feature(db: &Database, slug: Option<&str>, file: Option<&str>) -> i64 {
    db.create_feature(&NewFeature {
        epic_key: "E01".into(),
        key: "F02".into(),
        title: "Login".into(),
        slug: slug.map(String::from),
        file_path: file.map(String::from),
        ..Default::default()
    })
    .expect("Failed to create feature")
    .id
}

fn task(db: &Database, feature_id: i64, key: &str, file: Option<&str>) {
    db.with_conn(|conn| {
        insert_task(
            conn,
            &NewTask {
                feature_id,
                key: key.into(),
                title: key.into(),
                description: None,
                status: "draft".into(),
                agent_type: "general".into(),
                priority: 5,
                depends_on: vec![],
                file_path: file.map(String::from),
                execution_order: None,
                created_at: now_utc(),
            },
        )
    })
    .expect("Failed to seed task");
}

mod resolve_tests {
    use super::*;

    #[test]
    fn default_layout_from_slugs() {
        let db = setup_db();
        epic(&db, Some("identity"), None);
        let f = feature(&db, Some("login"), None);
        task(&db, f, "T-E01-F02-001", None);
        let r = resolver(&db);

        assert_eq!(
            r.resolve_epic_path("E01").unwrap(),
            PathBuf::from("/work/project/docs/plan/E01-identity/epic.md")
        );
        assert_eq!(
            r.resolve_feature_path("E01-F02").unwrap(),
            PathBuf::from("/work/project/docs/plan/E01-identity/E01-F02-login/prd.md")
        );
        assert_eq!(
            r.resolve_task_path("T-E01-F02-001").unwrap(),
            PathBuf::from("/work/project/docs/plan/E01-identity/E01-F02-login/tasks/T-E01-F02-001.md")
        );
    }

    #[test]
    fn explicit_task_path_wins() {
        let db = setup_db();
        epic(&db, Some("identity"), None);
        let f = feature(&db, Some("login"), None);
        task(&db, f, "T-E01-F02-001", Some("notes/login-task.md"));

        assert_eq!(
            resolver(&db).resolve_task_path("T-E01-F02-001").unwrap(),
            PathBuf::from("/work/project/notes/login-task.md")
        );
    }

    #[test]
    fn tasks_follow_the_feature_file_directory() {
        let db = setup_db();
        epic(&db, Some("identity"), Some("specs/identity"));
        let f = feature(&db, Some("login"), Some("specs/auth/login.md"));
        task(&db, f, "T-E01-F02-002", None);

        assert_eq!(
            resolver(&db).resolve_task_path("T-E01-F02-002").unwrap(),
            PathBuf::from("/work/project/specs/auth/tasks/T-E01-F02-002.md")
        );
    }

    #[test]
    fn epic_folder_is_inherited() {
        let db = setup_db();
        epic(&db, Some("identity"), Some("specs/identity"));
        let f = feature(&db, None, None);
        task(&db, f, "T-E01-F02-003", None);
        let r = resolver(&db);

        assert_eq!(
            r.resolve_feature_path("E01-F02").unwrap(),
            PathBuf::from("/work/project/specs/identity/E01-F02-E01-F02/prd.md")
        );
        assert_eq!(
            r.resolve_task_path("T-E01-F02-003").unwrap(),
            PathBuf::from("/work/project/specs/identity/E01-F02-E01-F02/tasks/T-E01-F02-003.md")
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let db = setup_db();
        epic(&db, None, None);
        let f = feature(&db, None, None);
        task(&db, f, "T-E01-F02-001", None);
        let r = resolver(&db);

        let first = r.resolve_task_path("T-E01-F02-001").unwrap();
        let second = r.resolve_task_path("T-E01-F02-001").unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            PathBuf::from("/work/project/docs/plan/E01-E01/E01-F02-E01-F02/tasks/T-E01-F02-001.md")
        );
    }

    #[test]
    fn unknown_entities_are_not_found() {
        let db = setup_db();
        let r = resolver(&db);
        assert_eq!(r.resolve_epic_path("E07").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(r.resolve_feature_path("E07-F01").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(r.resolve_task_path("T-E07-F01-001").unwrap_err().kind(), ErrorKind::NotFound);
    }
}

mod custom_filename_tests {
    use super::*;

    #[test]
    fn join_reproduces_absolute_path() {
        let root = Path::new(ROOT);
        for input in [
            "docs/task.md",
            "./docs/task.md",
            "docs/./nested/./task.md",
            "docs\\windows\\task.md",
            "task.md",
        ] {
            let (absolute, relative) = validate_custom_filename(input, root).unwrap();
            assert_eq!(root.join(&relative), absolute, "input {input}");
            assert!(absolute.starts_with(root));
        }
    }

    #[test]
    fn rejections_are_path_safety_errors() {
        let root = Path::new(ROOT);
        for input in ["../outside.md", "/etc/passwd.md", "docs/../../x.md", "docs/notes.txt"] {
            let err = validate_custom_filename(input, root).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PathSafety, "input {input}");
        }
    }
}
