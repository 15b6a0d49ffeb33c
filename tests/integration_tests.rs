//! Integration tests for the stageboard CLI
//!
//! Each test runs the binary against a fresh project directory backed by a
//! SQLite file under `.stageboard/`.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a stageboard Command
fn stageboard() -> Command {
    let mut cmd = cargo_bin_cmd!("stageboard");
    cmd.env_remove("STAGEBOARD_DB_PATH")
        .env_remove("STAGEBOARD_PORT")
        .env_remove("RUST_LOG");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_project(dir: &TempDir) {
    stageboard()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn import_sales(dir: &TempDir) {
    let file = dir.path().join("sales.json");
    fs::write(
        &file,
        r#"[
            {"id": "e1", "sales_stage": "new", "amount": 100},
            {"id": "e2", "sales_stage": "won", "amount": "250.5"},
            {"id": "e3", "sales_stage": "archived", "amount": 7}
        ]"#,
    )
    .unwrap();
    stageboard()
        .current_dir(dir.path())
        .args(["import", "sales"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 3 entities into 'sales'"));
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_stageboard_help() {
        stageboard()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("stages"));
    }

    #[test]
    fn test_stageboard_version() {
        stageboard().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        stageboard()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized stageboard project"));

        assert!(dir.path().join(".stageboard").is_dir());
        assert!(dir.path().join(".stageboard/stageboard.toml").is_file());
        assert!(dir.path().join(".stageboard/stageboard.db").is_file());

        let content = fs::read_to_string(dir.path().join(".stageboard/stageboard.toml")).unwrap();
        assert!(content.contains("[pipelines.sales]"));
        assert!(content.contains("sales_stage"));
    }

    #[test]
    fn test_init_twice_does_not_duplicate_stages() {
        let dir = create_temp_project();
        init_project(&dir);
        init_project(&dir);

        let output = stageboard()
            .current_dir(dir.path())
            .args(["stages", "list", "task"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(stdout.matches("in_progress").count(), 1);
        assert!(stdout.contains(" 3. done"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        stageboard()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("init")
            .assert()
            .success();
        assert!(dir.path().join(".stageboard/stageboard.toml").exists());
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_without_file() {
        let dir = create_temp_project();
        stageboard()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No stageboard.toml found"))
            .stdout(predicate::str::contains("built-in presets apply"));
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = create_temp_project();
        stageboard()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created stageboard.toml"));

        stageboard()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".stageboard")).unwrap();
        fs::write(dir.path().join(".stageboard/stageboard.toml"), "[server]\nport = 4000\n").unwrap();

        stageboard()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".stageboard/stageboard.toml")).unwrap();
        assert!(content.contains("4000"));
    }

    #[test]
    fn test_config_validate_reports_problems() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".stageboard")).unwrap();
        fs::write(
            dir.path().join(".stageboard/stageboard.toml"),
            "[pipelines.sales]\nstage_field = \"amount\"\nvalue_field = \"amount\"\n",
        )
        .unwrap();

        stageboard()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("stage_field and value_field must differ"));

        // Every other command refuses to run on an invalid file.
        stageboard()
            .current_dir(dir.path())
            .args(["board", "sales"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn test_custom_pipeline_from_config() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".stageboard")).unwrap();
        fs::write(
            dir.path().join(".stageboard/stageboard.toml"),
            r#"
[pipelines.hiring]
stage_field = "hiring_stage"
default_stages = [
  { display_name = "Applied" },
  { display_name = "Interview", color = "purple" },
  { display_name = "Offer", color = "green" },
]
"#,
        )
        .unwrap();

        stageboard()
            .current_dir(dir.path())
            .args(["stages", "list", "hiring"])
            .assert()
            .success()
            .stdout(predicate::str::contains("applied"))
            .stdout(predicate::str::contains("interview"));

        stageboard()
            .current_dir(dir.path())
            .args(["board", "sales"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not configured"));
    }
}

// =============================================================================
// Stage Editor Tests
// =============================================================================

mod stages {
    use super::*;

    #[test]
    fn test_add_rename_remove_stage() {
        let dir = create_temp_project();
        init_project(&dir);

        stageboard()
            .current_dir(dir.path())
            .args(["stages", "add", "task", "Blocked", "--color", "red"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Added stage 'Blocked' (blocked) at position 4"));

        stageboard()
            .current_dir(dir.path())
            .args(["stages", "rename", "task", "blocked", "On Ice"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Renamed 'blocked' to 'On Ice'"));

        stageboard()
            .current_dir(dir.path())
            .args(["stages", "remove", "task", "review"])
            .assert()
            .success();

        let output = stageboard()
            .current_dir(dir.path())
            .args(["stages", "list", "task"])
            .output()
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(!stdout.contains("review"));
        assert!(stdout.contains(" 2. done"));
        assert!(stdout.contains(" 3. blocked"));
        assert!(stdout.contains("On Ice"));
    }

    #[test]
    fn test_add_duplicate_stage_is_rejected() {
        let dir = create_temp_project();
        init_project(&dir);

        stageboard()
            .current_dir(dir.path())
            .args(["stages", "add", "task", "in progress"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_reorder_and_move_stage() {
        let dir = create_temp_project();
        init_project(&dir);

        stageboard()
            .current_dir(dir.path())
            .args(["stages", "reorder", "support", "closed", "resolved", "pending", "open"])
            .assert()
            .success()
            .stdout(predicate::str::contains(" 0. closed"))
            .stdout(predicate::str::contains(" 3. open"));

        stageboard()
            .current_dir(dir.path())
            .args(["stages", "move", "support", "open", "0"])
            .assert()
            .success()
            .stdout(predicate::str::contains(" 0. open"))
            .stdout(predicate::str::contains(" 1. closed"));
    }

    #[test]
    fn test_reorder_with_missing_key_is_rejected() {
        let dir = create_temp_project();
        init_project(&dir);

        stageboard()
            .current_dir(dir.path())
            .args(["stages", "reorder", "support", "closed", "open"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid stage order"));
    }
}

// =============================================================================
// Board and Transition Tests
// =============================================================================

mod board {
    use super::*;

    #[test]
    fn test_board_shows_aggregates_and_orphans() {
        let dir = create_temp_project();
        init_project(&dir);
        import_sales(&dir);

        let output = stageboard()
            .current_dir(dir.path())
            .args(["board", "sales", "--cards"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);

        assert!(stdout.contains("Pipeline: sales"));
        // e3 has an unknown stage and lands in the first column.
        assert!(stdout.contains("107.00"));
        assert!(stdout.contains("250.50"));
        assert!(stdout.contains("357.50"));
        assert!(stdout.contains("(was 'archived')"));
    }

    #[test]
    fn test_move_entity_persists() {
        let dir = create_temp_project();
        init_project(&dir);
        import_sales(&dir);

        stageboard()
            .current_dir(dir.path())
            .args(["move", "sales", "e1", "won"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Moved 'e1' from new to won"));

        let output = stageboard()
            .current_dir(dir.path())
            .args(["board", "sales", "--cards"])
            .output()
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("350.50"));
    }

    #[test]
    fn test_move_to_unknown_stage_fails() {
        let dir = create_temp_project();
        init_project(&dir);
        import_sales(&dir);

        stageboard()
            .current_dir(dir.path())
            .args(["move", "sales", "e1", "archived"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown stage 'archived'"));
    }

    #[test]
    fn test_move_unknown_entity_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        stageboard()
            .current_dir(dir.path())
            .args(["move", "sales", "nope", "won"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not loaded"));
    }

    #[test]
    fn test_import_rejects_non_array() {
        let dir = create_temp_project();
        init_project(&dir);
        let file = dir.path().join("bad.json");
        fs::write(&file, r#"{"id": "e1"}"#).unwrap();

        stageboard()
            .current_dir(dir.path())
            .args(["import", "sales"])
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("JSON array"));
    }

    #[test]
    fn test_unknown_pipeline() {
        let dir = create_temp_project();
        init_project(&dir);

        stageboard()
            .current_dir(dir.path())
            .args(["board", "payroll"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Pipeline 'payroll' is not configured"));
    }
}
