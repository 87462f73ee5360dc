use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docchat");
    path
}

fn write_config(root: &Path, embedding_provider: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docchat.sqlite"

[chunking]
max_chars = 400
overlap_chars = 40

[retrieval]
top_k = 3

[embedding]
provider = "{provider}"
dims = 128

[server]
bind = "127.0.0.1:8090"

[ingest]
root = "{root}/docs"
include_globs = ["**/*.md", "**/*.txt"]
"#,
        root = root.display(),
        provider = embedding_provider,
    );

    let config_path = config_dir.join("docchat.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let docs = root.join("docs");
    fs::create_dir_all(docs.join("ops")).unwrap();
    fs::write(
        docs.join("faq.md"),
        "# FAQ\n\nReturn policy: 30 days with a receipt.",
    )
    .unwrap();
    fs::write(
        docs.join("ops/deploy.md"),
        "# Deploys\n\nDeploys run on Tuesdays after the freeze lifts.",
    )
    .unwrap();
    fs::write(
        docs.join("notes.txt"),
        "Office plants need water on Fridays.",
    )
    .unwrap();
    fs::write(docs.join("image.png"), [0u8, 1, 2, 3]).unwrap();

    let config_path = write_config(&root, "hash");
    (tmp, config_path)
}

fn run_docchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_docchat_with_env(config_path, args, &[])
}

fn run_docchat_with_env(
    config_path: &Path,
    args: &[&str],
    env: &[(&str, &str)],
) -> (String, String, bool) {
    let binary = docchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("DOCCHAT_JWT_SECRET")
        .envs(env.iter().copied())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docchat(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docchat.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_docchat(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_docchat(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_indexes_matching_files() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docchat(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files found: 3"));
    assert!(stdout.contains("sources indexed: 3"));
    assert!(stdout.contains("sources unchanged: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_skips_unchanged_sources() {
    let (tmp, config_path) = setup_test_env();

    run_docchat(&config_path, &["ingest"]);

    let (stdout, _, success) = run_docchat(&config_path, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("sources indexed: 0"));
    assert!(stdout.contains("sources unchanged: 3"));

    fs::write(
        tmp.path().join("docs/faq.md"),
        "# FAQ\n\nReturn policy: 60 days with a receipt.",
    )
    .unwrap();
    let (stdout, _, _) = run_docchat(&config_path, &["ingest"]);
    assert!(stdout.contains("sources indexed: 1"));
    assert!(stdout.contains("sources unchanged: 2"));

    let (stdout, _, _) = run_docchat(&config_path, &["ingest", "--full"]);
    assert!(stdout.contains("sources indexed: 3"));
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docchat(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "dry-run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("files found: 3"));
    assert!(stdout.contains("estimated chunks: 3"));
    assert!(!tmp.path().join("data/docchat.sqlite").exists());
}

#[test]
fn test_ingest_prune_removes_deleted_files() {
    let (tmp, config_path) = setup_test_env();

    run_docchat(&config_path, &["ingest"]);
    fs::remove_file(tmp.path().join("docs/notes.txt")).unwrap();

    let (stdout, _, success) = run_docchat(&config_path, &["ingest", "--prune"]);
    assert!(success);
    assert!(stdout.contains("sources removed: 1"));

    let (stdout, _, _) = run_docchat(&config_path, &["search", "office plants water"]);
    assert!(!stdout.contains("notes.txt"));
}

#[test]
fn test_ingest_requires_embedding_provider() {
    let (tmp, _) = setup_test_env();
    let config_path = write_config(tmp.path(), "disabled");

    let (_, stderr, success) = run_docchat(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_search_finds_relevant_chunk() {
    let (_tmp, config_path) = setup_test_env();
    run_docchat(&config_path, &["ingest"]);

    let (stdout, stderr, success) =
        run_docchat(&config_path, &["search", "return policy receipt", "--limit", "1"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("[faq.md#0]"));
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_source_ids_use_relative_paths() {
    let (_tmp, config_path) = setup_test_env();
    run_docchat(&config_path, &["ingest"]);

    let (stdout, _, _) = run_docchat(&config_path, &["search", "deploys tuesdays freeze"]);
    assert!(stdout.contains("[ops/deploy.md#0]"));
}

#[test]
fn test_history_of_unknown_conversation() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docchat(&config_path, &["history", "never-used"]);
    assert!(success, "history failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("No turns."));
}

#[test]
fn test_chat_fails_without_model_and_stores_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_docchat(&config_path, &["ingest"]);

    let (_, stderr, success) = run_docchat(
        &config_path,
        &["chat", "What is the return policy?", "--conversation", "c1"],
    );
    assert!(!success);
    assert!(stderr.contains("model call failed"));

    let (stdout, _, _) = run_docchat(&config_path, &["history", "c1"]);
    assert!(stdout.contains("No turns."));
}

#[test]
fn test_token_requires_secret() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docchat(&config_path, &["token", "alice"]);
    assert!(!success);
    assert!(stderr.contains("DOCCHAT_JWT_SECRET"));
}

#[test]
fn test_token_prints_jwt() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docchat_with_env(
        &config_path,
        &["token", "alice", "--ttl-minutes", "5"],
        &[("DOCCHAT_JWT_SECRET", "cli-test-secret")],
    );
    assert!(success, "token failed: stdout={}, stderr={}", stdout, stderr);
    let token = stdout.trim();
    assert_eq!(token.split('.').count(), 3);
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/x.sqlite\"\n\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_docchat(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("overlap_chars"));
}
