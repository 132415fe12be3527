use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn rag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rag"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    fs::write(
        data_dir.join("corpus.jsonl"),
        r#"{"id": "rust-001", "text": "rust ownership and borrowing"}
{"id": "py-001", "text": "python machine learning with pytorch"}
{"id": "ops-001", "text": "kubernetes deployment and docker infrastructure"}
"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[server]
bind = "127.0.0.1:7331"

[cache]
ttl_secs = 60
max_entries = 16

[search]
default_top_k = 2
max_top_k = 10

[embedding]
provider = "hash"
dims = 128

[index]
provider = "memory"
path = "{}/data/corpus.jsonl"

[generation]
provider = "echo"
max_tokens = 4
"#,
        root.display()
    );

    let config_path = config_dir.join("rag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_search_ranks_exact_match_first() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_rag(&config, &["search", "Rust ownership and borrowing"]);
    assert!(success, "search failed: {}", stderr);

    let first = stdout.lines().next().unwrap();
    assert!(first.starts_with("1. [1.0000] rust-001"), "got: {}", first);
    // default_top_k from config
    assert!(stdout.contains("2. ["));
    assert!(!stdout.contains("3. ["));
    assert!(stdout.contains("cache miss"));
}

#[test]
fn test_search_top_k_override() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_rag(&config, &["search", "docker", "--top-k", "3"]);
    assert!(success);
    assert!(stdout.contains("3 result(s)"));
}

#[test]
fn test_search_top_k_above_max_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_rag(&config, &["search", "docker", "--top-k", "50"]);
    assert!(!success);
    assert!(stderr.contains("top_k must be <= 10"), "stderr: {}", stderr);
}

#[test]
fn test_search_empty_query_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_rag(&config, &["search", "   "]);
    assert!(!success);
    assert!(stderr.contains("query must not be empty"));
}

#[test]
fn test_summarize_text_argument() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_rag(
        &config,
        &["summarize", "one two three four five six"],
    );
    assert!(success, "summarize failed: {}", stderr);
    // generation.max_tokens = 4
    assert!(stdout.starts_with("one two three four\n"));
    assert!(!stdout.contains("five"));
    assert!(stdout.contains("time to last token"));
}

#[test]
fn test_summarize_reads_stdin() {
    let (_tmp, config) = setup_test_env();
    let mut child = Command::new(rag_binary())
        .arg("--config")
        .arg(config.to_str().unwrap())
        .args(["summarize", "--max-tokens", "2"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"piped context words")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("piped context\n"));
}

#[test]
fn test_bench_reports_hits_and_slo() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_rag(&config, &["bench", "docker", "--iterations", "20"]);
    assert!(success, "bench failed: {}", stderr);
    assert!(stdout.contains("Iterations:  20"));
    assert!(stdout.contains("19 hits / 1 misses"));
    assert!(stdout.contains("SLO:"));
}

#[test]
fn test_bench_no_cache_all_misses() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_rag(
        &config,
        &["bench", "docker", "--iterations", "5", "--no-cache"],
    );
    assert!(success);
    assert!(stdout.contains("0 hits / 5 misses"));
}

#[test]
fn test_demo_ignores_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let corpus = tmp.path().join("corpus.jsonl");
    fs::write(&corpus, "{\"id\": \"only\", \"text\": \"solitary record\"}\n").unwrap();

    let (stdout, stderr, success) = run_rag(
        &missing,
        &["--demo", "--corpus", corpus.to_str().unwrap(), "search", "solitary record"],
    );
    assert!(success, "demo search failed: {}", stderr);
    assert!(stdout.contains("only"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_rag(&missing, &["search", "x"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config) = setup_test_env();
    fs::write(&config, "[server]\nbind = \"127.0.0.1:1\"\n[cache]\nttl_secs = 0\n").unwrap();
    let (_, stderr, success) = run_rag(&config, &["search", "x"]);
    assert!(!success);
    assert!(stderr.contains("cache.ttl_secs must be > 0"));
}

#[test]
fn test_completions() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_rag(&config, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("rag"));
    assert!(stdout.contains("summarize"));
}
