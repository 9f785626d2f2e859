#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use zigdoc_core::config::ToolConfig;
use zigdoc_core::{
    DiskStore, DocError, FailurePolicy, FingerprintCache, Namespace, Runner, Tool, WarmupOptions,
};
use zigdoc_test_helpers::fixtures::{BROKEN_ZIG, HELLO_MD, HELLO_ZIG};
use zigdoc_test_helpers::{SampleTree, StubTool};

fn namespace(tools: ToolConfig) -> Arc<Namespace> {
    namespace_with(tools, FingerprintCache::new())
}

fn namespace_with(tools: ToolConfig, cache: FingerprintCache<DocError>) -> Arc<Namespace> {
    Arc::new(Namespace::new(Arc::new(cache), Runner::new(tools)))
}

fn doctest_tools(doctest: &StubTool) -> ToolConfig {
    ToolConfig {
        doctest: Some(doctest.path().to_path_buf()),
        ..ToolConfig::default()
    }
}

// ============================================================================
// RENDERING
// ============================================================================

#[test]
fn test_echo_docgen_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let docgen = StubTool::echo_docgen(temp_dir.path());
    let compiler = StubTool::compiler(temp_dir.path());
    let tree = SampleTree::new();
    let sample = tree.file("docs/hello.md", HELLO_MD);

    let ns = namespace(ToolConfig {
        docgen: Some(docgen.path().to_path_buf()),
        compiler: Some(compiler.path().to_path_buf()),
        ..ToolConfig::default()
    });

    let first = ns.docgen(&sample).unwrap();
    assert_eq!(first.text, sample.canonicalize().unwrap().to_str().unwrap());
    assert!(!first.cached);
    assert_eq!(docgen.invocations(), 1);

    let second = ns.docgen(&sample).unwrap();
    assert!(second.cached);
    assert_eq!(second.text, first.text);
    assert_eq!(docgen.invocations(), 1);

    // docgen receives the compiler, the absolute source and the sink
    let call = &docgen.calls()[0];
    assert!(call.starts_with(compiler.path().to_str().unwrap()));
    assert!(call.ends_with("/dev/stdout"));
}

#[test]
fn test_doctest_receives_compiler_flag() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::echo_doctest(temp_dir.path());
    let compiler = StubTool::compiler(temp_dir.path());
    let tree = SampleTree::new();
    let sample = tree.file("hello.zig", HELLO_ZIG);

    let ns = namespace(ToolConfig {
        doctest: Some(doctest.path().to_path_buf()),
        compiler: Some(compiler.path().to_path_buf()),
        ..ToolConfig::default()
    });

    ns.doctest(&sample).unwrap();

    let call = &doctest.calls()[0];
    assert!(call.starts_with("inline --in_file /"));
    assert!(call.ends_with(&format!("--zig_exe {}", compiler.path().display())));
}

#[test]
fn test_docgen_runs_in_removed_scratch_dir() {
    let temp_dir = TempDir::new().unwrap();
    let cwd_log = temp_dir.path().join("cwd");
    let docgen = StubTool::script(
        temp_dir.path(),
        "docgen",
        &format!("pwd > '{}'\nprintf 'ok' > \"$3\"", cwd_log.display()),
    );
    let compiler = StubTool::compiler(temp_dir.path());
    let tree = SampleTree::new();
    let sample = tree.file("hello.md", HELLO_MD);

    let ns = namespace(ToolConfig {
        docgen: Some(docgen.path().to_path_buf()),
        compiler: Some(compiler.path().to_path_buf()),
        ..ToolConfig::default()
    });

    assert_eq!(ns.docgen(&sample).unwrap().text, "ok");

    let scratch = fs::read_to_string(&cwd_log).unwrap();
    let scratch = Path::new(scratch.trim());
    assert!(scratch
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("zig_docgen"));
    assert!(!scratch.exists());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_doctest_runs_once() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::slow_echo_doctest(temp_dir.path());
    let tree = SampleTree::new();
    let sample = tree.file("hello.zig", HELLO_ZIG);
    let ns = namespace(doctest_tools(&doctest));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ns = Arc::clone(&ns);
            let sample = sample.clone();
            thread::spawn(move || ns.doctest(&sample).unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(doctest.invocations(), 1);
    assert_eq!(results.iter().filter(|r| !r.cached).count(), 1);
    assert!(results.iter().all(|r| r.text == results[0].text));
}

#[test]
fn test_distinct_files_render_in_parallel() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::slow_echo_doctest(temp_dir.path());
    let tree = SampleTree::new();
    let samples: Vec<_> = (0..4)
        .map(|i| tree.file(&format!("sample{}.zig", i), HELLO_ZIG))
        .collect();
    let ns = namespace(doctest_tools(&doctest));

    let start = Instant::now();
    let handles: Vec<_> = samples
        .into_iter()
        .map(|sample| {
            let ns = Arc::clone(&ns);
            thread::spawn(move || ns.doctest(&sample).unwrap())
        })
        .collect();
    for handle in handles {
        assert!(!handle.join().unwrap().cached);
    }

    // Four 300ms runs in sequence would take at least 1.2s
    assert!(start.elapsed() < Duration::from_millis(1100));
    assert_eq!(doctest.invocations(), 4);
}

// ============================================================================
// FAILURES
// ============================================================================

#[test]
fn test_tool_failure_carries_stderr() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::failing(temp_dir.path(), "doctest", "error: use of undeclared identifier");
    let tree = SampleTree::new();
    let sample = tree.file("broken.zig", BROKEN_ZIG);
    let ns = namespace(doctest_tools(&doctest));

    let err = ns.doctest(&sample).unwrap_err();

    match &err {
        DocError::ExternalTool {
            tool,
            stderr,
            timed_out,
            ..
        } => {
            assert_eq!(*tool, Tool::Doctest);
            assert_eq!(stderr, "error: use of undeclared identifier");
            assert!(!timed_out);
        }
        other => panic!("expected tool failure, got {:?}", other),
    }
    let message = err.to_string();
    assert!(message.starts_with("error executing doctest for ["));
    assert!(message.contains("error: use of undeclared identifier"));
}

#[test]
fn test_failures_retry_by_default() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::failing(temp_dir.path(), "doctest", "boom");
    let tree = SampleTree::new();
    let sample = tree.file("broken.zig", BROKEN_ZIG);
    let ns = namespace(doctest_tools(&doctest));

    assert!(ns.doctest(&sample).is_err());
    assert!(ns.doctest(&sample).is_err());
    assert_eq!(doctest.invocations(), 2);
}

#[test]
fn test_memoized_failures_replay() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::failing(temp_dir.path(), "doctest", "boom");
    let tree = SampleTree::new();
    let sample = tree.file("broken.zig", BROKEN_ZIG);
    let ns = namespace_with(
        doctest_tools(&doctest),
        FingerprintCache::with_policy(FailurePolicy::Memoize),
    );

    let first = ns.doctest(&sample).unwrap_err();
    let second = ns.doctest(&sample).unwrap_err();

    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(doctest.invocations(), 1);
}

#[test]
fn test_hung_tool_is_killed() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::sleeping(temp_dir.path(), "doctest");
    let tree = SampleTree::new();
    let sample = tree.file("hello.zig", HELLO_ZIG);
    let ns = namespace(ToolConfig {
        timeout_secs: Some(1),
        ..doctest_tools(&doctest)
    });

    let start = Instant::now();
    let err = ns.doctest(&sample).unwrap_err();

    assert!(matches!(err, DocError::ExternalTool { timed_out: true, .. }));
    assert!(err.to_string().contains("timed out"));
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
fn test_timeout_kills_tool_subprocesses() {
    let temp_dir = TempDir::new().unwrap();
    let marker = temp_dir.path().join("finished");
    let doctest = StubTool::script(
        temp_dir.path(),
        "doctest",
        &format!("sleep 6\necho done > '{}'", marker.display()),
    );
    let tree = SampleTree::new();
    let sample = tree.file("hello.zig", HELLO_ZIG);
    let ns = namespace(ToolConfig {
        timeout_secs: Some(1),
        ..doctest_tools(&doctest)
    });

    let start = Instant::now();
    let err = ns.doctest(&sample).unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, DocError::ExternalTool { timed_out: true, .. }));
    assert!(elapsed < Duration::from_secs(3), "call took {:?}", elapsed);

    // The shell was killed along with its child, so it never reached `echo`
    thread::sleep(Duration::from_secs(6));
    assert!(!marker.exists());
}

// ============================================================================
// DURABLE STORE
// ============================================================================

#[test]
fn test_disk_store_skips_tool_on_next_run() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::echo_doctest(temp_dir.path());
    let tree = SampleTree::new();
    let sample = tree.file("hello.zig", HELLO_ZIG);
    let store_dir = temp_dir.path().join(".zigdoc-cache");

    for expected_cached in [false, true] {
        let store = Arc::new(DiskStore::open(&store_dir).unwrap());
        let ns = namespace_with(doctest_tools(&doctest), FingerprintCache::new().with_store(store));
        assert_eq!(ns.doctest(&sample).unwrap().cached, expected_cached);
    }

    assert_eq!(doctest.invocations(), 1);
}

// ============================================================================
// WARMUP
// ============================================================================

#[test]
fn test_warmup_fills_shared_cache() {
    let temp_dir = TempDir::new().unwrap();
    let docgen = StubTool::echo_docgen(temp_dir.path());
    let compiler = StubTool::compiler(temp_dir.path());
    let tree = SampleTree::new();
    let first = tree.file("a.md", HELLO_MD);
    tree.file("b.md", HELLO_MD);
    tree.file("nested/c.md", HELLO_MD);
    tree.file("skip.zig", HELLO_ZIG);

    let ns = namespace(ToolConfig {
        docgen: Some(docgen.path().to_path_buf()),
        compiler: Some(compiler.path().to_path_buf()),
        ..ToolConfig::default()
    });

    let report = ns
        .start_warmup(WarmupOptions::new(tree.path(), Tool::Docgen).with_workers(2))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.discovered, 3);
    assert_eq!(report.rendered, 3);
    assert!(report.is_clean());
    assert_eq!(docgen.invocations(), 3);

    assert!(ns.docgen(&first).unwrap().cached);
    assert_eq!(docgen.invocations(), 3);
}

#[test]
fn test_warmup_and_render_share_in_flight_work() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::slow_echo_doctest(temp_dir.path());
    let tree = SampleTree::new();
    let samples: Vec<_> = (0..3)
        .map(|i| tree.file(&format!("s{}.zig", i), HELLO_ZIG))
        .collect();
    let ns = namespace(doctest_tools(&doctest));

    let handle = ns
        .start_warmup(WarmupOptions::new(tree.path(), Tool::Doctest).with_workers(3))
        .unwrap();
    for sample in &samples {
        ns.doctest(sample).unwrap();
    }
    let report = handle.join().unwrap();

    assert_eq!(report.succeeded(), 3);
    assert_eq!(doctest.invocations(), 3);
}

#[test]
fn test_warmup_reports_broken_samples() {
    let temp_dir = TempDir::new().unwrap();
    let doctest = StubTool::script(
        temp_dir.path(),
        "doctest",
        "case \"$3\" in *broken*) printf 'compile error' >&2; exit 1;; esac\nprintf '%s' \"$3\"",
    );
    let tree = SampleTree::new();
    tree.file("good.zig", HELLO_ZIG);
    tree.file("broken.zig", BROKEN_ZIG);
    let ns = namespace(doctest_tools(&doctest));

    let report = ns
        .start_warmup(WarmupOptions::new(tree.path(), Tool::Doctest))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.rendered, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("broken.zig"));
    assert_eq!(report.failures[0].diagnostics.as_deref(), Some("compile error"));
}
