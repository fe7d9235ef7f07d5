use shellish::command::status;
use shellish::{Config, Interpreter};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

static FORK_LOCK: Mutex<()> = Mutex::new(());

/// Tests here fork and some change the working directory; run them one at a time.
fn serial() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn shell(dir: &Path) -> Interpreter {
    Interpreter::new(Config::default().with_chat_root(dir))
}

fn wait_for_file(path: &Path, timeout: Duration) -> Option<String> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(content) = fs::read_to_string(path) {
            if !content.is_empty() {
                return Some(content);
            }
        }
        thread::sleep(Duration::from_millis(20));
    }
    None
}

#[test]
fn echo_through_tr_into_file() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let mut sh = shell(dir.path());

    let code = sh.run_line(&format!("echo hi | tr a-z A-Z > {}", out.display()));
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "HI\n");
}

#[test]
fn three_stage_pipeline_sees_every_byte() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("sorted.txt");
    let mut sh = shell(dir.path());

    let code = sh.run_line(&format!(
        "printf 'b\\na\\nc\\n' | sort | head -n 2 > {}",
        out.display()
    ));
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "a\nb\n");
}

#[test]
fn input_redirect_feeds_file_bytes() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let out = dir.path().join("copy.txt");
    fs::write(&input, "line one\nline two\n").unwrap();
    let mut sh = shell(dir.path());

    let code = sh.run_line(&format!("cat < {} > {}", input.display(), out.display()));
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "line one\nline two\n");
}

#[test]
fn truncate_then_append() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log.txt");
    let mut sh = shell(dir.path());

    sh.run_line(&format!("echo stale > {}", log.display()));
    sh.run_line(&format!("echo first > {}", log.display()));
    sh.run_line(&format!("echo second >> {}", log.display()));
    sh.run_line(&format!("echo third >>{}", log.display()));
    assert_eq!(fs::read_to_string(&log).unwrap(), "first\nsecond\nthird\n");
}

#[test]
fn output_redirect_overrides_the_pipe() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("f.txt");
    let second = dir.path().join("g.txt");
    let mut sh = shell(dir.path());

    let code = sh.run_line(&format!(
        "echo hi > {} | cat > {}",
        first.display(),
        second.display()
    ));
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&first).unwrap(), "hi\n");
    assert_eq!(fs::read_to_string(&second).unwrap(), "");
}

#[test]
fn append_wins_over_truncate_on_the_same_stage() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let truncated = dir.path().join("a.txt");
    let appended = dir.path().join("b.txt");
    let mut sh = shell(dir.path());

    let code = sh.run_line(&format!(
        "echo x > {} >> {}",
        truncated.display(),
        appended.display()
    ));
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&truncated).unwrap(), "");
    assert_eq!(fs::read_to_string(&appended).unwrap(), "x\n");
}

#[test]
fn redirect_failure_only_affects_its_stage() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.txt");
    let out = dir.path().join("out.txt");
    let mut sh = shell(dir.path());

    let code = sh.run_line(&format!(
        "cat < {} | echo still here > {}",
        missing.display(),
        out.display()
    ));
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "still here\n");

    assert_eq!(
        sh.run_line(&format!("cat < {}", missing.display())),
        status::FAILURE
    );
}

#[test]
fn unknown_command_reports_127_and_shell_continues() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let mut sh = shell(dir.path());

    assert_eq!(sh.run_line("no-such-program-anywhere --flag"), 127);
    assert_eq!(sh.run_line("true"), 0);
    assert!(!sh.should_exit());
}

#[test]
fn background_returns_before_the_work_is_done() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("done.txt");
    let mut sh = shell(dir.path());

    let started = Instant::now();
    let code = sh.run_line(&format!(
        "sh -c 'sleep 0.3; echo done > {}' &",
        marker.display()
    ));
    assert_eq!(code, 0);
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(!marker.exists());

    let content = wait_for_file(&marker, Duration::from_secs(5));
    assert_eq!(content.as_deref(), Some("done\n"));
}

#[test]
fn sleeping_in_background_does_not_block() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let mut sh = shell(dir.path());

    let started = Instant::now();
    assert_eq!(sh.run_line("sleep 5 &"), 0);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn cd_affects_later_lines() {
    let _guard = serial();
    let orig = env::current_dir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let canonical = fs::canonicalize(dir.path()).unwrap();
    let mut sh = shell(dir.path());

    assert_eq!(sh.run_line(&format!("cd {}", canonical.display())), 0);
    assert_eq!(sh.run_line("pwd > where.txt"), 0);
    let recorded = fs::read_to_string(canonical.join("where.txt")).unwrap();
    assert_eq!(recorded.trim_end(), canonical.to_str().unwrap());

    assert_eq!(sh.run_line("cd does-not-exist"), 1);
    assert_eq!(sh.run_line("pwd > again.txt"), 0);
    let recorded = fs::read_to_string(canonical.join("again.txt")).unwrap();
    assert_eq!(recorded.trim_end(), canonical.to_str().unwrap());

    env::set_current_dir(orig).unwrap();
}

#[test]
fn empty_stage_is_rejected_without_running_anything() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("never.txt");
    let mut sh = shell(dir.path());

    let code = sh.run_line(&format!("echo hi > {} | | wc", out.display()));
    assert_eq!(code, 2);
    assert!(!out.exists());
}

#[test]
fn exit_stops_the_shell() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let mut sh = shell(dir.path());

    assert_eq!(sh.run_line("exit"), 1);
    assert!(sh.should_exit());
}
