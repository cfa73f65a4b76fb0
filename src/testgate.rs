//! Test gate — runs the configured validation command with a hard timeout.
//!
//! Pass/fail only. Rollback on failure is the pipeline's job, not ours.

use std::path::Path;
use std::time::Duration;

/// Maximum captured output kept for the journal (16 KB).
const MAX_CAPTURE_BYTES: usize = 16_384;

#[derive(Debug, Clone)]
pub struct TestVerdict {
    pub passed: bool,
    pub output: String,
}

/// Run `command` under `sh -c` in `workdir`. Exit code 0 before the deadline
/// is a pass; a timeout kills the process and counts as failure. Spawn
/// failures are failures, never errors.
pub async fn run(command: &str, timeout: Duration, workdir: &Path) -> TestVerdict {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workdir)
        .kill_on_drop(true);

    let result = tokio::time::timeout(timeout, cmd.output()).await;

    match result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut combined = String::with_capacity(stdout.len() + stderr.len() + 1);
            combined.push_str(&stdout);
            if !stderr.is_empty() {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(&stderr);
            }
            TestVerdict {
                passed: output.status.success(),
                output: truncate_for_journal(combined),
            }
        }
        Ok(Err(e)) => TestVerdict {
            passed: false,
            output: format!("failed to spawn test command: {e}"),
        },
        Err(_) => TestVerdict {
            passed: false,
            output: format!(
                "test command timed out after {}s and was killed",
                timeout.as_secs()
            ),
        },
    }
}

fn truncate_for_journal(mut output: String) -> String {
    if output.len() > MAX_CAPTURE_BYTES {
        let mut cut = MAX_CAPTURE_BYTES;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        output.push_str("\n... [output truncated]");
    }
    output
}
