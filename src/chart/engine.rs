//! Chart engine seam and the external-command engine.
//!
//! The engine owns the astrology: it computes a subject (sign placements)
//! and writes a rendered chart file somewhere under a target directory,
//! under a file name it chooses but that carries the target tag.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use super::types::{ChartSubject, EngineError, RenderTarget, SubjectRequest};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STDERR_PREVIEW_CHARS: usize = 500;

pub trait ChartEngine: Send + Sync {
    fn compute(&self, request: &SubjectRequest) -> Result<ChartSubject, EngineError>;
    fn render(&self, subject: &ChartSubject, target: &RenderTarget) -> Result<(), EngineError>;
}

/// Runs an external program once per operation, JSON on stdin.
///
/// `<program> <args..> compute` must print a [`ChartSubject`] as JSON.
/// `<program> <args..> render` receives `{"subject": .., "target": ..}` and
/// writes its chart into `target.dir`.
#[derive(Debug, Clone)]
pub struct CommandChartEngine {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct RenderPayload<'a> {
    subject: &'a ChartSubject,
    target: &'a RenderTarget,
}

impl CommandChartEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self { program: program.into(), args, timeout }
    }

    fn invoke(&self, operation: &str, input: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(operation)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            command: self.program.clone(),
            source,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // an engine may exit without reading its input; its status tells the story
            if let Err(e) = stdin.write_all(input) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
            }
        }

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_with_deadline(&mut child, self.timeout)?;
        let stdout = join_drain(stdout)?;
        let stderr = join_drain(stderr)?;

        debug!(
            operation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            status = %status,
            "chart engine finished"
        );

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(EngineError::Failed {
                status: status.to_string(),
                stderr: stderr.chars().take(STDERR_PREVIEW_CHARS).collect(),
            });
        }
        Ok(stdout)
    }
}

impl ChartEngine for CommandChartEngine {
    fn compute(&self, request: &SubjectRequest) -> Result<ChartSubject, EngineError> {
        let input = serde_json::to_vec(request).map_err(|e| EngineError::InvalidOutput(e.to_string()))?;
        let stdout = self.invoke("compute", &input)?;
        serde_json::from_slice(&stdout).map_err(|e| EngineError::InvalidOutput(e.to_string()))
    }

    fn render(&self, subject: &ChartSubject, target: &RenderTarget) -> Result<(), EngineError> {
        let input = serde_json::to_vec(&RenderPayload { subject, target })
            .map_err(|e| EngineError::InvalidOutput(e.to_string()))?;
        self.invoke("render", &input).map(|_| ())
    }
}

type Drain = Option<thread::JoinHandle<std::io::Result<Vec<u8>>>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join_drain(handle: Drain) -> Result<Vec<u8>, EngineError> {
    match handle {
        Some(h) => h
            .join()
            .map_err(|_| EngineError::InvalidOutput("pipe reader panicked".into()))?
            .map_err(EngineError::Io),
        None => Ok(Vec::new()),
    }
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<std::process::ExitStatus, EngineError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Timeout(timeout.as_secs()));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sh(script: &str, timeout: Duration) -> CommandChartEngine {
        // `sh -c <script> <operation>`: the operation lands in $0
        CommandChartEngine::new("sh", vec!["-c".into(), script.into()], timeout)
    }

    fn request() -> SubjectRequest {
        SubjectRequest {
            name: "Neo".into(),
            year: 1989,
            month: 11,
            day: 11,
            hour: 11,
            minute: 57,
            city: "Beijing".into(),
            lat: 39.9042,
            lng: 116.4074,
            tz_str: "Asia/Shanghai".into(),
            online: false,
        }
    }

    #[test]
    fn test_compute_parses_stdout() {
        let engine = sh(
            r#"cat >/dev/null; echo '{"name":"Neo","placements":{"sun":"Sco"}}'"#,
            Duration::from_secs(5),
        );
        let subject = engine.compute(&request()).unwrap();
        assert_eq!(subject.placements.get("sun").map(String::as_str), Some("Sco"));
    }

    #[test]
    fn test_operation_is_passed() {
        let engine = sh(r#"cat >/dev/null; echo "{\"name\":\"$0\",\"placements\":{}}""#, Duration::from_secs(5));
        assert_eq!(engine.compute(&request()).unwrap().name, "compute");
    }

    #[test]
    fn test_nonzero_exit_reports_stderr() {
        let engine = sh("cat >/dev/null; echo 'ephemeris missing' >&2; exit 3", Duration::from_secs(5));
        match engine.compute(&request()) {
            Err(EngineError::Failed { stderr, .. }) => assert!(stderr.contains("ephemeris missing")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_output() {
        let engine = sh("cat >/dev/null; echo not-json", Duration::from_secs(5));
        assert!(matches!(engine.compute(&request()), Err(EngineError::InvalidOutput(_))));
    }

    #[test]
    fn test_timeout_kills_child() {
        let engine = sh("sleep 5", Duration::from_millis(200));
        let started = Instant::now();
        assert!(matches!(engine.compute(&request()), Err(EngineError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program() {
        let engine = CommandChartEngine::new("/nonexistent/chart-engine", vec![], Duration::from_secs(1));
        assert!(matches!(engine.compute(&request()), Err(EngineError::Spawn { .. })));
    }

    #[test]
    fn test_render_receives_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let payload_path = dir.path().join("payload.json");
        let engine = sh(&format!("cat > '{}'", payload_path.display()), Duration::from_secs(5));

        let subject = ChartSubject { name: "Neo".into(), placements: BTreeMap::new() };
        let target = RenderTarget { dir: dir.path().to_path_buf(), tag: "abc123".into(), theme: "dark".into() };
        engine.render(&subject, &target).unwrap();

        let payload: serde_json::Value = serde_json::from_slice(&std::fs::read(&payload_path).unwrap()).unwrap();
        assert_eq!(payload["target"]["tag"], "abc123");
        assert_eq!(payload["target"]["theme"], "dark");
        assert_eq!(payload["subject"]["name"], "Neo");
    }
}
