/// Sandbox Runner - Isolated Process Execution
///
/// **Core Responsibility:**
/// Execute one command (compile or run) with strict isolation and resource
/// accounting, and report raw results.
///
/// **Critical Architectural Boundary:**
/// - The sandbox knows HOW to execute (workspace, limits, deadlines)
/// - The sandbox does NOT evaluate correctness
/// - The sandbox returns raw outputs for the harness to judge
///
/// **Isolation Rules:**
/// 1. Every execution gets a fresh, disposable working directory
/// 2. The child runs in its own process group with a cleared environment
/// 3. Memory is capped via rlimits; the deadline kills the whole group
/// 4. stdout/stderr are captured incrementally up to a byte cap
/// 5. The workspace is removed on every exit path
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tempfile::{Builder, TempDir};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::EngineError;

/// Cap on any single file the sandboxed process may write.
const MAX_FILE_BYTES: u64 = 256 * 1024 * 1024;
/// Process/thread cap for the sandboxed user; generous enough for JVM-style
/// runtimes, small enough to stop fork bombs.
const MAX_PROCESSES: u64 = 512;

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// One command to execute under sandbox constraints.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub argv: Vec<String>,
    pub workdir: PathBuf,
    pub stdin: String,
    pub time_limit: Duration,
    pub memory_limit_mb: u64,
    pub max_output_bytes: usize,
}

/// Raw result of one sandboxed execution. `exit_code` is `None` when the
/// process was killed before exiting.
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub memory_exceeded: bool,
}

/// Disposable per-execution working directory.
///
/// Removal is guaranteed on every exit path (success, failure, deadline
/// kill) by the `TempDir` drop guard.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create() -> Result<Self, EngineError> {
        let dir = Builder::new()
            .prefix(&format!("arbiter-{}", Uuid::new_v4()))
            .tempdir()
            .map_err(|e| {
                EngineError::internal(format!("failed to create sandbox workspace: {}", e))
            })?;
        debug!(workspace = %dir.path().display(), "created sandbox workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub async fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf, EngineError> {
        let path = self.dir.path().join(name);
        tokio::fs::write(&path, contents).await.map_err(|e| {
            EngineError::internal(format!("failed to stage {} in workspace: {}", name, e))
        })?;
        Ok(path)
    }
}

/// Execute one command under the sandbox constraints.
///
/// Inability to spawn (missing toolchain, OS resource exhaustion) is an
/// `EngineError::Internal`; failures of the program itself come back inside
/// `SandboxOutput`.
pub async fn run(request: &SandboxRequest) -> Result<SandboxOutput, EngineError> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| EngineError::internal("empty sandbox command"))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&request.workdir)
        .env_clear()
        .env("PATH", SANDBOX_PATH)
        .env("HOME", &request.workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let memory_bytes = request.memory_limit_mb.saturating_mul(1024 * 1024);
    // Prebuilt before fork: the pre_exec hook must not allocate.
    #[cfg(target_os = "linux")]
    let uid_map = format!("{0} {0} 1", unsafe { libc::getuid() }).into_bytes();
    #[cfg(target_os = "linux")]
    let gid_map = format!("{0} {0} 1", unsafe { libc::getgid() }).into_bytes();
    unsafe {
        command.pre_exec(move || {
            // Own process group, so the deadline kill reaps the whole tree.
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            // Best effort: a fresh user namespace (self-mapped) grants the
            // capability to enter a network namespace with no interfaces.
            // Kernels that forbid unprivileged user namespaces leave the
            // process in the host network namespace.
            #[cfg(target_os = "linux")]
            if libc::unshare(libc::CLONE_NEWUSER) == 0 {
                let _ = write_raw(b"/proc/self/setgroups\0", b"deny");
                let _ = write_raw(b"/proc/self/uid_map\0", &uid_map);
                let _ = write_raw(b"/proc/self/gid_map\0", &gid_map);
                let _ = libc::unshare(libc::CLONE_NEWNET);
            }
            set_rlimit(libc::RLIMIT_AS, memory_bytes)?;
            set_rlimit(libc::RLIMIT_CORE, 0)?;
            set_rlimit(libc::RLIMIT_FSIZE, MAX_FILE_BYTES)?;
            set_rlimit(libc::RLIMIT_NPROC, MAX_PROCESSES)?;
            Ok(())
        });
    }

    let start = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|e| EngineError::internal(format!("failed to spawn `{}`: {}", program, e)))?;
    let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

    let stdin_pipe = child.stdin.take();
    let stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::internal("child stdout not captured"))?;
    let stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| EngineError::internal("child stderr not captured"))?;

    // The stdin feed runs under the same deadline as the reads: a program
    // that never consumes its input must not stall the engine.
    let feed_stdin = async {
        if let Some(mut stdin) = stdin_pipe {
            // A broken pipe just means the program never read its input.
            if let Err(e) = stdin.write_all(request.stdin.as_bytes()).await {
                debug!(error = %e, "stdin write incomplete");
            }
            // Dropping the handle closes the pipe so the program sees EOF.
        }
    };

    let cap = request.max_output_bytes;
    let outcome = tokio::time::timeout(request.time_limit, async {
        let (_, stdout, stderr, status) = tokio::join!(
            feed_stdin,
            read_capped(stdout_pipe, cap),
            read_capped(stderr_pipe, cap),
            child.wait(),
        );
        (stdout, stderr, status)
    })
    .await;

    let mut timed_out = false;
    let (stdout, mut stderr, status) = match outcome {
        Ok((stdout, stderr, status)) => {
            let status = status.map_err(|e| {
                EngineError::internal(format!("failed to reap sandboxed process: {}", e))
            })?;
            let (stdout, stdout_truncated) = stdout?;
            let (stderr, stderr_truncated) = stderr?;
            if stdout_truncated || stderr_truncated {
                debug!(cap, "sandbox output truncated at capture cap");
            }
            (stdout, stderr, Some(status))
        }
        Err(_) => {
            // Deadline hit: kill the whole process group, then reap.
            timed_out = true;
            warn!(
                time_limit_ms = request.time_limit.as_millis() as u64,
                "execution deadline exceeded, killing process group"
            );
            if let Some(pgid) = pgid {
                if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                    warn!(error = %e, "failed to kill timed-out process group");
                }
            }
            let _ = child.wait().await;
            (String::new(), String::from("[execution timed out]"), None)
        }
    };

    let execution_time_ms = start.elapsed().as_millis() as u64;

    let mut memory_exceeded = false;
    let exit_code = match status {
        Some(status) => {
            if let Some(code) = status.code() {
                // 137 shows up when a shell wrapper relays a SIGKILL death.
                if code == 137 {
                    memory_exceeded = true;
                    stderr.push_str("\n[killed: memory limit exceeded]");
                }
                Some(code)
            } else {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    match status.signal() {
                        Some(sig) if sig == libc::SIGKILL => {
                            memory_exceeded = true;
                            stderr.push_str("\n[killed: memory limit exceeded]");
                        }
                        Some(sig) if sig == libc::SIGSEGV => {
                            stderr.push_str("\n[segmentation fault]");
                        }
                        _ => {}
                    }
                }
                None
            }
        }
        None => None,
    };

    if !memory_exceeded && !timed_out && looks_like_oom(&stderr) {
        memory_exceeded = true;
    }

    Ok(SandboxOutput {
        exit_code,
        stdout,
        stderr,
        execution_time_ms,
        timed_out,
        memory_exceeded,
    })
}

/// Allocation-failure signatures the common runtimes print when the rlimit
/// denies them memory.
fn looks_like_oom(stderr: &str) -> bool {
    stderr.contains("MemoryError")
        || stderr.contains("OutOfMemoryError")
        || stderr.contains("bad_alloc")
        || stderr.contains("Killed")
}

/// Read a pipe to EOF, keeping at most `cap` bytes. Draining continues past
/// the cap so the child never blocks on a full pipe.
async fn read_capped<R>(mut pipe: R, cap: usize) -> io::Result<(String, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut collected: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if collected.len() < cap {
            let take = n.min(cap - collected.len());
            collected.extend_from_slice(&chunk[..take]);
            if take < n {
                truncated = true;
            }
        } else {
            truncated = true;
        }
    }
    Ok((String::from_utf8_lossy(&collected).into_owned(), truncated))
}

/// Raw write for use between fork and exec; open/write/close are
/// async-signal-safe, unlike the std file API.
#[cfg(target_os = "linux")]
fn write_raw(path: &[u8], data: &[u8]) -> io::Result<()> {
    let fd = unsafe { libc::open(path.as_ptr() as *const libc::c_char, libc::O_WRONLY) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
    unsafe { libc::close(fd) };
    if written < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(not(target_os = "linux"))]
type RlimitResource = libc::c_int;

fn set_rlimit(resource: RlimitResource, limit: u64) -> io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: limit,
        rlim_max: limit,
    };
    if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(workdir: &Path, script: &str) -> SandboxRequest {
        SandboxRequest {
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            workdir: workdir.to_path_buf(),
            stdin: String::new(),
            time_limit: Duration::from_secs(5),
            memory_limit_mb: 256,
            max_output_bytes: 64 * 1024,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let ws = Workspace::create().unwrap();
        let out = run(&sh(ws.path(), "echo hello")).await.unwrap();

        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout, "hello\n");
        assert!(!out.timed_out);
        assert!(!out.memory_exceeded);
    }

    #[tokio::test]
    async fn feeds_stdin_to_the_child() {
        let ws = Workspace::create().unwrap();
        let mut request = sh(ws.path(), "cat");
        request.stdin = "ping".to_string();

        let out = run(&request).await.unwrap();
        assert_eq!(out.stdout, "ping");
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn reports_nonzero_exit_and_stderr() {
        let ws = Workspace::create().unwrap();
        let out = run(&sh(ws.path(), "echo oops >&2; exit 3")).await.unwrap();

        assert_eq!(out.exit_code, Some(3));
        assert!(out.stderr.contains("oops"));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn enforces_the_wall_clock_deadline() {
        let ws = Workspace::create().unwrap();
        let mut request = sh(ws.path(), "sleep 5");
        request.time_limit = Duration::from_secs(1);

        let out = run(&request).await.unwrap();
        assert!(out.timed_out);
        assert!(out.execution_time_ms >= 1000);
        assert_eq!(out.exit_code, None);
    }

    #[tokio::test]
    async fn caps_runaway_output() {
        let ws = Workspace::create().unwrap();
        let mut request = sh(ws.path(), "head -c 100000 /dev/zero | tr '\\0' x");
        request.max_output_bytes = 4096;

        let out = run(&request).await.unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout.len(), 4096);
    }

    #[tokio::test]
    async fn runs_in_the_given_workspace() {
        let ws = Workspace::create().unwrap();
        ws.write_file("marker.txt", "present").await.unwrap();

        let out = run(&sh(ws.path(), "cat marker.txt")).await.unwrap();
        assert_eq!(out.stdout, "present");
    }

    #[tokio::test]
    async fn spawn_failure_is_an_internal_error() {
        let ws = Workspace::create().unwrap();
        let mut request = sh(ws.path(), "irrelevant");
        request.argv = vec!["definitely-not-a-real-binary-9f2c".to_string()];

        match run(&request).await {
            Err(EngineError::Internal(msg)) => assert!(msg.contains("spawn")),
            other => panic!("expected Internal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn workspace_is_removed_on_drop() {
        let path;
        {
            let ws = Workspace::create().unwrap();
            ws.write_file("data.txt", "x").await.unwrap();
            path = ws.path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
