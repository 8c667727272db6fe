//! Sandboxed execution of untrusted code units.
//!
//! Each execution is scanned statically, then run in a fresh child process
//! inside its own scratch directory with hard resource ceilings. The child is
//! killed when the execution future is dropped and the scratch directory is
//! removed on every exit path.

use crate::config::{NetworkIsolation, SandboxConfig};
use crate::scan::StaticScanner;
use figura_core::error::{FiguraError, ViolationKind};
use figura_core::types::{truncate, ExecutionResult, ERROR_DETAIL_LIMIT};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Semaphore;

/// Interpreter messages that indicate the address-space ceiling was hit
const MEMORY_MARKERS: &[&str] = &[
    "MemoryError",
    "Cannot allocate memory",
    "std::bad_alloc",
    "out of memory",
];

/// Runs code units in isolated child processes.
#[derive(Debug)]
pub struct SandboxExecutor {
    config: Arc<SandboxConfig>,
    scanner: StaticScanner,
    slots: Semaphore,
    spawned: AtomicU64,
    network_isolated: bool,
}

impl SandboxExecutor {
    /// Create an executor, compiling the scan rules once
    pub fn new(config: SandboxConfig) -> Result<Self, FiguraError> {
        if config.interpreter.trim().is_empty() {
            return Err(FiguraError::configuration("sandbox interpreter is empty"));
        }
        for name in [&config.output_file, &config.script_name] {
            if !is_plain_file_name(name) {
                return Err(FiguraError::configuration(format!(
                    "sandbox file name must be a plain file name: {:?}",
                    name
                )));
            }
        }

        let scanner = StaticScanner::new(&config.rules)?;
        let network_isolated = match config.network {
            NetworkIsolation::Disabled => false,
            NetworkIsolation::BestEffort => match probe_network_namespace() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        "network namespaces unavailable ({}); sandbox children keep host networking",
                        e
                    );
                    false
                }
            },
            NetworkIsolation::Required => {
                probe_network_namespace().map_err(|e| {
                    FiguraError::unavailable(format!(
                        "network isolation is required but namespaces are unavailable: {}",
                        e
                    ))
                })?;
                true
            }
        };

        Ok(Self {
            slots: Semaphore::new(config.process_slots.max(1)),
            config: Arc::new(config),
            scanner,
            spawned: AtomicU64::new(0),
            network_isolated,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Whether children run in their own network namespace
    pub fn network_isolated(&self) -> bool {
        self.network_isolated
    }

    /// Number of child processes spawned so far
    pub fn spawned_processes(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Run `code` as the whole script
    pub async fn execute(
        &self,
        code: &str,
        timeout: Duration,
        memory_limit_bytes: u64,
    ) -> ExecutionResult {
        self.execute_script(code, code, timeout, memory_limit_bytes)
            .await
    }

    /// Scan `untrusted`, then run `script`, which embeds it between trusted
    /// setup and teardown code.
    pub async fn execute_script(
        &self,
        untrusted: &str,
        script: &str,
        timeout: Duration,
        memory_limit_bytes: u64,
    ) -> ExecutionResult {
        self.scanner.check(untrusted)?;

        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| FiguraError::unavailable("sandbox process pool is closed"))?;

        let scratch = self.scratch_dir()?;
        let result = self
            .run_in(scratch.path(), script, timeout, memory_limit_bytes)
            .await;

        let path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            tracing::warn!("failed to remove scratch directory {}: {}", path.display(), e);
        }

        result
    }

    fn scratch_dir(&self) -> std::io::Result<TempDir> {
        match &self.config.scratch_root {
            Some(root) => tempfile::Builder::new().prefix("figura-").tempdir_in(root),
            None => tempfile::Builder::new().prefix("figura-").tempdir(),
        }
    }

    async fn run_in(
        &self,
        dir: &Path,
        script: &str,
        timeout: Duration,
        memory_limit_bytes: u64,
    ) -> ExecutionResult {
        let config = &self.config;
        tokio::fs::write(dir.join(&config.script_name), script).await?;
        let output_path = dir.join(&config.output_file);

        let mut cmd = Command::new(&config.interpreter);
        cmd.args(&config.interpreter_args)
            .arg(&config.script_name)
            .current_dir(dir)
            .env_clear()
            .env("PATH", &config.path_env)
            .env("HOME", dir)
            .env("TMPDIR", dir)
            .env("MPLCONFIGDIR", dir)
            .env("MPLBACKEND", "Agg")
            .env("OUTPUT_PATH", &output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let limits = ChildLimits {
                memory_bytes: memory_limit_bytes,
                cpu_secs: config.cpu_limit_for(timeout),
                file_bytes: config.max_file_bytes,
                isolate_network: self.network_isolated,
            };
            // SAFETY: the hook only issues async-signal-safe syscalls.
            unsafe {
                cmd.pre_exec(move || apply_limits(&limits));
            }
        }
        #[cfg(not(unix))]
        let _ = memory_limit_bytes;

        self.spawned.fetch_add(1, Ordering::Relaxed);
        let mut child = cmd.spawn().map_err(|e| {
            FiguraError::unavailable(format!(
                "failed to spawn sandbox interpreter {}: {}",
                config.interpreter, e
            ))
        })?;
        tracing::debug!(
            "sandbox child spawned: pid={:?}, dir={}, timeout={:?}",
            child.id(),
            dir.display(),
            timeout
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = config.stderr_limit;
        let run = async {
            tokio::join!(
                child.wait(),
                read_capped(stdout, limit),
                read_capped(stderr, limit)
            )
        };
        let outcome = tokio::time::timeout(timeout, run).await;

        let (status, stdout, stderr) = match outcome {
            Ok(finished) => finished,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("failed to kill timed out sandbox child: {}", e);
                }
                return Err(FiguraError::sandbox_violation(
                    ViolationKind::Timeout,
                    format!("execution exceeded {:?}", timeout),
                ));
            }
        };
        let status = status?;

        let stderr = String::from_utf8_lossy(&stderr);
        if !stdout.is_empty() {
            tracing::debug!("sandbox stdout: {}", String::from_utf8_lossy(&stdout));
        }
        if !stderr.trim().is_empty() {
            tracing::debug!("sandbox stderr: {}", stderr);
        }

        if let Some(err) = classify_exit(status, &stderr) {
            return Err(err);
        }

        read_output(&output_path, &config.output_file).await
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

/// Read up to `cap` bytes, then drain the rest so the child never blocks on
/// a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return buf;
    };
    let _ = (&mut reader).take(cap as u64).read_to_end(&mut buf).await;
    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    buf
}

/// Map a failed exit to the error taxonomy; `None` for success
fn classify_exit(status: ExitStatus, stderr: &str) -> Option<FiguraError> {
    if status.success() {
        return None;
    }

    let last_line = last_meaningful_line(stderr);

    // Only the final line names the error that ended the process.
    if let Some(line) = last_line.filter(|l| MEMORY_MARKERS.iter().any(|m| l.contains(m))) {
        return Some(FiguraError::sandbox_violation(
            ViolationKind::MemoryLimit,
            truncate(line, ERROR_DETAIL_LIMIT),
        ));
    }
    let last_line = last_line.map(|l| truncate(l, ERROR_DETAIL_LIMIT));

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return Some(match signal {
                libc::SIGXCPU | libc::SIGKILL => FiguraError::sandbox_violation(
                    ViolationKind::Timeout,
                    format!("cpu time limit exceeded (signal {})", signal),
                ),
                libc::SIGXFSZ => FiguraError::render("file size limit exceeded"),
                _ => FiguraError::render(format!("terminated by signal {}", signal)),
            });
        }
    }

    Some(FiguraError::render(
        last_line.unwrap_or_else(|| format!("process {}", status)),
    ))
}

fn last_meaningful_line(stderr: &str) -> Option<&str> {
    stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

async fn read_output(path: &Path, name: &str) -> ExecutionResult {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FiguraError::no_output(format!(
                "script finished without writing {}",
                name
            )));
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_file() {
        return Err(FiguraError::no_output(format!(
            "{} is not a regular file",
            name
        )));
    }

    let bytes = tokio::fs::read(path).await?;
    if bytes.is_empty() {
        return Err(FiguraError::no_output(format!("{} is empty", name)));
    }
    Ok(bytes)
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
struct ChildLimits {
    memory_bytes: u64,
    cpu_secs: u64,
    file_bytes: u64,
    isolate_network: bool,
}

#[cfg(unix)]
macro_rules! set_rlimit {
    ($resource:expr, $value:expr) => {{
        let value = $value as libc::rlim_t;
        let limit = libc::rlimit {
            rlim_cur: value,
            rlim_max: value,
        };
        if libc::setrlimit($resource, &limit) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }};
}

/// Runs in the forked child before exec.
#[cfg(unix)]
fn apply_limits(limits: &ChildLimits) -> std::io::Result<()> {
    unsafe {
        set_rlimit!(libc::RLIMIT_CPU, limits.cpu_secs);
        #[cfg(any(target_os = "linux", target_os = "android"))]
        set_rlimit!(libc::RLIMIT_AS, limits.memory_bytes);
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let _ = limits.memory_bytes;
        set_rlimit!(libc::RLIMIT_FSIZE, limits.file_bytes);
        set_rlimit!(libc::RLIMIT_CORE, 0);
    }

    if limits.isolate_network {
        enter_network_namespace()?;
    }
    Ok(())
}

/// Check once, in a forked throwaway child, that this host lets an
/// unprivileged process create user and network namespaces.
#[cfg(target_os = "linux")]
fn probe_network_namespace() -> std::io::Result<()> {
    // SAFETY: the forked child only calls unshare and _exit.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if pid == 0 {
        let code = match enter_network_namespace() {
            Ok(()) => 0,
            Err(_) => 1,
        };
        unsafe { libc::_exit(code) };
    }

    let mut status = 0;
    loop {
        if unsafe { libc::waitpid(pid, &mut status, 0) } == pid {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "unshare(CLONE_NEWUSER | CLONE_NEWNET) was refused",
        ))
    }
}

#[cfg(not(target_os = "linux"))]
fn probe_network_namespace() -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

/// Move the child into fresh user and network namespaces: only a downed
/// loopback interface is visible afterwards.
#[cfg(target_os = "linux")]
fn enter_network_namespace() -> std::io::Result<()> {
    if unsafe { libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn enter_network_namespace() -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}
