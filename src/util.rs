use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::Command;
use std::thread::sleep;
use std::time::Duration;

static INIT_ONCE: std::sync::Once = std::sync::Once::new();
pub fn init_tracing_once() {
    INIT_ONCE.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}

/// `1234567` -> `"1,234,567"`; used in progress/checkpoint log lines.
pub fn fmt_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

// -------- retry policy shared by the blob boundary and local scratch files --------

/// Bounded exponential backoff: `base * 2^i`, capped at `max`, for at most `attempts` tries.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts; handy in tests.
    pub fn immediate(attempts: usize) -> Self {
        Self { attempts, base_delay: Duration::ZERO, max_delay: Duration::ZERO }
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16) as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or attempts run out.
    /// Returns the last error together with the number of attempts made.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut() -> std::result::Result<T, E>,
        retriable: impl Fn(&E) -> bool,
    ) -> std::result::Result<T, (E, usize)> {
        let attempts = self.attempts.max(1);
        let mut i = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if retriable(&e) && i + 1 < attempts => {
                    sleep(self.delay_for(i));
                    i += 1;
                }
                Err(e) => return Err((e, i + 1)),
            }
        }
    }
}

/// Return true for transient/retriable I/O errors: timeouts and interrupted calls anywhere,
/// plus the Windows sharing/AV/device codes seen on USB/NAS volumes.
pub fn is_retriable_io_error(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    // 5 access denied (AV/share), 21 device not ready, 32 sharing violation,
    // 33 lock violation, 225 AV blocked, 433 missing device, 1006 volume altered,
    // 1117 I/O device error, 1224 user-mapped section open.
    // Unix reuses these numbers for EIO, EISDIR and EPIPE, which are permanent.
    cfg!(windows)
        && matches!(
            e.raw_os_error(),
            Some(5) | Some(21) | Some(32) | Some(33) | Some(225) | Some(433) | Some(1006) | Some(1117) | Some(1224)
        )
}

fn fs_backoff<T>(label: &str, path: &Path, op: impl FnMut() -> io::Result<T>) -> Result<T> {
    let policy = RetryPolicy {
        attempts: 16,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(2),
    };
    policy
        .run(op, is_retriable_io_error)
        .map_err(|(e, _)| e)
        .with_context(|| format!("{label} {}", path.display()))
}

/// Create (truncate) a scratch file, retrying transient failures.
pub fn create_with_backoff(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
    }
    fs_backoff("create", path, || File::create(path))
}

/// Remove a file, retrying transient failures. Succeeds if the file doesn't exist.
pub fn remove_with_backoff(path: &Path) -> Result<()> {
    fs_backoff("remove", path, || match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    })
}

/// Atomically replace `dest` with `tmp`. If rename keeps failing (sharing violations),
/// fall back to copy+remove.
pub fn replace_file_atomic_backoff(tmp: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
    }
    match fs_backoff("rename", tmp, || fs::rename(tmp, dest)) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs_backoff("copy", tmp, || fs::copy(tmp, dest))?;
            remove_with_backoff(tmp)
        }
    }
}

/// Write `bytes` to `dest` through a sibling temp file and an atomic rename.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;
    let mut tmp_name = dest.file_name().map(|s| s.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = dest.with_file_name(tmp_name);
    {
        let mut f = create_with_backoff(&tmp)?;
        f.write_all(bytes).with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all().with_context(|| format!("sync {}", tmp.display()))?;
    }
    replace_file_atomic_backoff(&tmp, dest)
}

/// `sh -c <command>` (or `cmd /C` on Windows) for operator-supplied command lines.
pub fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    }
}
