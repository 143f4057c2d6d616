use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{LabError, Result};
use crate::models::Allocation;

const LEDGER_FILE: &str = "ledger.jsonl";
const LOCK_FILE: &str = "ledger.lock";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(unix)]
type LockHandle = nix::fcntl::Flock<File>;
#[cfg(not(unix))]
type LockHandle = File;

/// Shared address pool: one JSON allocation per line, guarded by an
/// exclusive advisory lock on a sibling lock file.
#[derive(Debug, Clone)]
pub struct AddressPool {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl AddressPool {
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout,
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    /// Acquire the pool lock, polling until the configured timeout.
    pub async fn lock(&self) -> Result<PoolGuard> {
        fs::create_dir_all(&self.dir)?;
        let lock_path = self.dir.join(LOCK_FILE);
        let started = Instant::now();
        let mut file = open_lock_file(&lock_path)?;

        loop {
            match try_lock(file) {
                Ok(handle) => {
                    tracing::debug!("Acquired address pool lock {}", lock_path.display());
                    return Ok(PoolGuard {
                        ledger_path: self.ledger_path(),
                        _lock: handle,
                    });
                }
                Err((returned, None)) => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(LabError::PoolBusy {
                            path: lock_path,
                            waited_secs: self.lock_timeout.as_secs(),
                        });
                    }
                    file = returned;
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err((_, Some(e))) => return Err(LabError::Io(e)),
            }
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?)
}

/// Non-blocking exclusive lock. `Err((file, None))` means another holder.
#[cfg(unix)]
fn try_lock(file: File) -> std::result::Result<LockHandle, (File, Option<std::io::Error>)> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(handle) => Ok(handle),
        Err((file, Errno::EWOULDBLOCK)) => Err((file, None)),
        Err((file, errno)) => Err((file, Some(std::io::Error::from(errno)))),
    }
}

#[cfg(not(unix))]
fn try_lock(file: File) -> std::result::Result<LockHandle, (File, Option<std::io::Error>)> {
    Ok(file)
}

/// Held while reading or mutating the ledger. Dropping it releases the lock.
pub struct PoolGuard {
    ledger_path: PathBuf,
    _lock: LockHandle,
}

impl fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolGuard")
            .field("ledger_path", &self.ledger_path)
            .finish_non_exhaustive()
    }
}

impl PoolGuard {
    /// All recorded allocations, in ledger order
    pub fn allocations(&self) -> Result<Vec<Allocation>> {
        let raw = match fs::read_to_string(&self.ledger_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (i, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: Allocation = serde_json::from_str(line).map_err(|e| LabError::Ledger {
                path: self.ledger_path.clone(),
                line: i + 1,
                reason: e.to_string(),
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Replace every entry owned by `lab` with `entries`.
    pub fn commit(&self, lab: &str, entries: &[Allocation]) -> Result<()> {
        let existing = self.allocations()?;

        for entry in entries {
            if let Some(other) = existing
                .iter()
                .find(|a| a.lab != lab && a.subnet.overlaps(&entry.subnet))
            {
                return Err(LabError::SubnetInUse {
                    lab: lab.to_string(),
                    subnet: entry.subnet.to_string(),
                    conflict: other.subnet.to_string(),
                    owner: format!("lab {} network {}", other.lab, other.network),
                });
            }
        }

        if existing.iter().any(|a| a.lab == lab) {
            let mut kept: Vec<Allocation> = existing.into_iter().filter(|a| a.lab != lab).collect();
            kept.extend_from_slice(entries);
            self.rewrite(&kept)?;
        } else {
            self.append(entries)?;
        }
        tracing::debug!("Recorded {} allocations for {}", entries.len(), lab);
        Ok(())
    }

    /// Drop every entry owned by `lab`, returning what was removed.
    pub fn release(&self, lab: &str) -> Result<Vec<Allocation>> {
        let (released, kept): (Vec<_>, Vec<_>) =
            self.allocations()?.into_iter().partition(|a| a.lab == lab);
        if !released.is_empty() {
            self.rewrite(&kept)?;
        }
        Ok(released)
    }

    fn append(&self, entries: &[Allocation]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let buf = encode(entries)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)?;
        file.write_all(buf.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn rewrite(&self, entries: &[Allocation]) -> Result<()> {
        let tmp = self.ledger_path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(encode(entries)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.ledger_path)?;
        Ok(())
    }
}

fn encode(entries: &[Allocation]) -> Result<String> {
    let mut buf = String::new();
    for entry in entries {
        buf.push_str(&serde_json::to_string(entry)?);
        buf.push('\n');
    }
    Ok(buf)
}
