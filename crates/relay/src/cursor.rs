//! Cursor file - crash-safe persistence of the upstream resume point
//!
//! A single tiny file holding the last admitted upstream seq as ASCII
//! decimal. One task owns the file; everyone else publishes updates over
//! a watch channel. Writes are coalesced to at most one per second plus a
//! forced write on clean shutdown, and always go through a temp file and
//! rename so a crash never leaves a torn cursor.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimum interval between cursor writes
const WRITE_INTERVAL: Duration = Duration::from_secs(1);

/// Read the persisted cursor
///
/// An absent file means "no resume point" (start from the upstream's
/// current head); unreadable content is an error so a corrupted file is
/// noticed instead of silently restarting from head.
pub fn load_cursor(path: &Path) -> io::Result<Option<u64>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let trimmed = contents.trim();
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("cursor file {} is not a decimal integer", path.display()),
            )
        })
}

/// Write the cursor via temp-file-then-rename
fn store_cursor(path: &Path, seq: u64) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, format!("{seq}\n"))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Own the cursor file until cancelled
///
/// Watches `rx` for the latest admitted seq and persists it at most once
/// per `WRITE_INTERVAL`; on cancellation a final forced write captures
/// whatever is pending. A value of 0 means "nothing admitted yet" and is
/// never written.
pub async fn run_cursor_task(path: PathBuf, rx: watch::Receiver<u64>, cancel: CancellationToken) {
    let mut last_written: u64 = 0;
    let mut ticker = tokio::time::interval(WRITE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = *rx.borrow();
                if current > last_written {
                    match store_cursor(&path, current) {
                        Ok(()) => {
                            last_written = current;
                        }
                        Err(e) => {
                            // Best-effort by contract: never blocks ingest.
                            warn!(path = %path.display(), error = %e, "cursor write failed");
                        }
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    let current = *rx.borrow();
    if current > last_written {
        match store_cursor(&path, current) {
            Ok(()) => info!(seq = current, "final cursor write"),
            Err(e) => warn!(path = %path.display(), error = %e, "final cursor write failed"),
        }
    }
    debug!("cursor task stopped");
}

#[cfg(test)]
#[path = "cursor_test.rs"]
mod tests;
