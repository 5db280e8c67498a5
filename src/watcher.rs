//! File watcher: polls a script's mtime every 200 ms on its own thread and
//! signals the control thread to reload.
//!
//! Grounded in the original source's `LuaEngine::startWatcher`/`stopWatcher`
//! (poll `last_write_time` every 200 ms, stop on a single atomic flag,
//! joined synchronously) and the teacher's own polling loop in
//! `LiveSession::run` (`.teacher_ref/live.rs`), reworked so the watcher
//! thread only sends a signal rather than touching engine state directly —
//! `mlua::Lua` is not `Send` across arbitrary threads, so the actual reload
//! must run on whichever thread owns the `ScriptEngine`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Sent to the control thread whenever the watched file's mtime advances.
pub struct ReloadSignal;

/// Owns the watcher thread and the channel it signals on.
pub struct Watcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    receiver: Receiver<ReloadSignal>,
}

impl Watcher {
    /// Spawn the polling thread for `path`. Returns immediately; reloads
    /// are observed by polling [`Watcher::try_recv`] from the control
    /// thread's own loop (the REPL loop, in this crate's CLI).
    pub fn spawn(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut last_modified = fs::metadata(&path)?.modified()?;

        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let (sender, receiver): (Sender<ReloadSignal>, Receiver<ReloadSignal>) = mpsc::channel();

        let handle = thread::spawn(move || {
            while running_thread.load(Ordering::Relaxed) {
                thread::sleep(POLL_INTERVAL);
                if !running_thread.load(Ordering::Relaxed) {
                    break;
                }
                let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(_) => continue,
                };
                if modified > last_modified {
                    last_modified = modified;
                    if sender.send(ReloadSignal).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            running,
            handle: Some(handle),
            receiver,
        })
    }

    /// Non-blocking check for a pending reload signal.
    pub fn try_recv(&self) -> Option<ReloadSignal> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Whether `path`'s mtime differs from `since`. Exposed standalone (rather
/// than only through [`Watcher`]) because `tests/` exercises reload
/// behavior without spinning up a real polling thread.
pub fn modified_since(path: impl AsRef<Path>, since: SystemTime) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| modified > since)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn watcher_signals_after_the_file_is_touched() {
        let mut path = std::env::temp_dir();
        path.push(format!("patchline-watcher-test-{:?}.lua", thread::current().id()));
        fs::write(&path, "-- initial").unwrap();

        let watcher = Watcher::spawn(&path).unwrap();
        assert!(watcher.try_recv().is_none());

        thread::sleep(Duration::from_millis(50));
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "-- changed").unwrap();
        drop(file);

        // Force the mtime forward in case the filesystem's mtime
        // resolution is coarser than the sleep above.
        let now = SystemTime::now() + Duration::from_secs(1);
        let _ = filetime_touch(&path, now);

        thread::sleep(POLL_INTERVAL * 3);
        assert!(watcher.try_recv().is_some());

        fs::remove_file(&path).ok();
    }

    fn filetime_touch(path: &Path, when: SystemTime) -> std::io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(when)
    }
}
