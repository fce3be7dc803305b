//! Helpers shared by the integration tests.
//!
//! The "broker" used here is a tiny shell script that behaves like nats-server
//! as far as the lifecycle manager can tell: it prints the readiness marker on
//! stderr and runs until it receives SIGTERM.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use nats_memory_server::Logger;

/// Records its arguments to `args.txt` next to itself, reports readiness and
/// waits for SIGTERM.
pub const READY_BROKER: &str = r#"#!/bin/sh
printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
echo "[1] [INF] Starting nats-server" >&2
echo "[1] [INF] Server is ready" >&2
trap 'exit 0' TERM
while true; do
    sleep 1 >/dev/null 2>&1 &
    wait $!
done
"#;

/// Echoes invalid UTF-8 around the readiness marker, reports readiness twice
/// and keeps writing to stderr afterwards. Creates `alive.txt` once all of that
/// got through, then waits for SIGTERM.
pub const CHATTY_BROKER: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
printf 'client sent \377\376 junk\n' >&2
echo "[1] [INF] Server is ready" >&2
echo "[1] [INF] Server is ready" >&2
sleep 0.2
printf 'trace \377 after ready\n' >&2
echo "[1] [INF] still serving" >&2
touch "$dir/alive.txt"
trap 'exit 0' TERM
while true; do
    sleep 1 >/dev/null 2>&1 &
    wait $!
done
"#;

/// Write an executable script called `name` into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).expect("failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
    path
}

#[cfg(unix)]
pub fn ready_broker(dir: &Path) -> PathBuf {
    write_script(dir, "nats-server", READY_BROKER)
}

#[cfg(unix)]
pub fn chatty_broker(dir: &Path) -> PathBuf {
    write_script(dir, "nats-server", CHATTY_BROKER)
}

/// Poll `condition` every 20ms for up to five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    condition()
}

/// A broker that dies with `code` without ever becoming ready.
#[cfg(unix)]
pub fn exiting_broker(dir: &Path, code: i32) -> PathBuf {
    write_script(
        dir,
        "nats-server",
        &format!("#!/bin/sh\necho \"[1] [FTL] giving up\" >&2\nexit {code}\n"),
    )
}

/// Arguments the last `READY_BROKER` run in `dir` was started with.
pub fn recorded_args(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("args.txt"))
        .expect("broker did not record its arguments")
        .lines()
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Log,
    Error,
    Warn,
    Debug,
}

#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, m)| m).collect()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }

    fn push(&self, level: Level, message: &str) {
        self.entries.lock().unwrap().push((level, message.to_string()));
    }
}

impl Logger for RecordingLogger {
    fn log(&self, message: &str) {
        self.push(Level::Log, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }

    fn warn(&self, message: &str) {
        self.push(Level::Warn, message);
    }

    fn debug(&self, message: &str) {
        self.push(Level::Debug, message);
    }
}

/// Zip `files` (name, contents, unix mode) into memory.
pub fn zip_bytes(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, contents, mode) in files {
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(*mode);
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
