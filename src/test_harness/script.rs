use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A shell script standing in for the daemon executable.
///
/// It records each launch, its arguments and the API key it was handed, then
/// idles until one of the trigger files appears: `stop` exits 0, `restart`
/// exits 3, `crash` exits 1. Trigger files are consumed on use.
pub struct ScriptDaemon {
    dir: TempDir,
    path: PathBuf,
}

const SCRIPT: &str = r#"#!/bin/sh
DIR="$(dirname "$0")"
echo launch >> "$DIR/launches"
echo "$@" > "$DIR/args"
echo "$STGUIAPIKEY" > "$DIR/apikey"
echo "fake daemon up"
echo "fake daemon stderr" 1>&2
while true; do
  if [ -f "$DIR/stop" ]; then rm -f "$DIR/stop"; exit 0; fi
  if [ -f "$DIR/restart" ]; then rm -f "$DIR/restart"; exit 3; fi
  if [ -f "$DIR/crash" ]; then rm -f "$DIR/crash"; exit 1; fi
  sleep 0.02
done
"#;

impl ScriptDaemon {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = write_executable(dir.path(), "syncthing", SCRIPT)?;
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn stop_file(&self) -> PathBuf {
        self.dir.path().join("stop")
    }

    pub fn restart_file(&self) -> PathBuf {
        self.dir.path().join("restart")
    }

    pub fn trigger_crash(&self) -> io::Result<()> {
        fs::write(self.dir.path().join("crash"), b"")
    }

    pub fn trigger_restart(&self) -> io::Result<()> {
        fs::write(self.restart_file(), b"")
    }

    pub fn trigger_stop(&self) -> io::Result<()> {
        fs::write(self.stop_file(), b"")
    }

    pub fn launches(&self) -> usize {
        fs::read_to_string(self.dir.path().join("launches"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    pub fn recorded_args(&self) -> Option<String> {
        fs::read_to_string(self.dir.path().join("args"))
            .ok()
            .map(|s| s.trim().to_string())
    }

    pub fn recorded_api_key(&self) -> Option<String> {
        fs::read_to_string(self.dir.path().join("apikey"))
            .ok()
            .map(|s| s.trim().to_string())
    }
}

/// Writes `body` to `dir/name` and marks it executable.
pub fn write_executable(dir: &Path, name: &str, body: &str) -> io::Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, body)?;
    let mut permissions = fs::metadata(&path)?.permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions)?;
    Ok(path)
}
