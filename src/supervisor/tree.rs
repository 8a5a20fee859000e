//! Forced termination of a process and everything it spawned.

use tracing::trace;

/// Direct children of `pid`, as listed by the kernel for each of its threads.
#[cfg(target_os = "linux")]
fn child_pids(pid: u32) -> Vec<u32> {
    let Ok(tasks) = std::fs::read_dir(format!("/proc/{pid}/task")) else {
        return Vec::new();
    };
    let mut children = Vec::new();
    for task in tasks.flatten() {
        let Ok(listing) = std::fs::read_to_string(task.path().join("children")) else {
            continue;
        };
        children.extend(
            listing
                .split_whitespace()
                .filter_map(|pid| pid.parse::<u32>().ok()),
        );
    }
    children
}

#[cfg(all(unix, not(target_os = "linux")))]
fn child_pids(_pid: u32) -> Vec<u32> {
    Vec::new()
}

/// SIGKILLs the descendants of `pid` depth first, then `pid` itself, then its
/// process group.
#[cfg(unix)]
pub(crate) fn kill_tree(pid: u32) {
    kill_descendants_then(pid);
    // SAFETY: plain syscall on a pid/pgid we own; failures (already gone) are fine.
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(unix)]
fn kill_descendants_then(pid: u32) {
    for child in child_pids(pid) {
        kill_descendants_then(child);
    }
    trace!(pid, "Killing process");
    // SAFETY: see kill_tree.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_tree(pid: u32) {
    trace!(pid, "Process tree kill relies on the child handle on this platform");
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    fn alive(pid: u32) -> bool {
        // Zombies still have a /proc entry; treat them as gone.
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| !stat.contains(") Z"))
            .unwrap_or(false)
    }

    #[test]
    fn kills_grandchildren() {
        use std::os::unix::process::CommandExt;

        let mut parent = Command::new("sh")
            .arg("-c")
            .arg("sleep 30 & echo $!; wait")
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let mut line = String::new();
        {
            use std::io::BufRead;
            let stdout = parent.stdout.take().unwrap();
            std::io::BufReader::new(stdout).read_line(&mut line).unwrap();
        }
        let grandchild: u32 = line.trim().parse().unwrap();
        assert!(alive(grandchild));

        kill_tree(parent.id());
        parent.wait().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while alive(grandchild) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!alive(grandchild));
    }
}
