//! Spawning and tearing down long-lived build server processes.
//!
//! BSP launchers are usually wrapper scripts that start a JVM (or a Bazel client that starts a
//! server). Killing only the immediate child leaves the grandchildren holding our stdio pipes
//! open, so every server is started in its own process group and torn down as a tree.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    process::Stdio,
};

pub use tokio_util::sync::CancellationToken;

/// A full command invocation (cwd + program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(cwd: &Path, program: &Path, args: &[String]) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            program: program.to_path_buf(),
            args: args.to_vec(),
        }
    }

    /// Build a spec from an `argv` vector (`argv[0]` is the program).
    ///
    /// Returns `None` when `argv` is empty or the program is blank.
    pub fn from_argv(cwd: &Path, argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self::new(cwd, Path::new(program), args))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Human-readable, not a round-trippable shell snippet.
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') || arg.contains('\t') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Spawn `spec` with piped stdin/stdout/stderr in a fresh process group.
///
/// The child is killed when the returned handle is dropped; callers that want the whole tree
/// gone should use [`kill_process_tree`].
pub fn spawn_piped(spec: &CommandSpec) -> io::Result<tokio::process::Child> {
    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            // SAFETY: `setpgid` is async-signal-safe and does not allocate.
            // This is executed after `fork` in the child process.
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    tracing::debug!(
        target: "trellis.process",
        command = %spec,
        pid = child.id(),
        "spawned build server process"
    );
    Ok(child)
}

/// Best-effort kill of the process tree rooted at `pid`.
pub fn kill_process_tree(pid: u32) {
    #[cfg(unix)]
    {
        let Ok(pid) = i32::try_from(pid) else {
            return;
        };
        // Negative pid targets the process group, which we set to the child's pid via
        // `setpgid(0, 0)` in `pre_exec`.
        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
    }

    #[cfg(windows)]
    {
        // `taskkill /T` terminates the full tree rooted at the pid.
        let pid = pid.to_string();
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
    }

    tracing::debug!(target: "trellis.process", pid, "killed build server process tree");
}
