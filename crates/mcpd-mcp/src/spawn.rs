use mcpd_config::{Runtime, ServerSpec};
use mcpd_core::DaemonError;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Builds the argv for one runtime kind. The supervisor never sees
/// runtime specifics; it spawns whatever the spawner produces.
pub trait Spawner: Send + Sync {
    /// Full argv, binary first.
    fn argv(&self, spec: &ServerSpec) -> Result<Vec<String>, DaemonError>;
}

/// Spawner for the runtime a spec declares.
pub fn spawner_for(runtime: Runtime) -> &'static dyn Spawner {
    match runtime {
        Runtime::Uvx => &UvxSpawner,
        Runtime::Npx => &NpxSpawner,
        Runtime::Docker => &DockerSpawner,
    }
}

/// `uvx <pkg>@<version> [args…]`; `@latest` runs the bare package.
pub struct UvxSpawner;

impl Spawner for UvxSpawner {
    fn argv(&self, spec: &ServerSpec) -> Result<Vec<String>, DaemonError> {
        let package = if spec.version == "latest" {
            spec.package.clone()
        } else {
            format!("{}@{}", spec.package, spec.version)
        };
        let mut argv = vec!["uvx".to_string(), package];
        argv.extend(spec.args.iter().cloned());
        Ok(argv)
    }
}

/// `npx -y <pkg>@<version> [args…]`.
pub struct NpxSpawner;

impl Spawner for NpxSpawner {
    fn argv(&self, spec: &ServerSpec) -> Result<Vec<String>, DaemonError> {
        let mut argv = vec![
            "npx".to_string(),
            "-y".to_string(),
            format!("{}@{}", spec.package, spec.version),
        ];
        argv.extend(spec.args.iter().cloned());
        Ok(argv)
    }
}

/// `docker run -i --rm [-v host:mount]… [-e KEY]… <image>:<tag> [args…]`.
///
/// Env values never appear in argv; `-e KEY` makes docker read each
/// one from the daemon-injected child environment.
pub struct DockerSpawner;

impl Spawner for DockerSpawner {
    fn argv(&self, spec: &ServerSpec) -> Result<Vec<String>, DaemonError> {
        let mut argv = vec![
            "docker".to_string(),
            "run".to_string(),
            "-i".to_string(),
            "--rm".to_string(),
        ];
        for (mount, host_path) in &spec.volumes {
            argv.push("-v".to_string());
            argv.push(format!("{host_path}:{mount}"));
        }
        for key in spec.env.keys() {
            argv.push("-e".to_string());
            argv.push(key.clone());
        }
        argv.push(format!("{}:{}", spec.package, spec.version));
        argv.extend(spec.args.iter().cloned());
        Ok(argv)
    }
}

/// A freshly spawned child with its stdio split off.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub child: Child,
    pub pid: Option<u32>,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
}

/// Spawn a server process: resolve the binary, inject the spec env,
/// bind piped stdio, and isolate the child in its own process group
/// so shutdown signals reach the whole tree.
pub async fn spawn_server(
    spawner: &dyn Spawner,
    spec: &ServerSpec,
) -> Result<SpawnedProcess, DaemonError> {
    let argv = spawner.argv(spec)?;
    let binary = which::which(&argv[0]).map_err(|error| {
        DaemonError::spawn_failed(format!(
            "runtime binary '{}' for server '{}' not found: {error}",
            argv[0], spec.name
        ))
    })?;

    let mut cmd = Command::new(binary);
    cmd.args(&argv[1..]);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    // SAFETY: setsid is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|error| {
        DaemonError::spawn_failed(format!("failed to spawn server '{}': {error}", spec.name))
    })?;

    let pid = child.id();
    let stdin = child.stdin.take().ok_or_else(|| {
        DaemonError::spawn_failed(format!("no stdin handle for server '{}'", spec.name))
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        DaemonError::spawn_failed(format!("no stdout handle for server '{}'", spec.name))
    })?;
    let stderr = child.stderr.take();

    Ok(SpawnedProcess {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    })
}
