//! Starts the engine binary shipped in the engine directory

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::game::config::GameConfig;

/// How long a killed engine gets to exit before we stop waiting
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Engine launch errors
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Engine binary not found at {0}")]
    MissingBinary(PathBuf),

    #[error("Failed to start engine: {0}")]
    Spawn(#[source] io::Error),
}

/// Path of the engine executable inside the engine directory for an OS name
/// as reported by `std::env::consts::OS`
pub fn binary_name(os: &str) -> &'static str {
    match os {
        "windows" => "fps.exe",
        "macos" => "fps.app/Contents/MacOS/fps",
        _ => "fps.x86_64",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineLauncher {
    engine_dir: PathBuf,
    map_dir: PathBuf,
    port: u16,
    use_depth_map: bool,
}

impl EngineLauncher {
    pub fn new(engine_dir: impl Into<PathBuf>, map_dir: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            engine_dir: engine_dir.into(),
            map_dir: map_dir.into(),
            port,
            use_depth_map: false,
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self {
            use_depth_map: config.use_depth_map,
            ..Self::new(&config.engine_dir, &config.map_dir, config.server_port)
        }
    }

    /// Depth images need the renderer, so headless mode is dropped
    pub fn with_depth_map(mut self, on: bool) -> Self {
        self.use_depth_map = on;
        self
    }

    pub fn binary_path(&self) -> PathBuf {
        self.engine_dir.join(binary_name(std::env::consts::OS))
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-batchmode".to_string(),
            "-port".to_string(),
            self.port.to_string(),
            "-map-dir".to_string(),
            self.map_dir.display().to_string(),
        ];
        if !self.use_depth_map {
            args.push("-nographics".to_string());
        }
        args
    }

    /// Start the engine; it is killed when the returned handle is dropped
    pub fn spawn(&self) -> Result<EngineProcess, LaunchError> {
        let binary = self.binary_path();
        if !binary.is_file() {
            return Err(LaunchError::MissingBinary(binary));
        }

        let child = command(&binary, &self.args())
            .spawn()
            .map_err(LaunchError::Spawn)?;

        info!(
            binary = %binary.display(),
            pid = ?child.id(),
            port = self.port,
            graphics = self.use_depth_map,
            "Engine started"
        );

        Ok(EngineProcess { child })
    }
}

fn command(binary: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    cmd
}

/// A running engine owned by the driver
#[derive(Debug)]
pub struct EngineProcess {
    child: Child,
}

impl EngineProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Resolves when the engine exits on its own
    ///
    /// Cancel safe, so it can be raced against connecting.
    pub async fn exited(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kill the engine and wait briefly for it to go away
    pub async fn shutdown(mut self) -> io::Result<()> {
        if let Some(status) = self.child.try_wait()? {
            info!(status = %status, "Engine already exited");
            return Ok(());
        }

        self.child.start_kill()?;
        match timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => {
                info!(status = %status?, "Engine stopped");
            }
            Err(_) => {
                warn!(grace = ?EXIT_GRACE, "Engine did not exit after kill");
            }
        }
        Ok(())
    }
}
