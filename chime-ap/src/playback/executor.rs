//! Sound resolution and playback collaborators
//!
//! The dispatcher only knows these two traits. [`FileResolver`] and
//! [`CommandPlayer`] are the production implementations; tests substitute
//! recording fakes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chime_common::config::PlayerConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Extensions tried, in order, for `bundled:` sounds
pub const BUNDLED_EXTENSIONS: [&str; 6] = ["wav", "ogg", "oga", "mp3", "aiff", "flac"];

/// Maps a sound id to a playable file
pub trait SoundResolver: Send + Sync {
    fn resolve(&self, sound_id: &str) -> Result<PathBuf>;
}

/// Plays one resolved sound to completion
#[async_trait]
pub trait PlaybackExecutor: Send + Sync {
    async fn play(&self, sound: &Path, volume: f32) -> Result<()>;
}

/// Resolves `bundled:<name>`, `file:<path>` and plain paths
#[derive(Debug, Clone)]
pub struct FileResolver {
    sounds_dir: PathBuf,
}

impl FileResolver {
    pub fn new(sounds_dir: impl Into<PathBuf>) -> Self {
        Self {
            sounds_dir: sounds_dir.into(),
        }
    }

    pub fn from_config(config: &PlayerConfig) -> Self {
        Self::new(config.resolved_sounds_dir())
    }

    fn bundled(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::Resolve(format!("invalid bundled sound name '{}'", name)));
        }
        BUNDLED_EXTENSIONS
            .iter()
            .map(|ext| self.sounds_dir.join(format!("{}.{}", name, ext)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                Error::Resolve(format!(
                    "bundled sound '{}' not found in {}",
                    name,
                    self.sounds_dir.display()
                ))
            })
    }
}

impl SoundResolver for FileResolver {
    fn resolve(&self, sound_id: &str) -> Result<PathBuf> {
        if let Some(name) = sound_id.strip_prefix("bundled:") {
            return self.bundled(name);
        }
        let path = PathBuf::from(sound_id.strip_prefix("file:").unwrap_or(sound_id));
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::Resolve(format!("sound file not found: {}", path.display())))
        }
    }
}

/// Runs an external player program once per sound
///
/// `{path}` and `{volume}` in the argument list are substituted. The
/// volume is passed as a 0.00-1.00 decimal.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    command: String,
    args: Vec<String>,
    kill_on_drop: bool,
}

impl CommandPlayer {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            kill_on_drop: config.kill_on_timeout,
        }
    }

    fn render_args(&self, sound: &Path, volume: f32) -> Vec<String> {
        let path = sound.to_string_lossy();
        let volume = format!("{:.2}", volume);
        self.args
            .iter()
            .map(|arg| arg.replace("{path}", &path).replace("{volume}", &volume))
            .collect()
    }
}

#[async_trait]
impl PlaybackExecutor for CommandPlayer {
    async fn play(&self, sound: &Path, volume: f32) -> Result<()> {
        let args = self.render_args(sound, volume);
        debug!(command = %self.command, ?args, "Spawning player");

        // With kill_on_drop, abandoning this future (timeout or interrupt)
        // kills the child; otherwise it runs to completion detached.
        let output = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(self.kill_on_drop)
            .output()
            .await
            .map_err(|e| Error::Playback(format!("failed to start '{}': {}", self.command, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Playback(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bundled_resolution_prefers_wav() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("stop.ogg"), b"").unwrap();
        std::fs::write(dir.path().join("stop.wav"), b"").unwrap();

        let resolver = FileResolver::new(dir.path());
        assert_eq!(resolver.resolve("bundled:stop").unwrap(), dir.path().join("stop.wav"));
    }

    #[test]
    fn test_bundled_missing() {
        let dir = TempDir::new().unwrap();
        let resolver = FileResolver::new(dir.path());
        assert!(matches!(resolver.resolve("bundled:nope"), Err(Error::Resolve(_))));
    }

    #[test]
    fn test_bundled_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let resolver = FileResolver::new(dir.path());
        assert!(resolver.resolve("bundled:../etc/passwd").is_err());
        assert!(resolver.resolve("bundled:").is_err());
    }

    #[test]
    fn test_file_and_plain_paths() {
        let dir = TempDir::new().unwrap();
        let sound = dir.path().join("ding.mp3");
        std::fs::write(&sound, b"").unwrap();
        let resolver = FileResolver::new(dir.path());

        let prefixed = format!("file:{}", sound.display());
        assert_eq!(resolver.resolve(&prefixed).unwrap(), sound);
        assert_eq!(resolver.resolve(&sound.to_string_lossy()).unwrap(), sound);
        assert!(resolver.resolve("file:/definitely/not/here.wav").is_err());
    }

    #[test]
    fn test_argument_substitution() {
        let player = CommandPlayer {
            command: "afplay".to_string(),
            args: vec!["-v".into(), "{volume}".into(), "{path}".into()],
            kill_on_drop: false,
        };
        assert_eq!(
            player.render_args(Path::new("/tmp/a.wav"), 0.5),
            vec!["-v", "0.50", "/tmp/a.wav"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_status() {
        let ok = CommandPlayer {
            command: "true".to_string(),
            args: vec![],
            kill_on_drop: false,
        };
        assert!(ok.play(Path::new("/dev/null"), 1.0).await.is_ok());

        let failing = CommandPlayer {
            command: "false".to_string(),
            args: vec![],
            kill_on_drop: false,
        };
        assert!(matches!(
            failing.play(Path::new("/dev/null"), 1.0).await,
            Err(Error::Playback(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let player = CommandPlayer {
            command: "chime-no-such-player-binary".to_string(),
            args: vec![],
            kill_on_drop: false,
        };
        assert!(matches!(
            player.play(Path::new("x.wav"), 1.0).await,
            Err(Error::Playback(_))
        ));
    }
}
