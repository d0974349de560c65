//! FFmpeg capture engine implementation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tracing::{debug, error, warn};

use crate::{CaptureEngine, CaptureError, CaptureProcess, CaptureSpec, tokio_command};

/// How long to wait for ffmpeg after a hard kill.
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// FFmpeg engine configuration.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Path to the ffmpeg binary.
    pub binary_path: String,
    /// Extra arguments placed before `-i`.
    pub input_args: Vec<String>,
    /// Extra arguments placed after the codec options.
    pub output_args: Vec<String>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }
}

/// FFmpeg-based capture engine.
pub struct FfmpegCapture {
    config: FfmpegConfig,
    /// Cached version string, probed once at construction.
    version: Option<String>,
}

impl FfmpegCapture {
    /// Create a new engine with default configuration.
    pub fn new() -> Self {
        Self::with_config(FfmpegConfig::default())
    }

    /// Create with a custom configuration.
    pub fn with_config(config: FfmpegConfig) -> Self {
        let version = Self::detect_version(&config.binary_path);
        Self { config, version }
    }

    /// Detect the ffmpeg version, if the binary is present.
    fn detect_version(path: &str) -> Option<String> {
        std::process::Command::new(path)
            .arg("-version")
            .output()
            .ok()
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }

    /// Build the ffmpeg argument list for a capture.
    fn build_args(&self, spec: &CaptureSpec) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-y".to_string()];

        args.extend(self.config.input_args.clone());
        args.extend(["-i".to_string(), spec.stream_url.clone()]);
        // Copy the stream as-is, no re-encoding.
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.extend(self.config.output_args.clone());
        args.push(spec.output_path.to_string_lossy().to_string());

        args
    }
}

impl Default for FfmpegCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureEngine for FfmpegCapture {
    async fn spawn(&self, spec: &CaptureSpec) -> Result<Box<dyn CaptureProcess>, CaptureError> {
        let args = self.build_args(spec);
        debug!(binary = %self.config.binary_path, ?args, "spawning ffmpeg");

        let mut child = tokio_command(&self.config.binary_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CaptureError::LaunchFailed)?;

        let stdin = child.stdin.take();

        if let Some(stderr) = child.stderr.take() {
            let output = spec.output_path.clone();
            // Drain stderr so ffmpeg never blocks on a full pipe.
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.contains("Error") || line.contains("error") {
                        warn!(output = %output.display(), "ffmpeg: {line}");
                    } else {
                        debug!(output = %output.display(), "ffmpeg: {line}");
                    }
                }
            });
        }

        Ok(Box::new(FfmpegProcess {
            child,
            stdin,
            output_path: spec.output_path.clone(),
        }))
    }

    fn is_available(&self) -> bool {
        self.version.is_some()
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }
}

/// Handle for one running ffmpeg capture.
struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    output_path: PathBuf,
}

impl FfmpegProcess {
    /// Check that the capture left a non-empty file behind.
    fn validate_output(output_path: PathBuf) -> Result<PathBuf, CaptureError> {
        match std::fs::metadata(&output_path) {
            Ok(meta) if meta.len() > 0 => Ok(output_path),
            _ => Err(CaptureError::IncompleteCapture(output_path)),
        }
    }
}

#[async_trait]
impl CaptureProcess for FfmpegProcess {
    async fn stop(mut self: Box<Self>, grace: Duration) -> Result<PathBuf, CaptureError> {
        // Ask ffmpeg to finish cleanly; "q" on stdin flushes and closes the
        // output file. Dropping stdin afterwards covers binaries that only
        // react to EOF.
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
            drop(stdin);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                if !status.success() {
                    warn!(
                        output = %self.output_path.display(),
                        %status,
                        "ffmpeg exited with non-zero status"
                    );
                }
            }
            Ok(Err(e)) => {
                error!(output = %self.output_path.display(), error = %e, "error waiting for ffmpeg");
                return Err(CaptureError::Io(e));
            }
            Err(_) => {
                warn!(
                    output = %self.output_path.display(),
                    grace_secs = grace.as_secs(),
                    "ffmpeg did not exit in time; killing process"
                );
                let _ = self.child.kill().await;
                let _ = tokio::time::timeout(KILL_WAIT_TIMEOUT, self.child.wait()).await;
            }
        }

        Self::validate_output(self.output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_args_shape() {
        let engine = FfmpegCapture::with_config(FfmpegConfig {
            binary_path: "/nonexistent/ffmpeg".to_string(),
            input_args: vec!["-reconnect".to_string(), "1".to_string()],
            output_args: Vec::new(),
        });
        let spec = CaptureSpec::new("https://stream.example/live", "/tmp/show.mp3");
        let args = engine.build_args(&spec);

        assert_eq!(args[0], "-hide_banner");
        assert_eq!(args[1], "-y");
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "https://stream.example/live");
        assert!(i > 1, "input args go before -i");
        let c = args.iter().position(|a| a == "-c").unwrap();
        assert_eq!(args[c + 1], "copy");
        assert_eq!(args.last().unwrap(), "/tmp/show.mp3");
    }

    #[test]
    fn version_detection_missing_binary() {
        let engine = FfmpegCapture::with_config(FfmpegConfig {
            binary_path: "/nonexistent/ffmpeg".to_string(),
            ..Default::default()
        });
        assert!(!engine.is_available());
        assert!(engine.version().is_none());
    }

    #[tokio::test]
    async fn spawn_missing_binary_is_launch_failed() {
        let engine = FfmpegCapture::with_config(FfmpegConfig {
            binary_path: "/nonexistent/ffmpeg".to_string(),
            ..Default::default()
        });
        let spec = CaptureSpec::new("https://stream.example/live", "/tmp/never-written.mp3");
        match engine.spawn(&spec).await {
            Err(CaptureError::LaunchFailed(_)) => {}
            other => panic!("expected LaunchFailed, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn empty_output_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp3");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            FfmpegProcess::validate_output(path),
            Err(CaptureError::IncompleteCapture(_))
        ));
    }

    #[test]
    fn non_empty_output_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.mp3");
        std::fs::write(&path, b"audio").unwrap();
        assert_eq!(FfmpegProcess::validate_output(path.clone()).unwrap(), path);
    }
}
