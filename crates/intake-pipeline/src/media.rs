//! ffmpeg/ffprobe wrapper for audio staging
//!
//! All tool invocations are blocking; async callers go through [`blocking`].

use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::MediaConfig;
use crate::error::{Error, Result};

/// Optional `[start, end)` slice of a recording, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioWindow {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl AudioWindow {
    /// Reject negative bounds and windows that end before they start
    pub fn new(start: Option<f64>, end: Option<f64>) -> Result<Self> {
        if start.is_some_and(|s| s < 0.0) || end.is_some_and(|e| e <= 0.0) {
            return Err(Error::InvalidInput(
                "Window bounds must be positive".to_string(),
            ));
        }
        if let (Some(s), Some(e)) = (start, end) {
            if e <= s {
                return Err(Error::InvalidInput(format!(
                    "Window end {}s is not after start {}s",
                    e, s
                )));
            }
        }
        Ok(Self { start, end })
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Duration in seconds from `ffprobe -of json -show_entries format=duration`
pub fn parse_probe_duration(json: &str) -> Result<f64> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| Error::media(format!("Unreadable ffprobe output: {}", e)))?;
    probe
        .format
        .duration
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| Error::media("ffprobe reported no duration"))
}

/// ffmpeg arguments for mono 16 kHz MP3 extraction
pub fn extract_audio_args(video: &Path, out: &Path, window: AudioWindow) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-hide_banner".into(), "-loglevel".into(), "error".into()];
    if let Some(start) = window.start {
        args.push("-ss".into());
        args.push(format!("{:.3}", start).into());
    }
    args.push("-i".into());
    args.push(video.into());
    if let Some(end) = window.end {
        let length = end - window.start.unwrap_or(0.0);
        args.push("-t".into());
        args.push(format!("{:.3}", length).into());
    }
    for arg in ["-vn", "-ac", "1", "-ar", "16000", "-c:a", "libmp3lame", "-b:a", "64k"] {
        args.push(arg.into());
    }
    args.push(out.into());
    args
}

/// ffmpeg arguments that cut `audio` into `segment_secs` pieces named `part_NNN.mp3`
pub fn segment_args(audio: &Path, segment_secs: u64, out_dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-hide_banner".into(), "-loglevel".into(), "error".into()];
    args.push("-i".into());
    args.push(audio.into());
    for arg in ["-f", "segment", "-reset_timestamps", "1", "-c", "copy", "-segment_time"] {
        args.push(arg.into());
    }
    args.push(segment_secs.max(1).to_string().into());
    args.push(out_dir.join("part_%03d.mp3").into());
    args
}

/// ffmpeg/ffprobe operations used by the video workflows
#[derive(Debug, Clone)]
pub struct MediaToolkit {
    config: MediaConfig,
}

impl MediaToolkit {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Fails with a media error unless both tools answer `-version`
    pub fn check_available(&self) -> Result<()> {
        for tool in [&self.config.ffmpeg, &self.config.ffprobe] {
            let status = Command::new(tool)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match status {
                Ok(s) if s.success() => {}
                _ => {
                    return Err(Error::media(format!(
                        "{} not found or not working",
                        tool.display()
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.config.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::media(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(Error::media(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_probe_duration(&String::from_utf8_lossy(&output.stdout))
    }

    pub fn extract_audio(&self, video: &Path, out: &Path, window: AudioWindow) -> Result<PathBuf> {
        self.run_ffmpeg(extract_audio_args(video, out, window))?;
        if !out.exists() {
            return Err(Error::media("ffmpeg produced no audio"));
        }
        Ok(out.to_path_buf())
    }

    /// Segments in order; audio no longer than one segment comes back as-is
    pub fn split_audio(&self, audio: &Path, segment_secs: u64, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let duration = self.probe_duration(audio)?;
        if duration <= segment_secs as f64 {
            return Ok(vec![audio.to_path_buf()]);
        }

        std::fs::create_dir_all(out_dir)?;
        self.run_ffmpeg(segment_args(audio, segment_secs, out_dir))?;

        let mut parts: Vec<PathBuf> = std::fs::read_dir(out_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("part_") && n.ends_with(".mp3"))
            })
            .collect();
        parts.sort();

        if parts.is_empty() {
            return Err(Error::media("ffmpeg produced no audio segments"));
        }
        tracing::debug!("Split {} into {} segments", audio.display(), parts.len());
        Ok(parts)
    }

    /// Duration of a usable video; too-small or zero-length files are rejected
    pub fn validate_video(&self, path: &Path) -> Result<f64> {
        let size = std::fs::metadata(path)?.len();
        if size < self.config.min_video_bytes {
            return Err(Error::media(format!(
                "Video is too small ({} bytes, minimum {})",
                size, self.config.min_video_bytes
            )));
        }
        let duration = self.probe_duration(path)?;
        if duration <= 0.0 {
            return Err(Error::media("Video has no playable duration"));
        }
        Ok(duration)
    }

    fn run_ffmpeg(&self, args: Vec<OsString>) -> Result<()> {
        let output = Command::new(&self.config.ffmpeg)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::media(format!("Failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(Error::media(format!(
                "ffmpeg failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Run a blocking media call off the async runtime
pub async fn blocking<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| Error::internal(format!("Media task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_extract_args_full_recording() {
        let args = strings(&extract_audio_args(
            Path::new("in.mp4"),
            Path::new("out.mp3"),
            AudioWindow::default(),
        ));
        assert!(!args.contains(&"-ss".to_string()));
        assert!(!args.contains(&"-t".to_string()));
        let joined = args.join(" ");
        assert!(joined.contains("-i in.mp4 -vn -ac 1 -ar 16000"));
        assert_eq!(args.last().unwrap(), "out.mp3");
    }

    #[test]
    fn test_extract_args_with_window() {
        let window = AudioWindow::new(Some(60.0), Some(150.5)).unwrap();
        let joined = strings(&extract_audio_args(Path::new("in.mp4"), Path::new("o.mp3"), window)).join(" ");
        assert!(joined.contains("-ss 60.000 -i in.mp4 -t 90.500"));
    }

    #[test]
    fn test_window_validation() {
        assert!(AudioWindow::new(Some(10.0), Some(5.0)).is_err());
        assert!(AudioWindow::new(Some(-1.0), None).is_err());
        assert!(AudioWindow::new(None, Some(30.0)).is_ok());
        assert!(AudioWindow::new(None, None).unwrap().is_full());
    }

    #[test]
    fn test_segment_args() {
        let joined = strings(&segment_args(Path::new("a.mp3"), 600, Path::new("parts"))).join(" ");
        assert!(joined.contains("-f segment"));
        assert!(joined.contains("-segment_time 600"));
        assert!(joined.ends_with("part_%03d.mp3"));
    }

    #[test]
    fn test_parse_probe_duration() {
        assert_eq!(
            parse_probe_duration(r#"{"format": {"duration": "1234.560000"}}"#).unwrap(),
            1234.56
        );
        assert!(parse_probe_duration(r#"{"format": {}}"#).is_err());
        assert!(parse_probe_duration("not json").is_err());
    }

    #[test]
    fn test_validate_rejects_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.mp4");
        std::fs::write(&path, vec![0u8; 1024]).unwrap();

        let toolkit = MediaToolkit::new(MediaConfig::default());
        let err = toolkit.validate_video(&path).unwrap_err();
        assert!(matches!(err, Error::Media(_)));
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let toolkit = MediaToolkit::new(MediaConfig {
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            ..MediaConfig::default()
        });
        let err = toolkit.check_available().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ffmpeg"));
    }
}
