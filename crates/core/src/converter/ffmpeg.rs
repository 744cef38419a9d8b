//! FFmpeg-based converter implementation.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::config::ConverterConfig;
use super::error::ConverterError;
use super::traits::Converter;
use super::types::{AudioFormat, ConversionResult, CoverEmbedJob, RetagJob, TranscodeJob};

/// Lines of ffmpeg stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// FFmpeg-based converter implementation.
pub struct FfmpegConverter {
    config: ConverterConfig,
}

impl FfmpegConverter {
    /// Creates a new FFmpeg converter with the given configuration.
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    /// Creates a converter with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ConverterConfig::default())
    }

    /// Builds ffmpeg arguments for a transcode with inline tags.
    fn build_transcode_args(&self, job: &TranscodeJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
        ];

        let thumbnail = job
            .thumbnail_path
            .as_deref()
            .filter(|_| job.format.supports_attached_picture());

        if let Some(thumb) = thumbnail {
            args.extend([
                "-i".to_string(),
                thumb.to_string_lossy().to_string(),
                "-map".to_string(),
                "0:a".to_string(),
                "-map".to_string(),
                "1:0".to_string(),
                "-c:v".to_string(),
                "mjpeg".to_string(),
                "-disposition:v".to_string(),
                "attached_pic".to_string(),
            ]);
        } else {
            args.push("-vn".to_string());
        }

        args.extend(["-c:a".to_string(), job.format.ffmpeg_codec().to_string()]);

        if !job.format.is_lossless() {
            if let Some(bitrate) = job.bitrate_kbps {
                args.extend(["-b:a".to_string(), format!("{}k", bitrate)]);
            }
        }

        if job.format == AudioFormat::Mp3 {
            args.extend(["-id3v2_version".to_string(), "3".to_string()]);
        }

        args.extend(job.metadata.to_ffmpeg_args());
        self.push_trailer(&mut args, &job.output_path);
        args
    }

    /// Builds ffmpeg arguments for attaching a cover to a finished file.
    fn build_embed_args(&self, job: &CoverEmbedJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
            "-i".to_string(),
            job.cover_path.to_string_lossy().to_string(),
        ];

        let cover_stream_tags = [
            "-metadata:s:v".to_string(),
            "title=Album cover".to_string(),
            "-metadata:s:v".to_string(),
            "comment=Cover (front)".to_string(),
        ];

        match job.format {
            AudioFormat::Mp3 | AudioFormat::M4a | AudioFormat::Flac => {
                args.extend(
                    [
                        "-map", "0:a", "-map", "1:0", "-c:a", "copy", "-c:v", "mjpeg",
                        "-disposition:v", "attached_pic",
                    ]
                    .map(String::from),
                );
                if job.format == AudioFormat::Mp3 {
                    args.extend(["-id3v2_version".to_string(), "3".to_string()]);
                }
                if job.format != AudioFormat::M4a {
                    args.extend(cover_stream_tags);
                }
            }
            AudioFormat::Wav => {
                args.extend(["-map", "0", "-map", "1", "-c:a", "copy", "-c:v", "copy"].map(String::from));
            }
        }

        self.push_trailer(&mut args, &job.output_path);
        args
    }

    /// Builds ffmpeg arguments for rewriting tags with a stream copy.
    fn build_retag_args(&self, job: &RetagJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
        ];

        let cover = job
            .cover_path
            .as_deref()
            .filter(|_| job.format.supports_attached_picture());

        match cover {
            Some(cover) => {
                args.extend(["-i".to_string(), cover.to_string_lossy().to_string()]);
                args.extend(
                    [
                        "-map", "0:a", "-map", "1:0", "-c:v", "mjpeg", "-disposition:v",
                        "attached_pic",
                    ]
                    .map(String::from),
                );
                if job.format != AudioFormat::M4a {
                    args.extend(
                        [
                            "-metadata:s:v", "title=Album cover", "-metadata:s:v",
                            "comment=Cover (front)",
                        ]
                        .map(String::from),
                    );
                }
            }
            // Keep whatever picture the file already has.
            None => args.extend(["-map", "0:a", "-map", "0:v?", "-c:v", "copy"].map(String::from)),
        }

        args.extend(["-c:a", "copy", "-map_metadata", "0"].map(String::from));
        if job.format == AudioFormat::Mp3 {
            args.extend(["-id3v2_version".to_string(), "3".to_string()]);
        }
        args.extend(job.metadata.to_ffmpeg_args());
        self.push_trailer(&mut args, &job.output_path);
        args
    }

    fn push_trailer(&self, args: &mut Vec<String>, output_path: &Path) {
        args.extend(["-loglevel".to_string(), self.config.log_level.clone()]);
        args.extend(self.config.extra_args.iter().cloned());
        args.push(output_path.to_string_lossy().to_string());
    }

    /// Runs ffmpeg to completion. A failed run never leaves `output_path` behind.
    async fn run_ffmpeg(
        &self,
        job_id: &str,
        input_path: &Path,
        output_path: &Path,
        args: Vec<String>,
    ) -> Result<ConversionResult, ConverterError> {
        let start = Instant::now();

        if !tokio::fs::try_exists(input_path).await.unwrap_or(false) {
            return Err(ConverterError::InputNotFound {
                path: input_path.to_path_buf(),
            });
        }

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|_| {
                ConverterError::OutputDirectoryFailed {
                    path: parent.to_path_buf(),
                }
            })?;
        }

        debug!(job_id, ffmpeg = %self.config.ffmpeg_path.display(), ?args, "Running ffmpeg");

        let child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConverterError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    ConverterError::Io(e)
                }
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let timeout_duration = Duration::from_secs(self.config.timeout_secs);
        let output = match timeout(timeout_duration, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let _ = tokio::fs::remove_file(output_path).await;
                return Err(ConverterError::Io(e));
            }
            Err(_) => {
                let _ = tokio::fs::remove_file(output_path).await;
                return Err(ConverterError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                });
            }
        };

        if !output.status.success() {
            let _ = tokio::fs::remove_file(output_path).await;
            let stderr = stderr_tail(&String::from_utf8_lossy(&output.stderr));
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(ConverterError::conversion_failed(
                format!("FFmpeg exited with code {}", code),
                (!stderr.is_empty()).then_some(stderr),
            ));
        }

        let output_meta = tokio::fs::metadata(output_path)
            .await
            .map_err(|_| ConverterError::conversion_failed("Output file not created", None))?;

        Ok(ConversionResult {
            output_path: output_path.to_path_buf(),
            output_size_bytes: output_meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let skip = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[skip..].join("\n")
}

#[async_trait]
impl Converter for FfmpegConverter {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(&self, job: TranscodeJob) -> Result<ConversionResult, ConverterError> {
        let args = self.build_transcode_args(&job);
        self.run_ffmpeg(&job.job_id, &job.input_path, &job.output_path, args)
            .await
    }

    async fn embed_cover(&self, job: CoverEmbedJob) -> Result<ConversionResult, ConverterError> {
        if !tokio::fs::try_exists(&job.cover_path).await.unwrap_or(false) {
            return Err(ConverterError::InputNotFound {
                path: job.cover_path.clone(),
            });
        }
        let args = self.build_embed_args(&job);
        self.run_ffmpeg(&job.job_id, &job.input_path, &job.output_path, args)
            .await
    }

    async fn retag(&self, job: RetagJob) -> Result<ConversionResult, ConverterError> {
        if let Some(cover) = &job.cover_path {
            if !tokio::fs::try_exists(cover).await.unwrap_or(false) {
                return Err(ConverterError::InputNotFound {
                    path: cover.clone(),
                });
            }
        }
        let args = self.build_retag_args(&job);
        self.run_ffmpeg(&job.job_id, &job.input_path, &job.output_path, args)
            .await
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        let result = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(ConverterError::conversion_failed(
                format!("ffmpeg -version exited with {}", status),
                None,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConverterError::FfmpegNotFound {
                    path: self.config.ffmpeg_path.clone(),
                })
            }
            Err(e) => Err(ConverterError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::EmbeddedMetadata;
    use std::path::PathBuf;

    fn transcode_job(format: AudioFormat, thumbnail: Option<&str>) -> TranscodeJob {
        TranscodeJob {
            job_id: "job-1".to_string(),
            input_path: PathBuf::from("/work/source.webm"),
            output_path: PathBuf::from("/work/transcoded.out"),
            format,
            bitrate_kbps: Some(192),
            metadata: EmbeddedMetadata {
                title: Some("Song".to_string()),
                artist: Some("Artist".to_string()),
                ..Default::default()
            },
            thumbnail_path: thumbnail.map(PathBuf::from),
        }
    }

    fn embed_job(format: AudioFormat) -> CoverEmbedJob {
        CoverEmbedJob {
            job_id: "job-1".to_string(),
            input_path: PathBuf::from("/work/transcoded.mp3"),
            cover_path: PathBuf::from("/work/cover.jpg"),
            output_path: PathBuf::from("/work/embedded.mp3"),
            format,
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_build_transcode_args_mp3() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter.build_transcode_args(&transcode_job(AudioFormat::Mp3, None));

        assert!(has_pair(&args, "-c:a", "libmp3lame"));
        assert!(has_pair(&args, "-b:a", "192k"));
        assert!(has_pair(&args, "-metadata", "title=Song"));
        assert!(has_pair(&args, "-metadata", "artist=Artist"));
        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(args.last().unwrap(), "/work/transcoded.out");
    }

    #[test]
    fn test_build_transcode_args_flac_has_no_bitrate() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter.build_transcode_args(&transcode_job(AudioFormat::Flac, None));
        assert!(has_pair(&args, "-c:a", "flac"));
        assert!(!args.contains(&"-b:a".to_string()));
    }

    #[test]
    fn test_build_transcode_args_attaches_thumbnail() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter
            .build_transcode_args(&transcode_job(AudioFormat::M4a, Some("/work/source.jpg")));
        assert!(has_pair(&args, "-i", "/work/source.jpg"));
        assert!(has_pair(&args, "-disposition:v", "attached_pic"));
        assert!(!args.contains(&"-vn".to_string()));
    }

    #[test]
    fn test_build_transcode_args_wav_skips_thumbnail() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter
            .build_transcode_args(&transcode_job(AudioFormat::Wav, Some("/work/source.jpg")));
        assert!(!args.contains(&"/work/source.jpg".to_string()));
        assert!(has_pair(&args, "-c:a", "pcm_s16le"));
    }

    #[test]
    fn test_build_embed_args_mp3() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter.build_embed_args(&embed_job(AudioFormat::Mp3));
        assert!(has_pair(&args, "-c:a", "copy"));
        assert!(has_pair(&args, "-c:v", "mjpeg"));
        assert!(has_pair(&args, "-id3v2_version", "3"));
        assert!(has_pair(&args, "-metadata:s:v", "title=Album cover"));
        assert!(has_pair(&args, "-metadata:s:v", "comment=Cover (front)"));
    }

    #[test]
    fn test_build_embed_args_m4a_and_flac() {
        let converter = FfmpegConverter::with_defaults();
        let m4a = converter.build_embed_args(&embed_job(AudioFormat::M4a));
        assert!(has_pair(&m4a, "-disposition:v", "attached_pic"));
        assert!(!m4a.contains(&"-id3v2_version".to_string()));
        assert!(!m4a.contains(&"-metadata:s:v".to_string()));

        let flac = converter.build_embed_args(&embed_job(AudioFormat::Flac));
        assert!(has_pair(&flac, "-metadata:s:v", "title=Album cover"));
        assert!(!flac.contains(&"-id3v2_version".to_string()));
    }

    #[test]
    fn test_build_embed_args_wav_copies_streams() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter.build_embed_args(&embed_job(AudioFormat::Wav));
        assert!(has_pair(&args, "-map", "0"));
        assert!(has_pair(&args, "-map", "1"));
        assert!(has_pair(&args, "-c:v", "copy"));
    }

    fn retag_job(format: AudioFormat, cover: Option<&str>) -> RetagJob {
        RetagJob {
            job_id: "retag".to_string(),
            input_path: PathBuf::from("/music/song.mp3"),
            output_path: PathBuf::from("/music/.song.retag.mp3"),
            format,
            metadata: EmbeddedMetadata {
                title: Some("New Title".to_string()),
                album: Some("New Album".to_string()),
                ..Default::default()
            },
            cover_path: cover.map(PathBuf::from),
        }
    }

    #[test]
    fn test_build_retag_args_copies_audio_and_keeps_tags() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter.build_retag_args(&retag_job(AudioFormat::Mp3, None));
        assert!(has_pair(&args, "-c:a", "copy"));
        assert!(has_pair(&args, "-map_metadata", "0"));
        assert!(has_pair(&args, "-map", "0:v?"));
        assert!(has_pair(&args, "-metadata", "title=New Title"));
        assert!(has_pair(&args, "-metadata", "album=New Album"));
        assert!(has_pair(&args, "-id3v2_version", "3"));
        assert!(!args.iter().any(|a| a.starts_with("artist=")));
        assert_eq!(args.last().unwrap(), "/music/.song.retag.mp3");
    }

    #[test]
    fn test_build_retag_args_with_cover() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter.build_retag_args(&retag_job(AudioFormat::Flac, Some("/img/c.png")));
        assert!(has_pair(&args, "-i", "/img/c.png"));
        assert!(has_pair(&args, "-map", "1:0"));
        assert!(has_pair(&args, "-disposition:v", "attached_pic"));
        assert!(!args.contains(&"0:v?".to_string()));

        let wav = converter.build_retag_args(&retag_job(AudioFormat::Wav, Some("/img/c.png")));
        assert!(!wav.contains(&"/img/c.png".to_string()));
    }

    #[tokio::test]
    async fn test_retag_missing_cover_is_reported() {
        let converter = FfmpegConverter::with_defaults();
        let err = converter
            .retag(retag_job(AudioFormat::Mp3, Some("/nonexistent/cover.jpg")))
            .await
            .unwrap_err();
        assert!(matches!(err, ConverterError::InputNotFound { .. }));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(&stderr);
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.ends_with("line 49"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let converter = FfmpegConverter::new(ConverterConfig::with_path(PathBuf::from(
            "/nonexistent/ffmpeg-binary",
        )));
        let err = converter.validate().await.unwrap_err();
        assert!(matches!(err, ConverterError::FfmpegNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_input_is_reported() {
        let converter = FfmpegConverter::with_defaults();
        let err = converter
            .transcode(transcode_job(AudioFormat::Mp3, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ConverterError::InputNotFound { .. }));
    }
}
