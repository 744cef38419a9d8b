//! Postprocess pipeline implementation.
//!
//! Steps run in order and short-circuit:
//! - Transcode with tags (and the provider thumbnail, when wanted)
//! - Embed the custom cover, if one was supplied (non-fatal)
//! - Place the result in the output directory

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{PostprocessError, PostprocessObserver, PostprocessOutcome, PostprocessPlan};
use crate::converter::{Converter, CoverEmbedJob, TranscodeJob};
use crate::cover;
use crate::job::JobStatus;
use crate::metrics;
use crate::naming;
use crate::placer::{FsPlacer, PlacementAction, PlacementRequest};

/// Runs the postprocess steps for fetched media.
pub struct Postprocessor<C: Converter> {
    converter: Arc<C>,
    placer: Arc<FsPlacer>,
}

impl<C: Converter> Clone for Postprocessor<C> {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
            placer: Arc::clone(&self.placer),
        }
    }
}

fn ensure_live(token: &CancellationToken) -> Result<(), PostprocessError> {
    if token.is_cancelled() {
        Err(PostprocessError::Cancelled)
    } else {
        Ok(())
    }
}

/// Races an external step against cancellation. Losing the race drops the
/// step's future, which kills its child process.
async fn until_cancelled<T>(
    token: &CancellationToken,
    step: impl Future<Output = T>,
) -> Result<T, PostprocessError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PostprocessError::Cancelled),
        out = step => Ok(out),
    }
}

impl<C: Converter> Postprocessor<C> {
    pub fn new(converter: Arc<C>, placer: Arc<FsPlacer>) -> Self {
        Self { converter, placer }
    }

    pub fn converter(&self) -> &Arc<C> {
        &self.converter
    }

    /// Runs every step for `plan`.
    ///
    /// Only a failed transcode or placement (or cancellation) is an error; a
    /// cover that cannot be embedded leaves the outcome `degraded`.
    pub async fn run(
        &self,
        plan: &PostprocessPlan,
        token: &CancellationToken,
        observer: &dyn PostprocessObserver,
    ) -> Result<PostprocessOutcome, PostprocessError> {
        let started = Instant::now();
        let job_id = plan.job_id.to_string();

        ensure_live(token)?;
        observer.on_step(JobStatus::Postprocessing);

        let transcoded = plan.transcoded_path();
        let thumbnail_path = if plan.profile.wants_thumbnail() {
            plan.media.thumbnail_path.clone()
        } else {
            None
        };
        let transcode = TranscodeJob {
            job_id: job_id.clone(),
            input_path: plan.media.media_path.clone(),
            output_path: transcoded.clone(),
            format: plan.profile.format,
            bitrate_kbps: plan.profile.effective_bitrate(),
            metadata: plan.tags(),
            thumbnail_path,
        };
        let converted = until_cancelled(token, self.converter.transcode(transcode))
            .await?
            .map_err(PostprocessError::Transcode)?;
        debug!(
            job_id = %job_id,
            size_bytes = converted.output_size_bytes,
            duration_ms = converted.duration_ms,
            "Transcoded"
        );

        let mut degraded = false;
        let mut warnings = Vec::new();

        if let Some(custom_cover) = &plan.profile.custom_cover_path {
            ensure_live(token)?;
            observer.on_step(JobStatus::EmbeddingCover);

            match self.embed_cover(plan, custom_cover, &transcoded, token).await {
                Ok(()) => debug!(job_id = %job_id, "Embedded custom cover"),
                Err(PostprocessError::Cancelled) => return Err(PostprocessError::Cancelled),
                Err(e) => {
                    let message = format!("Cover not embedded, keeping the file without it: {}", e);
                    warn!(job_id = %job_id, error = %e, "Cover embedding failed");
                    metrics::COVER_EMBED_FAILURES.inc();
                    observer.on_warning(&message);
                    warnings.push(message);
                    degraded = true;
                }
            }
        }

        ensure_live(token)?;
        let mut destination_dir = plan.profile.output_dir.clone();
        if plan.profile.create_artist_folders {
            destination_dir.push(naming::artist_folder(&plan.metadata));
        }
        let placed = self
            .placer
            .place(PlacementRequest {
                job_id: job_id.clone(),
                source: transcoded,
                destination_dir,
                file_name: naming::output_file_name(&plan.profile, &plan.metadata),
                policy: plan.profile.collision_policy,
            })
            .await?;

        if placed.action == PlacementAction::Skipped {
            info!(job_id = %job_id, path = %placed.path.display(), "Kept existing file");
        }

        metrics::POSTPROCESS_DURATION
            .with_label_values(&[plan.profile.format.extension()])
            .observe(started.elapsed().as_secs_f64());

        Ok(PostprocessOutcome {
            path: placed.path,
            action: placed.action,
            degraded,
            warnings,
        })
    }

    /// Stages the cover and embeds it into a temp file that then replaces
    /// `transcoded`. On any failure `transcoded` is left untouched.
    async fn embed_cover(
        &self,
        plan: &PostprocessPlan,
        custom_cover: &Path,
        transcoded: &Path,
        token: &CancellationToken,
    ) -> Result<(), PostprocessError> {
        let staged = cover::stage(custom_cover, &plan.work_dir).await?;
        let ext = plan.profile.format.extension();
        let temp = plan
            .work_dir
            .join(format!("embed-{}.{}", Uuid::new_v4().simple(), ext));

        let job = CoverEmbedJob {
            job_id: plan.job_id.to_string(),
            input_path: transcoded.to_path_buf(),
            cover_path: staged,
            output_path: temp.clone(),
            format: plan.profile.format,
        };
        let result = until_cancelled(token, self.converter.embed_cover(job)).await?;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PostprocessError::CoverEmbed(e));
        }

        if let Err(e) = tokio::fs::rename(&temp, transcoded).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PostprocessError::Io {
                path: transcoded.to_path_buf(),
                source: e,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{AudioFormat, ConverterError};
    use crate::fetcher::FetchedMedia;
    use crate::job::{CollisionPolicy, ErrorKind, JobId};
    use crate::testing::{fixtures, MockConverter};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        steps: Mutex<Vec<JobStatus>>,
        warnings: Mutex<Vec<String>>,
    }

    impl PostprocessObserver for Recorder {
        fn on_step(&self, status: JobStatus) {
            self.steps.lock().unwrap().push(status);
        }

        fn on_warning(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_string());
        }
    }

    struct Harness {
        work: TempDir,
        out: TempDir,
        converter: Arc<MockConverter>,
        postprocessor: Postprocessor<MockConverter>,
    }

    impl Harness {
        async fn new() -> Self {
            let work = TempDir::new().unwrap();
            let out = TempDir::new().unwrap();
            tokio::fs::write(work.path().join("source.webm"), b"raw audio")
                .await
                .unwrap();
            tokio::fs::write(work.path().join("source.jpg"), b"thumb")
                .await
                .unwrap();
            let converter = Arc::new(MockConverter::new());
            let postprocessor = Postprocessor::new(Arc::clone(&converter), Arc::new(FsPlacer::new()));
            Self {
                work,
                out,
                converter,
                postprocessor,
            }
        }

        fn plan(&self, format: AudioFormat) -> PostprocessPlan {
            PostprocessPlan {
                job_id: JobId::new(),
                work_dir: self.work.path().to_path_buf(),
                media: FetchedMedia {
                    media_path: self.work.path().join("source.webm"),
                    thumbnail_path: Some(self.work.path().join("source.jpg")),
                },
                metadata: fixtures::track_metadata("Daft Punk", "Veridis Quo"),
                profile: fixtures::profile(self.out.path(), format, 192),
            }
        }
    }

    #[tokio::test]
    async fn test_transcode_and_place() {
        let h = Harness::new().await;
        let recorder = Recorder::default();
        let plan = h.plan(AudioFormat::Mp3);

        let outcome = h
            .postprocessor
            .run(&plan, &CancellationToken::new(), &recorder)
            .await
            .unwrap();

        assert_eq!(outcome.path, h.out.path().join("Daft Punk - Veridis Quo.mp3"));
        assert_eq!(outcome.action, PlacementAction::Placed);
        assert!(!outcome.degraded);
        assert_eq!(*recorder.steps.lock().unwrap(), vec![JobStatus::Postprocessing]);

        let transcodes = h.converter.recorded_transcodes().await;
        assert_eq!(transcodes.len(), 1);
        assert_eq!(transcodes[0].job.bitrate_kbps, Some(192));
        assert_eq!(
            transcodes[0].job.thumbnail_path,
            Some(h.work.path().join("source.jpg"))
        );
        assert!(!plan.transcoded_path().exists());
    }

    #[tokio::test]
    async fn test_artist_folder() {
        let h = Harness::new().await;
        let mut plan = h.plan(AudioFormat::Flac);
        plan.profile.create_artist_folders = true;

        let outcome = h
            .postprocessor
            .run(&plan, &CancellationToken::new(), &Recorder::default())
            .await
            .unwrap();

        assert_eq!(
            outcome.path,
            h.out.path().join("Daft Punk").join("Daft Punk - Veridis Quo.flac")
        );
        let transcodes = h.converter.recorded_transcodes().await;
        assert_eq!(transcodes[0].job.bitrate_kbps, None);
    }

    #[tokio::test]
    async fn test_custom_cover_embedded() {
        let h = Harness::new().await;
        let cover_dir = TempDir::new().unwrap();
        let cover = cover_dir.path().join("front.png");
        tokio::fs::write(&cover, b"png").await.unwrap();

        let recorder = Recorder::default();
        let mut plan = h.plan(AudioFormat::Mp3);
        plan.profile.custom_cover_path = Some(cover.clone());

        let outcome = h
            .postprocessor
            .run(&plan, &CancellationToken::new(), &recorder)
            .await
            .unwrap();

        assert!(!outcome.degraded);
        assert_eq!(
            *recorder.steps.lock().unwrap(),
            vec![JobStatus::Postprocessing, JobStatus::EmbeddingCover]
        );
        // The custom cover wins over the thumbnail.
        assert!(h.converter.recorded_transcodes().await[0].job.thumbnail_path.is_none());
        let placed = tokio::fs::read(&outcome.path).await.unwrap();
        assert!(placed.ends_with(b"|cover"));
        assert_eq!(tokio::fs::read(&cover).await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_failed_embed_degrades_and_keeps_file() {
        let h = Harness::new().await;
        let cover_dir = TempDir::new().unwrap();
        let cover = cover_dir.path().join("front.jpg");
        tokio::fs::write(&cover, b"jpg").await.unwrap();
        h.converter.set_fail_embeds(true).await;

        let recorder = Recorder::default();
        let mut plan = h.plan(AudioFormat::Mp3);
        plan.profile.custom_cover_path = Some(cover);

        let outcome = h
            .postprocessor
            .run(&plan, &CancellationToken::new(), &recorder)
            .await
            .unwrap();

        assert!(outcome.degraded);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(recorder.warnings.lock().unwrap().len(), 1);
        let placed = tokio::fs::read_to_string(&outcome.path).await.unwrap();
        assert_eq!(placed, "mp3|Veridis Quo|Daft Punk");

        let mut leftovers = tokio::fs::read_dir(h.work.path()).await.unwrap();
        while let Some(entry) = leftovers.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            assert!(!name.starts_with("embed-"), "temp output left behind: {}", name);
        }
    }

    #[tokio::test]
    async fn test_missing_cover_degrades() {
        let h = Harness::new().await;
        let mut plan = h.plan(AudioFormat::M4a);
        plan.profile.custom_cover_path = Some(PathBuf::from("/nonexistent/cover.jpg"));

        let outcome = h
            .postprocessor
            .run(&plan, &CancellationToken::new(), &Recorder::default())
            .await
            .unwrap();

        assert!(outcome.degraded);
        assert!(h.converter.recorded_embeds().await.is_empty());
    }

    #[tokio::test]
    async fn test_transcode_failure_is_fatal() {
        let h = Harness::new().await;
        h.converter
            .set_next_error(ConverterError::conversion_failed(
                "ffmpeg exited with code 1",
                Some("Unknown encoder".to_string()),
            ))
            .await;

        let err = h
            .postprocessor
            .run(&h.plan(AudioFormat::Mp3), &CancellationToken::new(), &Recorder::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transcode);
        assert!(err.to_string().contains("Unknown encoder"));
        assert_eq!(std::fs::read_dir(h.out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = Harness::new().await;
        let token = CancellationToken::new();
        token.cancel();

        let err = h
            .postprocessor
            .run(&h.plan(AudioFormat::Mp3), &token, &Recorder::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PostprocessError::Cancelled));
        assert_eq!(h.converter.transcode_count().await, 0);
    }

    #[tokio::test]
    async fn test_skip_policy_keeps_existing() {
        let h = Harness::new().await;
        let existing = h.out.path().join("Daft Punk - Veridis Quo.mp3");
        tokio::fs::write(&existing, b"old").await.unwrap();

        let mut plan = h.plan(AudioFormat::Mp3);
        plan.profile.collision_policy = CollisionPolicy::Skip;

        let outcome = h
            .postprocessor
            .run(&plan, &CancellationToken::new(), &Recorder::default())
            .await
            .unwrap();

        assert_eq!(outcome.action, PlacementAction::Skipped);
        assert_eq!(outcome.path, existing);
        assert_eq!(tokio::fs::read(&existing).await.unwrap(), b"old");
    }
}
