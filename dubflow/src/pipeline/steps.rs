//! Built-in dubbing pipeline steps.
//!
//! Seven steps take a source asset through extraction, transcription,
//! translation, subtitle generation, synthesis, assembly, and final
//! muxing with validation. Transcription and translation memoize their
//! results in a [`ResultCache`] keyed by content hashes; synthesis
//! routes through the [`ServiceRouter`]; every metered call is guarded
//! by the [`CircuitBreaker`].

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::cache::{cache_key, ResultCache};
use crate::core::{AudioSegment, Job, StepContext, StepOutput, Transcript, Translation};
use crate::errors::{StepError, StepResult};
use crate::pipeline::step::PipelineStep;
use crate::router::{ServiceRouter, SynthesisRequest};
use crate::services::{MediaProcessor, OutputValidator, Transcriber, Translator};

/// Extracts the audio track from the source asset. Span 0-10.
pub struct ExtractAudioStep {
    media: Arc<dyn MediaProcessor>,
}

impl ExtractAudioStep {
    /// Creates the step.
    #[must_use]
    pub fn new(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl PipelineStep for ExtractAudioStep {
    fn name(&self) -> &str {
        "extract_audio"
    }

    fn progress_span(&self) -> (u8, u8) {
        (0, 10)
    }

    async fn execute(&self, job: &Job, _ctx: &mut StepContext) -> StepResult<StepOutput> {
        let audio_ref = self.media.extract_audio(job.source_ref()).await?;
        Ok(StepOutput::AudioRef { audio_ref })
    }
}

/// Transcribes the extracted audio, memoized by audio reference and
/// language. Span 10-30.
pub struct TranscribeStep {
    transcriber: Arc<dyn Transcriber>,
    cache: Arc<ResultCache<Transcript>>,
    breaker: Arc<CircuitBreaker>,
}

impl TranscribeStep {
    /// Creates the step.
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        cache: Arc<ResultCache<Transcript>>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            transcriber,
            cache,
            breaker,
        }
    }
}

#[async_trait]
impl PipelineStep for TranscribeStep {
    fn name(&self) -> &str {
        "transcribe"
    }

    fn progress_span(&self) -> (u8, u8) {
        (10, 30)
    }

    async fn execute(&self, job: &Job, ctx: &mut StepContext) -> StepResult<StepOutput> {
        let audio_ref = ctx
            .audio_ref()
            .ok_or_else(|| StepError::Other("no extracted audio to transcribe".to_string()))?
            .to_string();

        let key = cache_key("transcribe", &[&audio_ref, &job.source_language]);
        if let Some(transcript) = self.cache.retrieve(&key) {
            debug!(job_id = %job.id, "transcription served from cache");
            return Ok(StepOutput::Transcript(transcript));
        }

        let service = self.transcriber.name().to_string();
        if self.breaker.is_open(&service) {
            return Err(StepError::circuit_open(service));
        }

        match self
            .transcriber
            .transcribe(&audio_ref, &job.source_language)
            .await
        {
            Ok(transcript) => {
                self.breaker.record_success(&service);
                self.cache.store(&key, transcript.clone(), None);
                Ok(StepOutput::Transcript(transcript))
            }
            Err(err) => {
                self.breaker.record_failure(&service);
                Err(err)
            }
        }
    }
}

/// Translates the transcript, memoized by transcript content hash and
/// target language. Span 30-45.
pub struct TranslateStep {
    translator: Arc<dyn Translator>,
    cache: Arc<ResultCache<Translation>>,
    breaker: Arc<CircuitBreaker>,
}

impl TranslateStep {
    /// Creates the step.
    #[must_use]
    pub fn new(
        translator: Arc<dyn Translator>,
        cache: Arc<ResultCache<Translation>>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            translator,
            cache,
            breaker,
        }
    }
}

#[async_trait]
impl PipelineStep for TranslateStep {
    fn name(&self) -> &str {
        "translate"
    }

    fn progress_span(&self) -> (u8, u8) {
        (30, 45)
    }

    async fn execute(&self, job: &Job, ctx: &mut StepContext) -> StepResult<StepOutput> {
        let transcript = ctx
            .transcript()
            .ok_or_else(|| StepError::Other("no transcript to translate".to_string()))?
            .clone();

        let key = cache_key(
            "translate",
            &[&transcript.content_hash(), &job.target_language],
        );
        if let Some(translation) = self.cache.retrieve(&key) {
            debug!(job_id = %job.id, "translation served from cache");
            return Ok(StepOutput::Translation(translation));
        }

        let service = self.translator.name().to_string();
        if self.breaker.is_open(&service) {
            return Err(StepError::circuit_open(service));
        }

        match self
            .translator
            .translate(&transcript, &job.target_language)
            .await
        {
            Ok(translation) => {
                self.breaker.record_success(&service);
                self.cache.store(&key, translation.clone(), None);
                Ok(StepOutput::Translation(translation))
            }
            Err(err) => {
                self.breaker.record_failure(&service);
                Err(err)
            }
        }
    }
}

/// Renders subtitles from the translation. Span 45-50.
pub struct SubtitleStep {
    translator: Arc<dyn Translator>,
}

impl SubtitleStep {
    /// Creates the step.
    #[must_use]
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self { translator }
    }
}

#[async_trait]
impl PipelineStep for SubtitleStep {
    fn name(&self) -> &str {
        "subtitles"
    }

    fn progress_span(&self) -> (u8, u8) {
        (45, 50)
    }

    async fn execute(&self, _job: &Job, ctx: &mut StepContext) -> StepResult<StepOutput> {
        let translation = ctx
            .translation()
            .ok_or_else(|| StepError::Other("no translation for subtitles".to_string()))?;
        let subtitle_ref = self.translator.generate_subtitles(translation).await?;
        Ok(StepOutput::SubtitleRef { subtitle_ref })
    }
}

/// Synthesizes speech for every translated segment through the router.
/// Span 50-75.
pub struct SynthesizeStep {
    router: Arc<ServiceRouter>,
    breaker: Arc<CircuitBreaker>,
}

impl SynthesizeStep {
    /// Creates the step.
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { router, breaker }
    }
}

#[async_trait]
impl PipelineStep for SynthesizeStep {
    fn name(&self) -> &str {
        "synthesize"
    }

    fn progress_span(&self) -> (u8, u8) {
        (50, 75)
    }

    async fn execute(&self, job: &Job, ctx: &mut StepContext) -> StepResult<StepOutput> {
        let translation = ctx
            .translation()
            .ok_or_else(|| StepError::Other("no translation to synthesize".to_string()))?
            .clone();

        let mut segments = Vec::with_capacity(translation.segments.len());
        for (index, segment) in translation.segments.iter().enumerate() {
            let request = SynthesisRequest {
                text: segment.text.clone(),
                session_id: job.id.to_string(),
                language: translation.language.clone(),
            };

            let backend = self.router.select_backend(&request).await;
            if self.breaker.is_open(&backend) {
                return Err(StepError::circuit_open(backend));
            }

            match self.router.dispatch(&request, &backend).await {
                Ok(audio_ref) => {
                    self.breaker.record_success(&backend);
                    segments.push(AudioSegment {
                        index,
                        audio_ref,
                        start_ms: segment.start_ms,
                        end_ms: segment.end_ms,
                        backend: backend.clone(),
                    });
                }
                Err(err) => {
                    self.breaker.record_failure(&backend);
                    return Err(err);
                }
            }
        }

        Ok(StepOutput::AudioSegments(segments))
    }

    /// Drops the job's sticky assignment so a retry can re-route away
    /// from a failing backend.
    async fn rollback(&self, job: &Job, _ctx: &mut StepContext) -> StepResult<()> {
        self.router.clear_assignment(&job.id.to_string());
        Ok(())
    }
}

/// Assembles synthesized segments into one dubbed audio track.
/// Span 75-90.
pub struct AssembleStep {
    media: Arc<dyn MediaProcessor>,
}

impl AssembleStep {
    /// Creates the step.
    #[must_use]
    pub fn new(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl PipelineStep for AssembleStep {
    fn name(&self) -> &str {
        "assemble_audio"
    }

    fn progress_span(&self) -> (u8, u8) {
        (75, 90)
    }

    async fn execute(&self, _job: &Job, ctx: &mut StepContext) -> StepResult<StepOutput> {
        let segments = ctx
            .audio_segments()
            .ok_or_else(|| StepError::Other("no synthesized segments to assemble".to_string()))?;
        let track_ref = self.media.assemble_audio(segments).await?;
        Ok(StepOutput::AudioTrack { track_ref })
    }
}

/// Muxes the dubbed track into the source video and validates the
/// result. Span 90-100.
pub struct FinalizeStep {
    media: Arc<dyn MediaProcessor>,
    validator: Arc<dyn OutputValidator>,
}

impl FinalizeStep {
    /// Creates the step.
    #[must_use]
    pub fn new(media: Arc<dyn MediaProcessor>, validator: Arc<dyn OutputValidator>) -> Self {
        Self { media, validator }
    }
}

#[async_trait]
impl PipelineStep for FinalizeStep {
    fn name(&self) -> &str {
        "finalize"
    }

    fn progress_span(&self) -> (u8, u8) {
        (90, 100)
    }

    async fn execute(&self, job: &Job, ctx: &mut StepContext) -> StepResult<StepOutput> {
        let track_ref = ctx
            .audio_track()
            .ok_or_else(|| StepError::Other("no assembled track to mux".to_string()))?
            .to_string();

        let video_ref = self
            .media
            .combine_video_audio(job.source_ref(), &track_ref)
            .await?;

        let report = self.validator.validate_output(&video_ref).await?;
        if !report.passes_threshold {
            return Err(StepError::fatal(
                "output-validator",
                format!("output below quality threshold: {}", report.issues.join("; ")),
            ));
        }

        ctx.put(StepOutput::VideoRef { video_ref });
        Ok(StepOutput::Validation(report))
    }
}

/// Builds the standard seven-step dubbing pipeline.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn standard_steps(
    media: Arc<dyn MediaProcessor>,
    transcriber: Arc<dyn Transcriber>,
    translator: Arc<dyn Translator>,
    validator: Arc<dyn OutputValidator>,
    router: Arc<ServiceRouter>,
    breaker: Arc<CircuitBreaker>,
    transcript_cache: Arc<ResultCache<Transcript>>,
    translation_cache: Arc<ResultCache<Translation>>,
) -> Vec<Arc<dyn PipelineStep>> {
    vec![
        Arc::new(ExtractAudioStep::new(media.clone())),
        Arc::new(TranscribeStep::new(
            transcriber,
            transcript_cache,
            breaker.clone(),
        )),
        Arc::new(TranslateStep::new(
            translator.clone(),
            translation_cache,
            breaker.clone(),
        )),
        Arc::new(SubtitleStep::new(translator)),
        Arc::new(SynthesizeStep::new(router, breaker)),
        Arc::new(AssembleStep::new(media.clone())),
        Arc::new(FinalizeStep::new(media, validator)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SpeechSegment;
    use crate::pipeline::step::validate_steps;
    use crate::router::RouterConfig;
    use crate::testing::mocks::{
        MockMediaProcessor, MockSpeechBackend, MockTranscriber, MockTranslator, MockValidator,
    };

    fn test_router() -> Arc<ServiceRouter> {
        Arc::new(ServiceRouter::new(
            Arc::new(MockSpeechBackend::named("cloud-tts").with_quota(0, 1_000_000)),
            Arc::new(MockSpeechBackend::named("local-tts").unmetered()),
            RouterConfig::default(),
        ))
    }

    fn test_job() -> Job {
        Job::new("alice", "media://clip.mp4", "en", "de")
    }

    #[test]
    fn test_standard_steps_form_valid_ladder() {
        let media: Arc<dyn MediaProcessor> = Arc::new(MockMediaProcessor::new());
        let steps = standard_steps(
            media,
            Arc::new(MockTranscriber::new()),
            Arc::new(MockTranslator::new()),
            Arc::new(MockValidator::passing()),
            test_router(),
            Arc::new(CircuitBreaker::default()),
            Arc::new(ResultCache::in_memory()),
            Arc::new(ResultCache::in_memory()),
        );

        assert_eq!(steps.len(), 7);
        assert!(validate_steps(&steps).is_ok());
    }

    #[tokio::test]
    async fn test_transcribe_uses_cache_on_second_call() {
        let transcriber = Arc::new(MockTranscriber::new());
        let cache = Arc::new(ResultCache::in_memory());
        let step = TranscribeStep::new(
            transcriber.clone(),
            cache,
            Arc::new(CircuitBreaker::default()),
        );

        let job = test_job();
        let mut ctx = StepContext::new();
        ctx.put(StepOutput::AudioRef {
            audio_ref: "audio://1".to_string(),
        });

        step.execute(&job, &mut ctx).await.unwrap();
        step.execute(&job, &mut ctx).await.unwrap();

        assert_eq!(transcriber.calls(), 1);
    }

    #[tokio::test]
    async fn test_transcribe_respects_open_breaker() {
        let breaker = Arc::new(CircuitBreaker::new(crate::breaker::BreakerConfig {
            failure_threshold: 1,
            cool_down: std::time::Duration::from_secs(60),
        }));
        let transcriber = Arc::new(MockTranscriber::new());
        breaker.record_failure(transcriber.name());

        let step = TranscribeStep::new(
            transcriber.clone(),
            Arc::new(ResultCache::in_memory()),
            breaker,
        );

        let job = test_job();
        let mut ctx = StepContext::new();
        ctx.put(StepOutput::AudioRef {
            audio_ref: "audio://1".to_string(),
        });

        let err = step.execute(&job, &mut ctx).await.unwrap_err();
        assert!(matches!(err, StepError::CircuitOpen { .. }));
        // The call was skipped entirely.
        assert_eq!(transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn test_synthesize_produces_segment_per_translation_segment() {
        let router = test_router();
        let step = SynthesizeStep::new(router, Arc::new(CircuitBreaker::default()));

        let job = test_job();
        let mut ctx = StepContext::new();
        ctx.put(StepOutput::Translation(Translation::new(
            "de",
            vec![
                SpeechSegment::new(0, 1000, "Hallo."),
                SpeechSegment::new(1000, 2500, "Wie geht's?"),
            ],
        )));

        let output = step.execute(&job, &mut ctx).await.unwrap();
        let StepOutput::AudioSegments(segments) = output else {
            panic!("expected audio segments");
        };
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].index, 0);
        assert_eq!(segments[1].start_ms, 1000);
    }

    #[tokio::test]
    async fn test_synthesize_rollback_clears_sticky_assignment() {
        let router = test_router();
        let step = SynthesizeStep::new(router.clone(), Arc::new(CircuitBreaker::default()));

        let job = test_job();
        let session = job.id.to_string();
        router
            .select_backend(&SynthesisRequest {
                text: "x".to_string(),
                session_id: session.clone(),
                language: "de".to_string(),
            })
            .await;

        let mut ctx = StepContext::new();
        step.rollback(&job, &mut ctx).await.unwrap();
        assert!(router.assignment(&session).is_none());
    }

    #[tokio::test]
    async fn test_finalize_rejects_failing_validation() {
        let media: Arc<dyn MediaProcessor> = Arc::new(MockMediaProcessor::new());
        let step = FinalizeStep::new(media, Arc::new(MockValidator::failing("lip sync drift")));

        let job = test_job();
        let mut ctx = StepContext::new();
        ctx.put(StepOutput::AudioTrack {
            track_ref: "track://1".to_string(),
        });

        let err = step.execute(&job, &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("quality threshold"));
    }

    #[tokio::test]
    async fn test_finalize_records_video_ref() {
        let media: Arc<dyn MediaProcessor> = Arc::new(MockMediaProcessor::new());
        let step = FinalizeStep::new(media, Arc::new(MockValidator::passing()));

        let job = test_job();
        let mut ctx = StepContext::new();
        ctx.put(StepOutput::AudioTrack {
            track_ref: "track://1".to_string(),
        });

        step.execute(&job, &mut ctx).await.unwrap();
        assert!(ctx.video_ref().is_some());
    }

    #[tokio::test]
    async fn test_steps_demand_their_inputs() {
        let media: Arc<dyn MediaProcessor> = Arc::new(MockMediaProcessor::new());
        let job = test_job();
        let mut ctx = StepContext::new();

        let assemble = AssembleStep::new(media.clone());
        assert!(assemble.execute(&job, &mut ctx).await.is_err());

        let subtitles = SubtitleStep::new(Arc::new(MockTranslator::new()));
        assert!(subtitles.execute(&job, &mut ctx).await.is_err());
    }
}
