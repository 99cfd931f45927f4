// End-to-end tests for the inference pipeline
// These tests use synthetic WAV clips and a deterministic stand-in model

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use hound::{SampleFormat, WavSpec, WavWriter};
    use ndarray::{s, ArrayView4};

    use crate::audio::AudioFormat;
    use crate::classifier::{ClassifierError, Emotion, EmotionModel, NUM_EMOTIONS};
    use crate::features::{FeatureConfig, FeatureError, N_FRAMES, N_MFCC};
    use crate::pipeline::{FailureState, InferencePipeline, PipelineError};
    use crate::trend::{CsvTrendStore, SessionTrendTracker};

    // Logits from the mean of eight groups of five cepstral bands
    struct BandMeanModel {
        calls: Arc<AtomicUsize>,
    }

    impl EmotionModel for BandMeanModel {
        fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(input.shape(), &[1, N_MFCC, N_FRAMES, 1]);

            let per_group = N_MFCC / NUM_EMOTIONS;
            Ok((0..NUM_EMOTIONS)
                .map(|g| {
                    let group = input.slice(s![0, g * per_group..(g + 1) * per_group, .., 0]);
                    group.mean().unwrap_or(0.0) / 100.0
                })
                .collect())
        }

        fn name(&self) -> &str {
            "band-mean"
        }
    }

    // Always answers with a fixed distribution
    struct FixedModel([f32; NUM_EMOTIONS]);

    impl EmotionModel for FixedModel {
        fn infer(&self, _input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ClassifierError> {
            Ok(self.0.to_vec())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn pipeline_with(model: Box<dyn EmotionModel>, tracker: SessionTrendTracker) -> InferencePipeline {
        InferencePipeline::new(model, tracker, FeatureConfig::default()).unwrap()
    }

    fn band_mean_pipeline() -> (InferencePipeline, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = BandMeanModel {
            calls: Arc::clone(&calls),
        };
        (
            pipeline_with(Box::new(model), SessionTrendTracker::in_memory()),
            calls,
        )
    }

    fn wav_bytes(samples: &[f32], channels: u16, sample_rate: u32) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                for _ in 0..channels {
                    writer.write_sample((s * 32767.0) as i16).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    // Generate a speech-like signal (sine waves)
    fn generate_speech_signal(samples: usize, sample_rate: u32) -> Vec<f32> {
        (0..samples)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let f1 = (2.0 * std::f32::consts::PI * 200.0 * t).sin() * 0.4;
                let f2 = (2.0 * std::f32::consts::PI * 400.0 * t).sin() * 0.3;
                let f3 = (2.0 * std::f32::consts::PI * 800.0 * t).sin() * 0.2;
                f1 + f2 + f3
            })
            .collect()
    }

    #[test]
    fn test_one_second_of_silence_at_any_rate() {
        let (pipeline, _) = band_mean_pipeline();

        for rate in [8000u32, 16000, 22050, 44100, 48000] {
            let bytes = wav_bytes(&vec![0.0; rate as usize], 1, rate);

            let prediction = pipeline
                .classify(&bytes, Some(AudioFormat::Wav))
                .unwrap_or_else(|e| panic!("{} Hz silence failed: {}", rate, e));

            let sum: f32 = prediction.result.confidences.iter().sum();
            assert!((sum - 1.0).abs() < 1e-3, "{} Hz: confidences sum to {}", rate, sum);
            assert!(prediction.result.confidences.iter().all(|c| c.is_finite()));
            assert!(prediction.logged);
        }

        assert_eq!(pipeline.trend().len(), 5);
    }

    #[test]
    fn test_silence_features_have_fixed_shape() {
        let (pipeline, _) = band_mean_pipeline();
        let loader = crate::audio::AudioLoader::default();

        for rate in [8000u32, 44100] {
            let bytes = wav_bytes(&vec![0.0; rate as usize], 2, rate);
            let clip = loader.load_bytes(&bytes, None).unwrap();
            let features = pipeline.extractor().extract(&clip).unwrap();

            assert_eq!(features.shape(), (N_MFCC, N_FRAMES));
            assert!(features.view().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_empty_buffer_is_a_decode_error_and_not_recorded() {
        let (pipeline, calls) = band_mean_pipeline();

        let err = pipeline.classify(&[], None).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(err.failure_state(), Some(FailureState::DecodeFailed));

        assert!(pipeline.trend().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_audio_input_is_a_decode_error() {
        let (pipeline, _) = band_mean_pipeline();

        let err = pipeline
            .classify(b"<html>not audio</html>", None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));

        let err = pipeline
            .classify(b"<html>not audio</html>", Some(AudioFormat::Wav))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(pipeline.trend().is_empty());
    }

    #[test]
    fn test_trend_follows_request_order() {
        let dir = tempfile::tempdir().unwrap();
        let tracker =
            SessionTrendTracker::open(CsvTrendStore::open(dir.path().join("trend.csv")).unwrap())
                .unwrap();
        let pipeline = pipeline_with(
            Box::new(FixedModel([0.1, 0.1, 0.5, 0.1, 0.1, 0.05, 0.05, 0.0])),
            tracker,
        );

        let bytes = wav_bytes(&generate_speech_signal(22050, 22050), 1, 22050);
        pipeline.classify(&bytes, None).unwrap();
        pipeline.classify(&bytes, None).unwrap();

        let labels: Vec<Emotion> = pipeline.trend().labels().collect();
        assert_eq!(labels, vec![Emotion::Happy, Emotion::Happy]);
    }

    #[test]
    fn test_persistence_failure_still_returns_result() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let tracker =
            SessionTrendTracker::open(CsvTrendStore::open(log_dir.join("trend.csv")).unwrap())
                .unwrap();
        let pipeline = pipeline_with(
            Box::new(FixedModel([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0])),
            tracker,
        );

        // Pull the log directory out from under the store
        std::fs::remove_dir_all(&log_dir).unwrap();

        assert!(pipeline.tracker().record(Emotion::Calm).is_err());

        let bytes = wav_bytes(&generate_speech_signal(16000, 16000), 1, 16000);
        let prediction = pipeline.classify(&bytes, None).unwrap();
        assert_eq!(prediction.result.label, Emotion::Surprised);
        assert!(!prediction.logged);
        assert!(pipeline.trend().is_empty());
    }

    #[test]
    fn test_long_clip_is_classified() {
        let (pipeline, calls) = band_mean_pipeline();
        let bytes = wav_bytes(&generate_speech_signal(44100 * 7, 44100), 2, 44100);

        let prediction = pipeline.classify(&bytes, None).unwrap();
        let sum: f32 = prediction.result.confidences.iter().sum();
        assert!((sum - 1.0).abs() < 1e-3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_clip_gives_same_confidences() {
        let (pipeline, _) = band_mean_pipeline();
        let bytes = wav_bytes(&generate_speech_signal(30000, 22050), 1, 22050);

        let a = pipeline.classify(&bytes, None).unwrap();
        let b = pipeline.classify(&bytes, None).unwrap();
        assert_eq!(a.result, b.result);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_classify_file() {
        let (pipeline, _) = band_mean_pipeline();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, wav_bytes(&generate_speech_signal(22050, 44100), 1, 44100)).unwrap();

        assert!(pipeline.classify_file(&path).is_ok());
        assert!(matches!(
            pipeline.classify_file(&dir.path().join("missing.wav")),
            Err(PipelineError::Decode(_))
        ));
        assert_eq!(pipeline.trend().len(), 1);
    }

    #[test]
    fn test_bad_model_output_is_classify_unavailable() {
        struct BrokenModel;

        impl EmotionModel for BrokenModel {
            fn infer(&self, _input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ClassifierError> {
                Ok(vec![0.5; 3])
            }

            fn name(&self) -> &str {
                "broken"
            }
        }

        let pipeline = pipeline_with(Box::new(BrokenModel), SessionTrendTracker::in_memory());
        let bytes = wav_bytes(&generate_speech_signal(22050, 22050), 1, 22050);

        let err = pipeline.classify(&bytes, None).unwrap_err();
        assert_eq!(err.failure_state(), Some(FailureState::ClassifyUnavailable));
        assert!(pipeline.trend().is_empty());
    }

    #[test]
    fn test_pipeline_is_shareable_across_threads() {
        let (pipeline, calls) = band_mean_pipeline();
        let pipeline = Arc::new(pipeline);
        let bytes = Arc::new(wav_bytes(&generate_speech_signal(11025, 22050), 1, 22050));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                let bytes = Arc::clone(&bytes);
                std::thread::spawn(move || pipeline.classify(&bytes, None).map(|p| p.logged))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().unwrap());
        }
        assert_eq!(pipeline.trend().len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_feature_rate_other_than_loader_rate_is_rejected() {
        let features = FeatureConfig {
            sample_rate: 16000,
            ..Default::default()
        };
        let model = Box::new(FixedModel([0.125; NUM_EMOTIONS]));
        let result = InferencePipeline::new(model, SessionTrendTracker::in_memory(), features);
        assert!(matches!(
            result,
            Err(PipelineError::FeatureExtraction(FeatureError::Config(_)))
        ));
    }

    #[test]
    fn test_flac_clip_is_classified() {
        let (pipeline, calls) = band_mean_pipeline();
        let bytes = include_bytes!("audio/testdata/tone_44k_stereo.flac");

        let prediction = pipeline.classify(bytes, None).unwrap();
        assert!(prediction.logged);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.trend().len(), 1);
    }

    #[test]
    fn test_prediction_json_has_label_keyed_confidences() {
        let mut probabilities = [0.0; NUM_EMOTIONS];
        probabilities[Emotion::Sad.index()] = 1.0;
        let pipeline = pipeline_with(
            Box::new(FixedModel(probabilities)),
            SessionTrendTracker::in_memory(),
        );
        let bytes = wav_bytes(&generate_speech_signal(22050, 22050), 1, 22050);

        let prediction = pipeline.classify(&bytes, None).unwrap();
        let value = serde_json::to_value(&prediction).unwrap();
        assert_eq!(value["label"], "sad");
        assert_eq!(value["confidences"]["sad"], 1.0);
        assert_eq!(value["confidences"]["neutral"], 0.0);
        assert_eq!(value["logged"], true);
        assert!(value["request_id"].is_string());
    }
}
