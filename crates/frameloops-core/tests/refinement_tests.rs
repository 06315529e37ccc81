use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use frameloops_core::{
    FrameSpec, FrameStatus, RefinementConfig, RefinementError, RefinementRunner, StopReason,
};
use frameloops_evaluator::{
    ContinuityTarget, Evaluation, EvaluationRequest, Evaluator, FixCategory, FixItem, FixPriority,
};
use frameloops_generator::{
    ArtifactHandle, GenerationMode, GenerationRequest, Generator, GeneratorError,
};
use frameloops_logging::{LogFormat, Logger, RunLine, RunWriter};

// ============================================================
// Test doubles
// ============================================================

/// Generator that succeeds unless told to fail a given call for a frame.
#[derive(Default)]
struct ScriptedGenerator {
    /// (frame id, 1-based call number) pairs that fail
    failures: Vec<(String, usize)>,
    delay: Option<Duration>,
    cancel_on_first_call: Mutex<Option<Arc<AtomicBool>>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn failing(frame_id: &str, call: usize) -> Self {
        Self {
            failures: vec![(frame_id.to_string(), call)],
            ..Default::default()
        }
    }

    fn calls_for(&self, frame_id: &str) -> Vec<GenerationRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.frame_id == frame_id)
            .cloned()
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ArtifactHandle, GeneratorError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.iter().filter(|r| r.frame_id == request.frame_id).count()
        };

        let trip = self.cancel_on_first_call.lock().unwrap().take();
        if let Some(flag) = trip {
            flag.store(true, Ordering::SeqCst);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .failures
            .iter()
            .any(|(id, n)| id == &request.frame_id && *n == call_number)
        {
            return Err(GeneratorError::ExecutionFailed("model refused".to_string()));
        }

        Ok(ArtifactHandle::new(request.output_stem()))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

type Script = Box<dyn Fn(&EvaluationRequest<'_>) -> Evaluation + Send + Sync>;

/// Evaluator driven by a closure; records each continuity window it saw.
struct ScriptedEvaluator {
    script: Script,
    windows: Mutex<Vec<(String, Option<String>, Option<String>)>>,
}

impl ScriptedEvaluator {
    fn new<F>(script: F) -> Self
    where
        F: Fn(&EvaluationRequest<'_>) -> Evaluation + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            windows: Mutex::new(Vec::new()),
        }
    }

    fn constant(score: f64) -> Self {
        Self::new(move |_| Evaluation::new(score))
    }

    fn call_count(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn evaluate(&self, request: EvaluationRequest<'_>) -> Evaluation {
        self.windows.lock().unwrap().push((
            request.frame_id.to_string(),
            request.previous.map(|n| n.frame_id.to_string()),
            request.next.map(|n| n.frame_id.to_string()),
        ));
        (self.script)(&request)
    }
}

fn quiet_logger() -> Arc<Logger> {
    Arc::new(Logger::new(LogFormat::Quiet))
}

fn frames(ids: &[&str]) -> Vec<FrameSpec> {
    ids.iter()
        .map(|id| {
            FrameSpec::new(*id, format!("storyboard frame {id}"), format!("intent of {id}"))
                .with_group("scene_1")
                .with_reference(format!("refs/{id}.png").as_str())
        })
        .collect()
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn test_single_frame_meeting_target_stops_after_first_iteration() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::constant(9.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());

    let outcome = runner
        .run(frames(&["a"]), &RefinementConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.stop_reason, StopReason::TargetReached);
    assert_eq!(outcome.states[0].status, FrameStatus::Complete);
    assert_eq!(outcome.metrics.avg_score, 9.0);
    assert_eq!(outcome.metrics.units_above_threshold, 1);
    assert_eq!(generator.total_calls(), 1);
    assert_eq!(outcome.exit_code(8.0), 0);
}

#[tokio::test]
async fn test_budget_exhausted_frame_is_forced_complete() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::new(|_| Evaluation::new(2.0).requiring_regeneration());
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());
    let config = RefinementConfig::default()
        .with_max_attempts(3)
        .with_max_iterations(10);

    let outcome = runner.run(frames(&["a"]), &config).await.unwrap();
    let frame = &outcome.states[0];

    assert_eq!(frame.status, FrameStatus::Complete);
    assert_eq!(frame.attempt_count, 3);
    assert!(frame.budget_exhausted(config.target_score, config.max_attempts_per_unit));
    assert!(frame.current_score < config.target_score);
    assert_eq!(frame.score_progression(), vec![2.0, 2.0, 2.0]);
    assert_eq!(outcome.stop_reason, StopReason::NoEligibleUnits);
    assert_eq!(outcome.iterations, 3);

    // Every refinement was a full regeneration from the original references
    let calls = generator.calls_for("a");
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.mode == GenerationMode::Create));
    assert!(calls
        .iter()
        .all(|c| c.references == vec![ArtifactHandle::new("refs/a.png")]));
}

#[tokio::test]
async fn test_continuity_issue_penalises_frame_and_is_reported() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::new(|request| {
        if request.frame_id == "b" {
            Evaluation::new(9.0).with_fix(
                FixItem::new(
                    FixCategory::Continuity,
                    FixPriority::Major,
                    "lantern missing compared to a",
                    "add the lantern back",
                )
                .against(ContinuityTarget::Previous),
            )
        } else {
            Evaluation::new(9.0)
        }
    });
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());

    let outcome = runner
        .run(frames(&["a", "b", "c"]), &RefinementConfig::default())
        .await
        .unwrap();

    let b = &outcome.states[1];
    assert_eq!(b.current_score, 9.0);
    assert_eq!(b.continuity_score, 8.0);

    let breaks = &outcome.metrics.continuity_breaks;
    assert_eq!(breaks.len(), 1);
    assert_eq!(breaks[0].frame_id, "b");
    assert_eq!(breaks[0].neighbor_id.as_deref(), Some("a"));
    assert_eq!(breaks[0].issue, "lantern missing compared to a");

    // Continuity windows follow sequence adjacency
    let mut windows = evaluator.windows.lock().unwrap().clone();
    windows.sort();
    assert_eq!(
        windows,
        vec![
            ("a".to_string(), None, Some("b".to_string())),
            ("b".to_string(), Some("a".to_string()), Some("c".to_string())),
            ("c".to_string(), Some("b".to_string()), None),
        ]
    );
}

#[tokio::test]
async fn test_generation_failure_is_terminal_and_isolated() {
    let generator = ScriptedGenerator::failing("x", 1);
    let evaluator = ScriptedEvaluator::constant(6.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());
    let config = RefinementConfig::default()
        .with_max_attempts(3)
        .with_max_iterations(4);

    let outcome = runner
        .run(frames(&["w", "x", "y"]), &config)
        .await
        .unwrap();

    let x = &outcome.states[1];
    assert_eq!(x.status, FrameStatus::Failed);
    assert_eq!(x.attempt_count, 1);
    assert!(x.current_artifact.is_none());
    assert!(x.error.as_deref().unwrap_or_default().contains("model refused"));
    assert_eq!(generator.calls_for("x").len(), 1);

    for other in [&outcome.states[0], &outcome.states[2]] {
        assert_eq!(other.attempt_count, 3);
        assert_eq!(other.status, FrameStatus::Complete);
        assert!(other.error.is_none());
    }
    assert_eq!(outcome.metrics.units_failed, 1);
    assert_eq!(outcome.metrics.units_evaluated, 2);
    assert_eq!(outcome.exit_code(config.target_score), 2);
}

#[tokio::test]
async fn test_refinement_after_failed_edit_keeps_last_artifact() {
    // Second call (an edit) fails; the first artifact stays current
    let generator = ScriptedGenerator::failing("a", 2);
    let evaluator = ScriptedEvaluator::constant(6.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());

    let outcome = runner
        .run(frames(&["a"]), &RefinementConfig::default())
        .await
        .unwrap();
    let frame = &outcome.states[0];

    assert_eq!(frame.status, FrameStatus::Failed);
    assert_eq!(frame.attempt_count, 2);
    assert_eq!(frame.artifact_history.len(), 1);
    assert_eq!(frame.current_artifact, frame.artifact_history.first().cloned());
    assert_eq!(outcome.metrics.units_evaluated, 1);
}

// ============================================================
// Regenerate vs edit
// ============================================================

#[tokio::test]
async fn test_close_frames_are_edited_with_fixes_and_latest_artifact() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::new(|request| {
        if request.artifact.as_str().ends_with("0001") {
            Evaluation::new(6.5).with_fix(
                FixItem::new(
                    FixCategory::Pose,
                    FixPriority::Critical,
                    "subject is sitting",
                    "make the knight stand",
                )
                .preserving(["armor"]),
            )
        } else {
            Evaluation::new(8.5)
        }
    });
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());

    let outcome = runner
        .run(frames(&["a"]), &RefinementConfig::default())
        .await
        .unwrap();

    let calls = generator.calls_for("a");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].mode, GenerationMode::Create);
    assert_eq!(calls[0].prompt, "storyboard frame a");

    let edit = &calls[1];
    assert_eq!(edit.mode, GenerationMode::Edit);
    assert_eq!(
        edit.references,
        vec![
            ArtifactHandle::new("refs/a.png"),
            ArtifactHandle::new("a_0001"),
        ]
    );
    assert!(edit.prompt.starts_with("storyboard frame a"));
    assert!(edit.prompt.contains("CRITICAL FIXES TO APPLY:\n- make the knight stand"));
    assert!(edit.prompt.contains("PRESERVE EXACTLY: armor"));
    assert!(edit.prompt.contains("do not show the subject seated or sitting"));

    assert_eq!(outcome.states[0].status, FrameStatus::Complete);
    assert_eq!(outcome.states[0].score_progression(), vec![6.5, 8.5]);
    assert_eq!(outcome.states[0].attempt_count, 2);
}

// ============================================================
// Properties
// ============================================================

#[tokio::test]
async fn test_run_terminates_within_budgets() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::constant(1.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());

    for (iterations, attempts) in [(1, 1), (2, 5), (5, 2), (6, 6)] {
        let config = RefinementConfig::default()
            .with_max_iterations(iterations)
            .with_max_attempts(attempts)
            .with_workers(2);
        let before = generator.total_calls();

        let outcome = runner
            .run(frames(&["a", "b", "c", "d"]), &config)
            .await
            .unwrap();

        assert!(outcome.iterations <= iterations);
        assert!(outcome
            .states
            .iter()
            .all(|s| s.attempt_count <= attempts && s.attempt_count <= iterations));
        assert!(generator.total_calls() - before <= 4 * attempts.min(iterations));
        assert!(outcome
            .states
            .iter()
            .all(|s| s.continuity_score <= s.current_score && s.continuity_score >= 0.0));
    }
}

#[tokio::test]
async fn test_output_covers_every_frame_in_input_order() {
    let generator = ScriptedGenerator::failing("c", 1);
    let evaluator = ScriptedEvaluator::new(|request| {
        let score = match request.frame_id {
            "a" => 3.0,
            "b" => 9.5,
            _ => 7.0,
        };
        Evaluation::new(score)
    });
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());
    let ids = ["e", "a", "d", "c", "b"];

    let outcome = runner
        .run(frames(&ids), &RefinementConfig::default().with_workers(3))
        .await
        .unwrap();

    let returned: Vec<&str> = outcome.states.iter().map(|s| s.id()).collect();
    assert_eq!(returned, ids);
    assert_eq!(outcome.summaries().len(), ids.len());
}

#[tokio::test]
async fn test_degraded_evaluations_do_not_stop_the_batch() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::new(|_| Evaluation::degraded("vision model unavailable"));
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());
    let config = RefinementConfig::default().with_max_attempts(2);

    let outcome = runner.run(frames(&["a", "b"]), &config).await.unwrap();

    for state in &outcome.states {
        assert_eq!(state.status, FrameStatus::Complete);
        assert_eq!(state.attempt_count, 2);
        assert_eq!(state.current_score, 5.0);
        assert!(state.last_evaluation().unwrap().is_degraded());
    }
    assert_eq!(outcome.metrics.avg_score, 5.0);
}

#[tokio::test]
async fn test_iteration_budget_stops_run_with_frames_still_refining() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::constant(6.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());
    let config = RefinementConfig::default()
        .with_max_iterations(2)
        .with_max_attempts(5);

    let outcome = runner.run(frames(&["a", "b"]), &config).await.unwrap();

    assert_eq!(outcome.stop_reason, StopReason::MaxIterationsReached);
    assert_eq!(outcome.iterations, 2);
    for state in &outcome.states {
        assert_eq!(state.status, FrameStatus::Refining);
        assert_eq!(state.attempt_count, 2);
        assert!(!state.budget_exhausted(config.target_score, config.max_attempts_per_unit));
    }
    assert_eq!(generator.total_calls(), 4);
    assert_eq!(outcome.exit_code(config.target_score), 1);
}

#[tokio::test]
async fn test_completed_frame_keeps_settled_score_when_rescored_lower() {
    let generator = ScriptedGenerator::default();
    let a_evaluations = Mutex::new(0usize);
    let evaluator = ScriptedEvaluator::new(move |request| {
        if request.frame_id == "a" {
            let mut seen = a_evaluations.lock().unwrap();
            *seen += 1;
            if *seen == 1 {
                return Evaluation::new(9.0);
            }
        }
        Evaluation::new(5.0)
    });
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());
    let config = RefinementConfig::default().with_max_attempts(3);

    let outcome = runner.run(frames(&["a", "b"]), &config).await.unwrap();

    let a = &outcome.states[0];
    assert_eq!(a.status, FrameStatus::Complete);
    assert_eq!(a.attempt_count, 1);
    assert_eq!(a.current_score, 9.0);
    assert_eq!(a.score_progression(), vec![9.0, 5.0, 5.0]);
    assert!(!a.budget_exhausted(config.target_score, config.max_attempts_per_unit));

    let b = &outcome.states[1];
    assert_eq!(b.status, FrameStatus::Complete);
    assert_eq!(b.attempt_count, 3);
    assert!(b.budget_exhausted(config.target_score, config.max_attempts_per_unit));

    // Every complete frame met the target or used its whole budget
    assert!(outcome.states.iter().all(|s| s.status != FrameStatus::Complete
        || s.meets_target(config.target_score)
        || s.attempt_count >= config.max_attempts_per_unit));
    assert_eq!(generator.calls_for("a").len(), 1);
}

// ============================================================
// Cancellation, timeouts and invalid input
// ============================================================

#[tokio::test]
async fn test_cancellation_mid_generate_leaves_consistent_states() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::constant(9.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());
    *generator.cancel_on_first_call.lock().unwrap() = Some(runner.interrupt_handle());

    let outcome = runner
        .run(
            frames(&["a", "b", "c"]),
            &RefinementConfig::default().with_workers(1),
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert_eq!(outcome.states.len(), 3);
    assert_eq!(generator.total_calls(), 1);
    assert_eq!(evaluator.call_count(), 0);

    let a = &outcome.states[0];
    assert_eq!(a.status, FrameStatus::Evaluating);
    assert_eq!(a.attempt_count, 1);
    assert!(a.current_artifact.is_some());

    for state in &outcome.states[1..] {
        assert_eq!(state.status, FrameStatus::Pending);
        assert_eq!(state.attempt_count, 0);
        assert!(state.current_artifact.is_none());
    }
    assert_eq!(outcome.exit_code(8.0), 130);
}

#[tokio::test]
async fn test_interrupt_before_run_returns_untouched_frames() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::constant(9.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());
    runner.interrupt_handle().store(true, Ordering::SeqCst);

    let outcome = runner
        .run(frames(&["a", "b"]), &RefinementConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert_eq!(outcome.iterations, 0);
    assert!(outcome
        .states
        .iter()
        .all(|s| s.status == FrameStatus::Pending));
    assert_eq!(generator.total_calls(), 0);
}

#[tokio::test]
async fn test_generator_timeout_counts_as_failure() {
    let generator = ScriptedGenerator {
        delay: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let evaluator = ScriptedEvaluator::constant(9.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());
    let config = RefinementConfig::default().with_call_timeout(Duration::from_millis(20));

    let outcome = runner.run(frames(&["a"]), &config).await.unwrap();
    let frame = &outcome.states[0];

    assert_eq!(frame.status, FrameStatus::Failed);
    assert_eq!(frame.attempt_count, 1);
    assert!(frame.error.as_deref().unwrap_or_default().contains("timed out"));
    assert_eq!(outcome.stop_reason, StopReason::NoEligibleUnits);
}

#[tokio::test]
async fn test_duplicate_frame_ids_rejected() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::constant(9.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());

    let result = runner
        .run(frames(&["a", "b", "a"]), &RefinementConfig::default())
        .await;

    assert!(matches!(result, Err(RefinementError::DuplicateFrameId(id)) if id == "a"));
    assert_eq!(generator.total_calls(), 0);
}

#[tokio::test]
async fn test_empty_sequence_yields_zeroed_metrics() {
    let generator = ScriptedGenerator::default();
    let evaluator = ScriptedEvaluator::constant(9.0);
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger());

    let outcome = runner
        .run(Vec::new(), &RefinementConfig::default())
        .await
        .unwrap();

    assert!(outcome.states.is_empty());
    assert_eq!(outcome.metrics.avg_score, 0.0);
    assert_eq!(outcome.stop_reason, StopReason::NoEligibleUnits);
}

// ============================================================
// Run record
// ============================================================

#[tokio::test]
async fn test_run_writer_records_each_iteration() {
    let dir = tempfile::TempDir::new().unwrap();
    let ids = vec!["a".to_string(), "b".to_string()];
    let writer = Arc::new(RunWriter::in_dir(dir.path(), &ids).unwrap());

    let generator = ScriptedGenerator::default();
    let scores: Mutex<HashMap<String, f64>> = Mutex::new(HashMap::new());
    let evaluator = ScriptedEvaluator::new(move |request| {
        let mut scores = scores.lock().unwrap();
        let score = scores.entry(request.frame_id.to_string()).or_insert(5.0);
        *score += 2.0;
        Evaluation::new(*score)
    });
    let runner = RefinementRunner::new(&generator, &evaluator, quiet_logger())
        .with_run_writer(writer.clone());

    let outcome = runner
        .run(frames(&["a", "b"]), &RefinementConfig::default())
        .await
        .unwrap();
    writer.write_end(
        &outcome.stop_reason.to_string(),
        outcome.iterations,
        outcome.total_duration_secs,
        &outcome.summaries(),
    );

    // 7.0 then 9.0 for both frames
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.stop_reason, StopReason::TargetReached);

    let content = std::fs::read_to_string(writer.path()).unwrap();
    let lines: Vec<RunLine> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let iterations = lines
        .iter()
        .filter(|line| matches!(line, RunLine::Iteration { .. }))
        .count();
    assert_eq!(iterations, 2);
    match lines.last().unwrap() {
        RunLine::RunEnd { frames, .. } => {
            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0]["score_progression"], serde_json::json!([7.0, 9.0]));
        }
        other => panic!("unexpected line: {:?}", other),
    }
}
