use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use frameloops_evaluator::{Evaluation, EvaluationRequest, Evaluator, Neighbor};
use frameloops_generator::{ArtifactHandle, GenerationRequest, Generator, GeneratorError};
use frameloops_logging::{LogEvent, Logger, RunWriter};

use crate::metrics::{self, BatchMetrics};
use crate::mutation::RefinementPlan;
use crate::outcome::{RunOutcome, StopReason};
use crate::prioritizer;
use crate::{
    FrameSpec, FrameState, FrameStatus, RefinementConfig, RefinementError, SequenceGenerator,
};

/// A generation call scheduled for one frame in the process phase
struct GenerationJob {
    index: usize,
    previous_status: FrameStatus,
    request: GenerationRequest,
}

/// What came back for a job
enum JobResult {
    /// Interrupted before dispatch
    Skipped,
    Finished(Result<ArtifactHandle, GeneratorError>, Duration),
}

/// Orchestrates the generate-evaluate-refine loop over a frame sequence
pub struct RefinementRunner<'a> {
    generator: &'a dyn Generator,
    evaluator: &'a dyn Evaluator,
    logger: Arc<Logger>,
    run_writer: Option<Arc<RunWriter>>,
    sequence: SequenceGenerator,
    interrupted: Arc<AtomicBool>,
}

impl<'a> RefinementRunner<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        evaluator: &'a dyn Evaluator,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            generator,
            evaluator,
            logger,
            run_writer: None,
            sequence: SequenceGenerator::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record per-iteration metrics to a run file
    pub fn with_run_writer(mut self, writer: Arc<RunWriter>) -> Self {
        self.run_writer = Some(writer);
        self
    }

    /// Get a handle to signal interruption
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Run refinement over `specs` until the target is met, nothing is left
    /// to refine, the iteration budget is spent or the run is interrupted.
    ///
    /// Only invalid input is an error; generator and evaluator problems are
    /// recorded on the frames themselves.
    pub async fn run(
        &self,
        specs: Vec<FrameSpec>,
        config: &RefinementConfig,
    ) -> Result<RunOutcome, RefinementError> {
        config.validate()?;
        check_unique_ids(&specs)?;

        let started_at = Instant::now();
        let mut states: Vec<FrameState> = specs
            .into_iter()
            .map(|spec| FrameState::new(Arc::new(spec)))
            .collect();

        self.logger.log(&LogEvent::RunStarted {
            frames: states.len(),
            target_score: config.target_score,
            max_iterations: config.max_iterations,
            max_attempts_per_unit: config.max_attempts_per_unit,
        });

        let mut metrics = BatchMetrics::default();
        let mut iteration = 0;
        let mut targets: Vec<String> = Vec::new();

        let stop_reason = loop {
            if self.is_interrupted() {
                break StopReason::Cancelled;
            }

            self.settle_budgets(&mut states, iteration, config);

            self.logger.log(&LogEvent::IterationStarted {
                iteration,
                pending: states
                    .iter()
                    .filter(|s| s.current_artifact.is_none() && !s.is_terminal())
                    .count(),
                targets: std::mem::take(&mut targets),
            });

            self.process_phase(&mut states, iteration, config).await;

            if self.is_interrupted() {
                metrics = metrics::compute(&states, config.target_score);
                break StopReason::Cancelled;
            }

            self.evaluate_phase(&mut states, iteration, config).await;

            metrics = metrics::compute(&states, config.target_score);
            self.record_metrics(iteration, &metrics);
            iteration += 1;

            if self.is_interrupted() {
                break StopReason::Cancelled;
            }
            if metrics.units_evaluated > 0 && metrics.avg_continuity >= config.target_score {
                break StopReason::TargetReached;
            }
            if !states
                .iter()
                .any(|s| s.needs_processing(config.max_attempts_per_unit))
            {
                break StopReason::NoEligibleUnits;
            }
            if iteration >= config.max_iterations {
                break StopReason::MaxIterationsReached;
            }

            targets = prioritizer::select_targets(
                &states,
                config.target_score,
                config.max_attempts_per_unit,
            )
            .into_iter()
            .map(|s| s.id().to_string())
            .collect();
            debug!(iteration, targets = ?targets, "Selected refinement targets");
        };

        self.settle_budgets(&mut states, iteration.saturating_sub(1), config);

        let total_duration = started_at.elapsed();
        if stop_reason == StopReason::Cancelled {
            info!(iterations = iteration, "Refinement run cancelled");
            self.logger.log(&LogEvent::RunCancelled {
                iterations: iteration,
            });
        } else {
            info!(
                iterations = iteration,
                stop_reason = %stop_reason,
                avg_score = metrics.avg_score,
                "Refinement run finished"
            );
        }
        self.logger.log(&LogEvent::RunCompleted {
            iterations: iteration,
            stop_reason: stop_reason.to_string(),
            avg_score: metrics.avg_score,
            avg_continuity: metrics.avg_continuity,
            duration_secs: total_duration.as_secs_f64(),
        });

        Ok(RunOutcome {
            states,
            metrics,
            iterations: iteration,
            stop_reason,
            total_duration_secs: total_duration.as_secs_f64(),
        })
    }

    /// Force frames at their attempt ceiling to `Complete`
    fn settle_budgets(
        &self,
        states: &mut [FrameState],
        iteration: usize,
        config: &RefinementConfig,
    ) {
        for state in states.iter_mut() {
            if state.settle_budget(config.max_attempts_per_unit) {
                self.logger.log(&LogEvent::FrameCompleted {
                    iteration,
                    frame_id: state.id().to_string(),
                    score: state.current_score,
                    budget_exhausted: state
                        .budget_exhausted(config.target_score, config.max_attempts_per_unit),
                });
            }
        }
    }

    /// Generate or refine every frame that still needs it
    async fn process_phase(
        &self,
        states: &mut [FrameState],
        iteration: usize,
        config: &RefinementConfig,
    ) {
        let mut jobs = Vec::new();
        for (index, state) in states.iter_mut().enumerate() {
            if !state.needs_processing(config.max_attempts_per_unit) {
                continue;
            }

            let plan = match (&state.current_artifact, state.last_evaluation()) {
                (Some(artifact), Some(evaluation)) => {
                    RefinementPlan::refine(state.spec(), artifact, evaluation, config)
                }
                _ => RefinementPlan::initial(state.spec()),
            };

            let previous_status = state.status;
            state.status = if state.current_artifact.is_none() {
                FrameStatus::Generating
            } else {
                FrameStatus::Refining
            };

            jobs.push(GenerationJob {
                index,
                previous_status,
                request: GenerationRequest {
                    sequence: self.sequence.next_id(),
                    frame_id: state.id().to_string(),
                    prompt: plan.prompt,
                    references: plan.references,
                    mode: plan.mode,
                },
            });
        }

        if jobs.is_empty() {
            return;
        }

        let attempts: Vec<usize> = jobs
            .iter()
            .map(|job| states[job.index].attempt_count + 1)
            .collect();

        let generator = self.generator;
        let logger = &self.logger;
        let interrupted = &self.interrupted;
        let call_timeout = config.call_timeout;

        let mut results: Vec<(usize, JobResult)> = stream::iter(jobs.iter().enumerate())
            .map(|(position, job)| {
                let attempt = attempts[position];
                async move {
                    if interrupted.load(Ordering::SeqCst) {
                        return (position, JobResult::Skipped);
                    }
                    logger.log(&LogEvent::FrameGenerationStarted {
                        iteration,
                        frame_id: job.request.frame_id.clone(),
                        mode: job.request.mode.to_string(),
                        attempt,
                        prompt_preview: job.request.prompt.chars().take(100).collect(),
                    });
                    let started = Instant::now();
                    let result = generate_with_timeout(generator, &job.request, call_timeout).await;
                    (position, JobResult::Finished(result, started.elapsed()))
                }
            })
            .buffer_unordered(config.workers)
            .collect()
            .await;

        results.sort_by_key(|(position, _)| *position);

        for (position, result) in results {
            let job = &jobs[position];
            let state = &mut states[job.index];
            match result {
                JobResult::Skipped => {
                    state.status = job.previous_status;
                }
                JobResult::Finished(Ok(artifact), duration) => {
                    state.attempt_count += 1;
                    self.logger.log(&LogEvent::FrameGenerated {
                        iteration,
                        frame_id: state.id().to_string(),
                        artifact: artifact.to_string(),
                        duration_secs: duration.as_secs_f64(),
                    });
                    state.record_artifact(artifact);
                }
                JobResult::Finished(Err(e), _) => {
                    state.attempt_count += 1;
                    warn!(frame = state.id(), error = %e, "Frame generation failed");
                    self.logger.log(&LogEvent::FrameGenerationFailed {
                        iteration,
                        frame_id: state.id().to_string(),
                        error: e.to_string(),
                    });
                    state.record_failure(e.to_string());
                }
            }
        }
    }

    /// Evaluate every frame with an artifact against its neighbours
    async fn evaluate_phase(
        &self,
        states: &mut [FrameState],
        iteration: usize,
        config: &RefinementConfig,
    ) {
        let mut evaluations: Vec<(usize, Evaluation)> = {
            let window: &[FrameState] = states;
            let requests: Vec<(usize, EvaluationRequest<'_>)> = window
                .iter()
                .enumerate()
                .filter_map(|(index, state)| {
                    let artifact = state.current_artifact.as_ref()?;
                    Some((
                        index,
                        EvaluationRequest {
                            frame_id: state.id(),
                            artifact,
                            context: &state.spec().context_description,
                            previous: index
                                .checked_sub(1)
                                .and_then(|i| neighbor(&window[i])),
                            next: window.get(index + 1).and_then(neighbor),
                            iteration,
                        },
                    ))
                })
                .collect();

            let evaluator = self.evaluator;
            stream::iter(requests)
                .map(|(index, request)| async move { (index, evaluator.evaluate(request).await) })
                .buffer_unordered(config.workers)
                .collect()
                .await
        };

        evaluations.sort_by_key(|(index, _)| *index);

        for (index, evaluation) in evaluations {
            let previous_id = index
                .checked_sub(1)
                .and_then(|i| neighbor_id(&states[i]));
            let next_id = states.get(index + 1).and_then(neighbor_id);

            let summary = evaluation.short_description();
            let degraded = evaluation.is_degraded();

            let state = &mut states[index];
            state.record_evaluation(evaluation, previous_id.as_deref(), next_id.as_deref());
            self.logger.log(&LogEvent::FrameEvaluated {
                iteration,
                frame_id: state.id().to_string(),
                score: state.current_score,
                continuity_score: state.continuity_score,
                summary,
                degraded,
            });

            let fresh = state.status == FrameStatus::Evaluating;
            state.settle_evaluation(config.target_score, config.max_attempts_per_unit);
            if fresh && state.status == FrameStatus::Complete {
                self.logger.log(&LogEvent::FrameCompleted {
                    iteration,
                    frame_id: state.id().to_string(),
                    score: state.current_score,
                    budget_exhausted: false,
                });
            }
        }
    }

    fn record_metrics(&self, iteration: usize, metrics: &BatchMetrics) {
        self.logger.log(&LogEvent::MetricsComputed {
            iteration,
            avg_score: metrics.avg_score,
            avg_continuity: metrics.avg_continuity,
            min_score: metrics.min_score,
            units_above_threshold: metrics.units_above_threshold,
            units_evaluated: metrics.units_evaluated,
            continuity_breaks: metrics.continuity_breaks.len(),
        });

        if let Some(ref writer) = self.run_writer {
            writer.write_iteration(
                iteration,
                metrics.avg_score,
                metrics.avg_continuity,
                metrics.min_score,
                metrics.units_above_threshold,
                metrics.units_evaluated,
                metrics.units_failed,
                metrics.continuity_breaks.len(),
            );
        }
    }
}

async fn generate_with_timeout(
    generator: &dyn Generator,
    request: &GenerationRequest,
    call_timeout: Option<Duration>,
) -> Result<ArtifactHandle, GeneratorError> {
    match call_timeout {
        Some(limit) => tokio::time::timeout(limit, generator.generate(request))
            .await
            .unwrap_or(Err(GeneratorError::Timeout(limit))),
        None => generator.generate(request).await,
    }
}

fn neighbor(state: &FrameState) -> Option<Neighbor<'_>> {
    state.current_artifact.as_ref().map(|artifact| Neighbor {
        frame_id: state.id(),
        artifact,
        context: &state.spec().context_description,
    })
}

fn neighbor_id(state: &FrameState) -> Option<String> {
    state
        .current_artifact
        .as_ref()
        .map(|_| state.id().to_string())
}

fn check_unique_ids(specs: &[FrameSpec]) -> Result<(), RefinementError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.id.as_str()) {
            return Err(RefinementError::DuplicateFrameId(spec.id.clone()));
        }
    }
    Ok(())
}
