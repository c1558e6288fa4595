//! Weighted multi-stage processing pipeline. Stage bookkeeping (start/
//! progress/complete/error, weighted-aggregate progress) is driven both by
//! the upload session (for the `upload`/`validation`/`processing` stages,
//! which happen inline with chunk receipt and assembly) and internally, by
//! `run_handler_stages`, for the post-assembly `ocr`/`stt`/`embedding`/
//! `storage`/`cleanup` stages that have a registered `StageHandler`.

use super::dto::{Pipeline, PipelineStatus, PipelineTrigger, Stage, StageName, StageStatus};
use super::error::PipelineError;
use super::ports::{StageContext, StageHandler};
use crate::progress_bus::ProgressBus;
use dashmap::DashMap;
use kernel::FileId;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

pub struct PipelineOrchestrator {
    pipelines: DashMap<FileId, Pipeline>,
    handlers: HashMap<StageName, Arc<dyn StageHandler>>,
    progress_bus: Arc<ProgressBus>,
}

impl PipelineOrchestrator {
    pub fn new(handlers: HashMap<StageName, Arc<dyn StageHandler>>, progress_bus: Arc<ProgressBus>) -> Self {
        Self { pipelines: DashMap::new(), handlers, progress_bus }
    }

    pub fn init(&self, file_id: FileId, owner_id: impl Into<String>, trigger: &PipelineTrigger) -> Vec<StageName> {
        let stages = trigger.required_stages();
        let names = stages.iter().map(|s| s.name).collect();
        let pipeline = Pipeline::new(file_id.clone(), owner_id.into(), stages);
        self.pipelines.insert(file_id, pipeline);
        names
    }

    pub fn status(&self, file_id: &FileId) -> Option<Pipeline> {
        self.pipelines.get(file_id).map(|p| p.clone())
    }

    pub fn active_pipelines(&self) -> Vec<Pipeline> {
        self.pipelines
            .iter()
            .filter(|p| p.status == PipelineStatus::Running)
            .map(|p| p.clone())
            .collect()
    }

    pub fn start_stage(&self, file_id: &FileId, stage: StageName) -> Result<(), PipelineError> {
        let mut pipeline = self
            .pipelines
            .get_mut(file_id)
            .ok_or_else(|| PipelineError::UnknownPipeline(file_id.to_string()))?;
        let owner_id = pipeline.owner_id.clone();
        let s = pipeline
            .stage_mut(stage)
            .ok_or_else(|| PipelineError::UnknownStage { stage: stage.as_str().to_string() })?;
        s.status = StageStatus::Running;
        s.start_time = Some(OffsetDateTime::now_utc());
        pipeline.current_stage = Some(stage);
        info!(file_id = %file_id, owner_id = %owner_id, stage = stage.as_str(), "pipeline stage started");
        Ok(())
    }

    pub fn update_stage_progress(&self, file_id: &FileId, stage: StageName, progress: f64) -> Result<(), PipelineError> {
        let (owner_id, overall) = self.set_stage_progress(file_id, stage, progress)?;
        self.progress_bus.update_progress(
            file_id.clone(),
            owner_id,
            overall,
            0,
            0,
            Some(stage.as_str().to_string()),
        );
        Ok(())
    }

    /// Same bookkeeping as `update_stage_progress` — clamps, stores, and
    /// recomputes the weighted aggregate — but does not publish a
    /// `ProgressBus` event. Used by stages that already have their own
    /// progress notion to publish (e.g. `upload`, whose `received/total`
    /// fraction is the session-level `Progress` event spec.md §2's
    /// scenario-1 sequence expects) so a single chunk doesn't emit two
    /// differently-scaled `Progress` events.
    pub fn update_stage_progress_silent(
        &self,
        file_id: &FileId,
        stage: StageName,
        progress: f64,
    ) -> Result<(), PipelineError> {
        self.set_stage_progress(file_id, stage, progress).map(|_| ())
    }

    fn set_stage_progress(
        &self,
        file_id: &FileId,
        stage: StageName,
        progress: f64,
    ) -> Result<(String, f64), PipelineError> {
        let mut pipeline = self
            .pipelines
            .get_mut(file_id)
            .ok_or_else(|| PipelineError::UnknownPipeline(file_id.to_string()))?;
        let owner_id = pipeline.owner_id.clone();
        let s = pipeline
            .stage_mut(stage)
            .ok_or_else(|| PipelineError::UnknownStage { stage: stage.as_str().to_string() })?;
        s.progress = progress.clamp(0.0, 1.0);
        pipeline.recompute_progress();
        Ok((owner_id, pipeline.overall_progress))
    }

    pub fn complete_stage(&self, file_id: &FileId, stage: StageName) -> Result<(), PipelineError> {
        let mut pipeline = self
            .pipelines
            .get_mut(file_id)
            .ok_or_else(|| PipelineError::UnknownPipeline(file_id.to_string()))?;
        let owner_id = pipeline.owner_id.clone();
        let is_last = pipeline.is_last_stage(stage);
        let s = pipeline
            .stage_mut(stage)
            .ok_or_else(|| PipelineError::UnknownStage { stage: stage.as_str().to_string() })?;
        let now = OffsetDateTime::now_utc();
        s.status = StageStatus::Completed;
        s.progress = 1.0;
        s.end_time = Some(now);
        s.duration_ms = s.start_time.map(|start| (now - start).whole_milliseconds() as i64);
        pipeline.recompute_progress();
        if is_last {
            pipeline.status = PipelineStatus::Completed;
        }
        let overall = pipeline.overall_progress;
        info!(file_id = %file_id, owner_id = %owner_id, stage = stage.as_str(), "pipeline stage completed");
        drop(pipeline);

        self.progress_bus.update_progress(
            file_id.clone(),
            owner_id,
            overall,
            0,
            0,
            Some(stage.as_str().to_string()),
        );
        Ok(())
    }

    pub fn handle_stage_error(
        &self,
        file_id: &FileId,
        stage: StageName,
        message: impl Into<String>,
        retryable: bool,
    ) -> Result<(), PipelineError> {
        let message = message.into();
        let mut pipeline = self
            .pipelines
            .get_mut(file_id)
            .ok_or_else(|| PipelineError::UnknownPipeline(file_id.to_string()))?;
        let owner_id = pipeline.owner_id.clone();
        pipeline.errors.push(message.clone());
        let s = pipeline
            .stage_mut(stage)
            .ok_or_else(|| PipelineError::UnknownStage { stage: stage.as_str().to_string() })?;
        s.status = StageStatus::Error;
        s.error = Some(message.clone());
        if !retryable {
            pipeline.status = PipelineStatus::Failed;
        }
        warn!(file_id = %file_id, owner_id = %owner_id, stage = stage.as_str(), retryable, "pipeline stage failed");
        drop(pipeline);

        self.progress_bus.error_session(file_id.clone(), owner_id, message, retryable, Vec::new());
        Ok(())
    }

    /// Drives every registered stage that has no built-in upstream driver —
    /// `ocr`, `stt`, `embedding`, `storage`, `cleanup` — in canonical order,
    /// stopping at the first unrecoverable handler failure. Stages already
    /// `Completed` are skipped, so a caller can call this again after a
    /// retry decision and resume from the stage that failed instead of
    /// redoing finished work.
    pub async fn run_handler_stages(&self, file_id: &FileId, ctx: StageContext) -> Result<(), PipelineError> {
        let stage_names: Vec<StageName> = {
            let pipeline = self
                .pipelines
                .get(file_id)
                .ok_or_else(|| PipelineError::UnknownPipeline(file_id.to_string()))?;
            pipeline.stages.iter().filter(|s| s.status != StageStatus::Completed).map(|s| s.name).collect()
        };

        for stage in stage_names {
            let Some(handler) = self.handlers.get(&stage) else {
                continue;
            };

            self.start_stage(file_id, stage)?;
            let on_progress = |p: f64| {
                if let Err(err) = self.update_stage_progress(file_id, stage, p) {
                    warn!(file_id = %file_id, stage = stage.as_str(), %err, "progress callback on unknown stage");
                }
            };
            match handler.run(&ctx, &on_progress).await {
                Ok(()) => self.complete_stage(file_id, stage)?,
                Err(message) => {
                    // Tag the failure the same way RecoveryController would
                    // (spec.md §4.5's classification table) so the stage's
                    // `error` state reflects whether retrying could help,
                    // even though actually scheduling that retry is the
                    // caller's job (run_handler_stages only reports).
                    let (_, retryable) = crate::recovery::classify(&message);
                    self.handle_stage_error(file_id, stage, message, retryable)?;
                    return Err(PipelineError::HandlerFailed(stage.as_str().to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn remove(&self, file_id: &FileId) {
        self.pipelines.remove(file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress_bus::{ProgressEvent, ProgressSink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink;
    #[async_trait]
    impl ProgressSink for NullSink {
        async fn send(&self, _event: &ProgressEvent) -> bool {
            true
        }
    }

    struct StubHandler {
        fail: bool,
    }

    #[async_trait]
    impl StageHandler for StubHandler {
        async fn run(&self, _ctx: &StageContext, on_progress: &(dyn Fn(f64) + Send + Sync)) -> Result<(), String> {
            on_progress(0.5);
            if self.fail {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn orchestrator(handlers: HashMap<StageName, Arc<dyn StageHandler>>) -> PipelineOrchestrator {
        let bus = ProgressBus::new();
        let _sub = bus.subscribe("owner", Arc::new(NullSink));
        PipelineOrchestrator::new(handlers, bus)
    }

    #[test]
    fn init_selects_only_triggered_optional_stages() {
        let orch = orchestrator(HashMap::new());
        let trigger = PipelineTrigger { tool_resource: Some("ocr".to_string()), content_type: None };
        let stages = orch.init(FileId::from("f1"), "owner", &trigger);
        assert!(stages.contains(&StageName::Ocr));
        assert!(!stages.contains(&StageName::Stt));
        assert!(!stages.contains(&StageName::Embedding));
    }

    #[test]
    fn stage_weights_renormalize_to_one() {
        let orch = orchestrator(HashMap::new());
        let trigger = PipelineTrigger::default();
        orch.init(FileId::from("f1"), "owner", &trigger);
        let pipeline = orch.status(&FileId::from("f1")).unwrap();
        let total: f64 = pipeline.stages.iter().map(|s| s.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn completing_final_stage_marks_pipeline_completed() {
        let orch = orchestrator(HashMap::new());
        let trigger = PipelineTrigger::default();
        orch.init(FileId::from("f1"), "owner", &trigger);
        for stage in StageName::CANONICAL_ORDER {
            if orch.status(&FileId::from("f1")).unwrap().stage(stage).is_some() {
                orch.start_stage(&FileId::from("f1"), stage).unwrap();
                orch.complete_stage(&FileId::from("f1"), stage).unwrap();
            }
        }
        let pipeline = orch.status(&FileId::from("f1")).unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Completed);
        assert!((pipeline.overall_progress - 1.0).abs() < 1e-9);
    }

    #[test]
    fn non_retryable_stage_error_fails_pipeline() {
        let orch = orchestrator(HashMap::new());
        orch.init(FileId::from("f1"), "owner", &PipelineTrigger::default());
        orch.start_stage(&FileId::from("f1"), StageName::Validation).unwrap();
        orch.handle_stage_error(&FileId::from("f1"), StageName::Validation, "bad checksum", false).unwrap();
        let pipeline = orch.status(&FileId::from("f1")).unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Failed);
    }

    #[tokio::test]
    async fn run_handler_stages_stops_on_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handlers: HashMap<StageName, Arc<dyn StageHandler>> = HashMap::new();
        handlers.insert(StageName::Storage, Arc::new(StubHandler { fail: true }));
        handlers.insert(StageName::Cleanup, Arc::new(StubHandler { fail: false }));

        let orch = orchestrator(handlers);
        orch.init(FileId::from("f1"), "owner", &PipelineTrigger::default());

        let ctx = StageContext {
            file_id: FileId::from("f1"),
            file_path: std::path::PathBuf::from("/tmp/f1"),
            content_type: None,
        };
        let result = orch.run_handler_stages(&FileId::from("f1"), ctx).await;
        assert!(result.is_err());
        let pipeline = orch.status(&FileId::from("f1")).unwrap();
        assert_eq!(pipeline.stage(StageName::Cleanup).unwrap().status, StageStatus::Pending);
        let _ = calls;
    }
}
