use kernel::FileId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Canonical stage order from the stage table in spec.md §4.4. Order here
/// doubles as the execution order `PipelineOrchestrator::init` filters down
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Upload,
    Validation,
    Processing,
    Ocr,
    Stt,
    Embedding,
    Storage,
    Cleanup,
}

impl StageName {
    pub const CANONICAL_ORDER: [StageName; 8] = [
        StageName::Upload,
        StageName::Validation,
        StageName::Processing,
        StageName::Ocr,
        StageName::Stt,
        StageName::Embedding,
        StageName::Storage,
        StageName::Cleanup,
    ];

    pub fn default_weight(self) -> f64 {
        match self {
            StageName::Upload => 0.10,
            StageName::Validation => 0.05,
            StageName::Processing => 0.30,
            StageName::Ocr => 0.20,
            StageName::Stt => 0.15,
            StageName::Embedding => 0.10,
            StageName::Storage => 0.05,
            StageName::Cleanup => 0.05,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Upload => "upload",
            StageName::Validation => "validation",
            StageName::Processing => "processing",
            StageName::Ocr => "ocr",
            StageName::Stt => "stt",
            StageName::Embedding => "embedding",
            StageName::Storage => "storage",
            StageName::Cleanup => "cleanup",
        }
    }

    pub fn parse(name: &str) -> Option<StageName> {
        Self::CANONICAL_ORDER.into_iter().find(|s| s.as_str() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: StageName,
    pub weight: f64,
    pub status: StageStatus,
    pub progress: f64,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl Stage {
    fn new(name: StageName, weight: f64) -> Self {
        Self {
            name,
            weight,
            status: StageStatus::Pending,
            progress: 0.0,
            start_time: None,
            end_time: None,
            duration_ms: None,
            error: None,
        }
    }

    /// `stageProgress = 1` if completed, `= stage.progress` if running, `= 0`
    /// otherwise (spec.md §4.4).
    fn effective_progress(&self) -> f64 {
        match self.status {
            StageStatus::Completed => 1.0,
            StageStatus::Running => self.progress,
            StageStatus::Pending | StageStatus::Error => 0.0,
        }
    }
}

/// Metadata used to select which optional stages apply to a file, mirroring
/// `UploadSession.metadata.{toolResource,type}`.
#[derive(Debug, Clone, Default)]
pub struct PipelineTrigger {
    pub tool_resource: Option<String>,
    pub content_type: Option<String>,
}

impl PipelineTrigger {
    /// Builds the stage list for one file: baseline stages (always present)
    /// plus whichever optional stages this metadata demands, in canonical
    /// order. Weights are normalized by the sum over *this* pipeline's
    /// stage list, not the global table (spec.md §3).
    pub fn required_stages(&self) -> Vec<Stage> {
        let is_ocr = self.tool_resource.as_deref() == Some("ocr");
        let is_audio = self.content_type.as_deref().is_some_and(|t| t.starts_with("audio/"));
        let is_file_search = self.tool_resource.as_deref() == Some("file_search");

        let mut stages: Vec<Stage> = StageName::CANONICAL_ORDER
            .into_iter()
            .filter(|name| match name {
                StageName::Ocr => is_ocr,
                StageName::Stt => is_audio,
                StageName::Embedding => is_file_search,
                _ => true,
            })
            .map(|name| Stage::new(name, name.default_weight()))
            .collect();

        let total_weight: f64 = stages.iter().map(|s| s.weight).sum();
        if total_weight > 0.0 {
            for stage in &mut stages {
                stage.weight /= total_weight;
            }
        }
        stages
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub file_id: FileId,
    pub owner_id: String,
    pub stages: Vec<Stage>,
    pub current_stage: Option<StageName>,
    pub start_time: OffsetDateTime,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub overall_progress: f64,
    pub status: PipelineStatus,
}

impl Pipeline {
    pub fn new(file_id: FileId, owner_id: String, stages: Vec<Stage>) -> Self {
        Self {
            file_id,
            owner_id,
            stages,
            current_stage: None,
            start_time: OffsetDateTime::now_utc(),
            errors: Vec::new(),
            warnings: Vec::new(),
            overall_progress: 0.0,
            status: PipelineStatus::Running,
        }
    }

    pub fn stage_mut(&mut self, name: StageName) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    pub fn stage(&self, name: StageName) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// `overallProgress = Σ wᵢ·stageProgressᵢ / Σ wᵢ`, monotonic via
    /// `max(previous, computed)` (spec.md §4.4).
    pub fn recompute_progress(&mut self) {
        let total_weight: f64 = self.stages.iter().map(|s| s.weight).sum();
        if total_weight <= 0.0 {
            return;
        }
        let weighted: f64 = self.stages.iter().map(|s| s.weight * s.effective_progress()).sum();
        let computed = weighted / total_weight;
        self.overall_progress = self.overall_progress.max(computed);
    }

    pub fn is_last_stage(&self, name: StageName) -> bool {
        self.stages.last().map(|s| s.name) == Some(name)
    }
}
