/// Progress bar color, one per processing stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    RED,
    GREEN,
}

/// The stage a worker is in while processing a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Aligning,
    Composing,
    Calibrating,
    Failed,
}

impl Stage {
    pub fn color(&self) -> BarColor {
        match self {
            Self::Aligning => BarColor::MAGENTA,
            Self::Composing => BarColor::CYAN,
            Self::Calibrating => BarColor::GREEN,
            Self::Failed => BarColor::RED,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aligning => write!(f, "aligning"),
            Self::Composing => write!(f, "composing"),
            Self::Calibrating => write!(f, "calibrating"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: i32,
    pub worker_id: usize,
    pub stage: Stage,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: i32, worker_id: usize, stage: Stage) -> Self {
        Self {
            progress,
            run_number,
            worker_id,
            stage,
            color: stage.color(),
        }
    }
}
