mod motion;
mod orchestrator;
#[cfg(test)]
mod tests;

pub use motion::{MotionDetector, MotionResult};
pub use orchestrator::{
    MotionAnalysisMetrics, MotionAnalyzerOrchestrator, MotionAnalyzerOrchestratorBuilder,
};
