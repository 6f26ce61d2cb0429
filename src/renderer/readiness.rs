//! Pipeline readiness barrier
//!
//! `render()` is a no-op until every pipeline of the current generation has
//! reported success. Reports tagged with an older generation are dropped, so
//! builds that finish after a volume reload cannot mark the new set ready.

use rustc_hash::FxHashSet;

use super::pipeline_cache::PipelineVariant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderFailure {
    pub variant: PipelineVariant,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ReadinessBarrier {
    generation: u64,
    expected: usize,
    ready: FxHashSet<PipelineVariant>,
    failures: Vec<ShaderFailure>,
}

impl ReadinessBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for `expected` pipelines of `generation`
    pub fn reset(&mut self, generation: u64, expected: usize) {
        self.generation = generation;
        self.expected = expected;
        self.ready.clear();
        self.failures.clear();
    }

    /// Record one build result. Returns false for stale reports.
    pub fn report(&mut self, generation: u64, variant: PipelineVariant, result: Result<(), String>) -> bool {
        if generation != self.generation {
            log::debug!(
                "[ReadinessBarrier] Dropping {:?} from generation {} (current {})",
                variant,
                generation,
                self.generation
            );
            return false;
        }
        match result {
            Ok(()) => {
                self.ready.insert(variant);
            }
            Err(error) => {
                log::error!("[ReadinessBarrier] {:?} failed: {}", variant, error);
                self.failures.push(ShaderFailure { variant, error });
            }
        }
        true
    }

    pub fn is_ready(&self) -> bool {
        self.failures.is_empty() && self.expected > 0 && self.ready.len() >= self.expected
    }

    pub fn failures(&self) -> &[ShaderFailure] {
        &self.failures
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports still outstanding
    pub fn pending(&self) -> usize {
        self.expected
            .saturating_sub(self.ready.len() + self.failures.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::RenderMode;

    #[test]
    fn test_ready_after_all_reports() {
        let mut barrier = ReadinessBarrier::new();
        assert!(!barrier.is_ready());
        barrier.reset(1, 2);
        assert!(barrier.report(1, PipelineVariant::Backface, Ok(())));
        assert!(!barrier.is_ready());
        assert_eq!(barrier.pending(), 1);
        barrier.report(1, PipelineVariant::Frontface, Ok(()));
        assert!(barrier.is_ready());
    }

    #[test]
    fn test_failure_blocks_readiness() {
        let mut barrier = ReadinessBarrier::new();
        barrier.reset(3, 2);
        barrier.report(3, PipelineVariant::Backface, Ok(()));
        barrier.report(
            3,
            PipelineVariant::LowRes(RenderMode::IsoSurface),
            Err("bad wgsl".to_string()),
        );
        assert!(!barrier.is_ready());
        assert_eq!(barrier.pending(), 0);
        assert_eq!(barrier.failures()[0].error, "bad wgsl");
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut barrier = ReadinessBarrier::new();
        barrier.reset(1, 1);
        barrier.reset(2, 1);
        assert!(!barrier.report(1, PipelineVariant::Composite, Ok(())));
        assert!(!barrier.is_ready());
        assert!(barrier.report(2, PipelineVariant::Composite, Ok(())));
        assert!(barrier.is_ready());
    }
}
