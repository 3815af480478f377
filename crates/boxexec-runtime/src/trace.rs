//! Segment tracing hook around lifecycle steps.
//!
//! An external tracing client (an APM agent, for example) can observe the
//! major steps of a lifecycle by implementing [`Tracer`]. Lifecycles default
//! to [`NoopTracer`] and behave identically with or without one attached.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observer notified when a traced segment begins and ends.
pub trait Tracer: Send + Sync {
    /// Called when the named segment begins.
    fn segment_start(&self, name: &'static str);

    /// Called when the named segment ends.
    fn segment_end(&self, name: &'static str, elapsed: Duration);
}

/// Tracer that ignores every segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn segment_start(&self, _name: &'static str) {}

    fn segment_end(&self, _name: &'static str, _elapsed: Duration) {}
}

/// Returns a shared no-op tracer.
#[must_use]
pub fn noop() -> Arc<dyn Tracer> {
    Arc::new(NoopTracer)
}

/// Guard for an open segment; ends the segment when dropped.
pub struct Segment {
    tracer: Arc<dyn Tracer>,
    name: &'static str,
    started: Instant,
}

impl Segment {
    /// Opens a segment on `tracer`.
    #[must_use = "the segment ends as soon as the guard is dropped"]
    pub fn start(tracer: &Arc<dyn Tracer>, name: &'static str) -> Self {
        tracer.segment_start(name);
        Self {
            tracer: Arc::clone(tracer),
            name,
            started: Instant::now(),
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.tracer.segment_end(self.name, elapsed);
        tracing::trace!(segment = self.name, elapsed_ms = elapsed.as_millis(), "segment ended");
    }
}
