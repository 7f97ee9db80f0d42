use std::sync::Arc;

use crate::core::config::Settings;
use crate::core::time::Clock;
use crate::repositories::ExamStore;
use crate::services::enrollment::EnrollmentPolicy;
use crate::services::notifications::EventSink;

/// Shared handle passed to every engine operation.
#[derive(Clone)]
pub struct EngineState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn ExamStore>,
    clock: Arc<dyn Clock>,
    enrollment: Arc<dyn EnrollmentPolicy>,
    events: Arc<dyn EventSink>,
}

impl EngineState {
    pub fn new(
        settings: Settings,
        store: Arc<dyn ExamStore>,
        clock: Arc<dyn Clock>,
        enrollment: Arc<dyn EnrollmentPolicy>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, store, clock, enrollment, events }) }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn store(&self) -> &dyn ExamStore {
        self.inner.store.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub fn enrollment(&self) -> &dyn EnrollmentPolicy {
        self.inner.enrollment.as_ref()
    }

    pub fn events(&self) -> &dyn EventSink {
        self.inner.events.as_ref()
    }
}
