use crate::{RuntimeConfig, SimpleResourceManager, StateManager};
use relaycore::{EventBus, ExecutionEvent, RateLimiter};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared handle every node of one workflow is built against.
///
/// Bundles the state manager, the optional rate limiter, the event bus and
/// the configuration. Cloning is cheap.
#[derive(Clone)]
pub struct Runtime {
    state: Arc<StateManager>,
    limiter: Option<Arc<dyn RateLimiter>>,
    event_bus: EventBus,
    config: RuntimeConfig,
}

impl Runtime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration.
    ///
    /// When `requests_per_second` is set this spawns the limiter's refill
    /// task, so it must run inside a tokio runtime.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        let state = Arc::new(StateManager::new().with_events(event_bus.clone()));
        let limiter = config
            .requests_per_second
            .map(|rps| Arc::new(SimpleResourceManager::new(rps)) as Arc<dyn RateLimiter>);

        Self {
            state,
            limiter,
            event_bus,
            config,
        }
    }

    /// Replaces the rate limiter.
    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn limiter(&self) -> Option<&Arc<dyn RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Shuts the whole workflow down.
    pub fn complete(&self) {
        self.state.complete();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
