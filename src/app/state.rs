use super::{ComponentState, DoorcamOrchestrator};
use std::collections::HashMap;
use tracing::debug;

impl DoorcamOrchestrator {
    pub(super) fn set_component_state(&self, component: &str, state: ComponentState) {
        self.component_states
            .lock()
            .insert(component.to_string(), state);
        debug!("Component '{}' state changed to: {:?}", component, state);
    }

    pub fn component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().get(component).copied()
    }

    pub fn component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().clone()
    }
}
