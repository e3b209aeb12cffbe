//! Router for the Base de Autos umbrella: vehicle registration and
//! policy assignment share one entry point for text and files.

use super::assignment::PolicyAssignmentFlow;
use super::vehicle::VehicleRegistrationFlow;
use super::FlowDeps;
use crate::error::FlowResult;
use crate::services::IncomingFile;
use crate::state::{BaseAutosKind, ConversationId, FlowContext, FlowEntity};
use std::sync::Arc;
use tracing::debug;

pub struct BaseAutosRouter {
    deps: FlowDeps,
    vehicles: Arc<VehicleRegistrationFlow>,
    assignments: Arc<PolicyAssignmentFlow>,
}

impl BaseAutosRouter {
    pub fn new(
        deps: FlowDeps,
        vehicles: Arc<VehicleRegistrationFlow>,
        assignments: Arc<PolicyAssignmentFlow>,
    ) -> Self {
        Self {
            deps,
            vehicles,
            assignments,
        }
    }

    /// Gated on the sub-flow records themselves. The umbrella marker ages
    /// on its own and is put back if a sweep dropped it mid-flow.
    fn is_active(&self, id: &ConversationId) -> bool {
        let registry = &self.deps.registry;
        let kind = if registry.vehicles.has(id) {
            BaseAutosKind::Registration
        } else if registry.assignments.has(id) {
            BaseAutosKind::Assignment
        } else {
            self.release_if_idle(id);
            return false;
        };

        if !registry.flow_state.has_state(id, FlowEntity::BaseAutos) {
            debug!("Base de Autos marker restored for {}", id);
        }
        registry
            .flow_state
            .save_state(id, FlowContext::BaseAutos(kind));
        true
    }

    /// Drop the umbrella marker when neither sub-flow holds a record any more.
    fn release_if_idle(&self, id: &ConversationId) {
        if self.deps.registry.release_base_autos_if_idle(id) {
            debug!("Base de Autos released for {}", id);
        }
    }

    pub async fn route_text(&self, id: &ConversationId, text: &str) -> FlowResult<bool> {
        if !self.is_active(id) {
            return Ok(false);
        }

        let handled = if self.vehicles.process_text(id, text).await? {
            true
        } else {
            self.assignments.process_text(id, text).await?
        };
        if !handled {
            self.release_if_idle(id);
        }
        Ok(handled)
    }

    pub async fn route_file(&self, id: &ConversationId, file: &IncomingFile) -> FlowResult<bool> {
        if !self.is_active(id) {
            return Ok(false);
        }

        let handled = if self.vehicles.accepts_files(id) {
            self.vehicles.process_file(id, file).await?
        } else if self.assignments.accepts_document(id) {
            self.assignments.process_document(id, file).await?
        } else {
            false
        };
        if !handled {
            self.release_if_idle(id);
        }
        Ok(handled)
    }
}
