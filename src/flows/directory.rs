//! Explicit registry of flows by name: the single place flows are
//! started, cancelled and queried from commands and buttons.

use super::{FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::bot::callbacks::CallbackAction;
use crate::error::FlowResult;
use crate::services::Reply;
use crate::state::ConversationId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct FlowDirectory {
    deps: FlowDeps,
    flows: HashMap<FlowName, Arc<dyn FlowHandler>>,
}

impl FlowDirectory {
    pub fn new(deps: FlowDeps) -> Self {
        Self {
            deps,
            flows: HashMap::new(),
        }
    }

    pub fn register(&mut self, flow: Arc<dyn FlowHandler>) {
        self.flows.insert(flow.name(), flow);
    }

    pub fn get(&self, name: FlowName) -> Option<&Arc<dyn FlowHandler>> {
        self.flows.get(&name)
    }

    pub fn has_active_flow(&self, name: FlowName, id: &ConversationId) -> bool {
        self.flows
            .get(&name)
            .is_some_and(|flow| flow.is_active(id))
    }

    /// The Base de Autos flow currently running for `id`, if any.
    fn active_base_autos(&self, id: &ConversationId) -> Option<FlowName> {
        FlowName::ALL
            .into_iter()
            .filter(FlowName::is_base_autos)
            .find(|name| self.has_active_flow(*name, id))
    }

    /// Start `name` for `id`.
    ///
    /// Restarting a running flow is refused. A running Base de Autos flow
    /// blocks every other flow. Otherwise the flat awaiting steps of the
    /// conversation are superseded before the new flow starts.
    pub async fn start_flow(
        &self,
        name: FlowName,
        id: &ConversationId,
        args: FlowArgs,
    ) -> FlowResult<StartOutcome> {
        let Some(flow) = self.flows.get(&name) else {
            warn!("No flow registered under {}", name);
            self.deps
                .say(id, "⚠️ Esta opción no está disponible.")
                .await?;
            return Ok(StartOutcome::NotStarted);
        };

        if flow.is_active(id) {
            self.deps
                .say(
                    id,
                    Reply::text(format!(
                        "⚠️ Ya tienes un {} en curso. Termínalo o cancélalo antes de iniciar otro.",
                        name.label()
                    ))
                    .button("❌ Cancelar", CallbackAction::CancelFlow(name)),
                )
                .await?;
            return Ok(StartOutcome::AlreadyActive);
        }

        if let Some(blocking) = self.active_base_autos(id) {
            self.deps
                .say(
                    id,
                    Reply::text(format!(
                        "⚠️ Tienes un {} en proceso. Cancélalo antes de iniciar otra operación.",
                        blocking.label()
                    ))
                    .button("❌ Cancelar", CallbackAction::CancelFlow(blocking)),
                )
                .await?;
            return Ok(StartOutcome::Conflict(blocking));
        }

        self.deps.cleanup.clear_awaiting(id, &[]);

        let outcome = flow.start(id, args).await?;
        info!("Flow {} start for {}: {:?}", name, id, outcome);
        Ok(outcome)
    }

    /// Cancel `name` for `id` and tell the user. Returns whether it was active.
    pub async fn cancel_flow(&self, name: FlowName, id: &ConversationId) -> FlowResult<bool> {
        let cancelled = self
            .flows
            .get(&name)
            .is_some_and(|flow| flow.cancel(id));
        self.deps.registry.release_base_autos_if_idle(id);

        let text = if cancelled {
            info!("Flow {} cancelled for {}", name, id);
            format!("❌ Se canceló el {}.", name.label())
        } else {
            "No hay ninguna operación activa que cancelar.".to_string()
        };
        self.deps
            .say(id, Reply::text(text).button("🏠 Menú principal", CallbackAction::MainMenu))
            .await?;

        Ok(cancelled)
    }
}
