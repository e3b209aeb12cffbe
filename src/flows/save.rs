//! `/save`: register a policy from one `campo: valor` block.

use super::{cancel_button, cancel_flat_flow, flat_flow_active, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::bot::callbacks::CallbackAction;
use crate::domain::policy::parse_policy_block;
use crate::error::{FlowResult, StoreError};
use crate::services::Reply;
use crate::state::{AwaitingFlow, ConversationId, FlowContext, Pending};
use async_trait::async_trait;
use tracing::info;

const TEMPLATE: &str = "📝 Envía los datos de la póliza en un solo mensaje:\n\n\
poliza: ABC-123\n\
titular: Nombre Apellido\n\
aseguradora: GNP\n\
telefono: 5512345678\n\
agente: Nombre del agente\n\
fecha: 01/03/2026\n\
marca: NISSAN\n\
submarca: VERSA\n\
año: 2020\n\
color: GRIS\n\
serie: 3N1CN7AD0LK123456\n\
placas: ABC1234\n\n\
Obligatorios: poliza, titular, aseguradora.";

pub struct SavePolicyFlow {
    deps: FlowDeps,
}

impl SavePolicyFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl FlowHandler for SavePolicyFlow {
    fn name(&self) -> FlowName {
        FlowName::SavePolicy
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        flat_flow_active(&self.deps.registry, self.name(), id)
    }

    async fn start(&self, id: &ConversationId, _args: FlowArgs) -> FlowResult<StartOutcome> {
        self.deps
            .registry
            .awaiting(AwaitingFlow::SaveData)
            .set(id, Pending::Fresh);
        self.deps
            .say(id, Reply::text(TEMPLATE).row(vec![cancel_button(self.name())]))
            .await?;
        Ok(StartOutcome::Started)
    }

    fn cancel(&self, id: &ConversationId) -> bool {
        cancel_flat_flow(&self.deps.registry, self.name(), id)
    }

    async fn on_text(
        &self,
        id: &ConversationId,
        _step: AwaitingFlow,
        _pending: Pending,
        text: &str,
    ) -> FlowResult<()> {
        let policy = match parse_policy_block(text) {
            Ok(policy) => policy,
            Err(errors) => {
                let reply = format!(
                    "⚠️ Revisa los datos:\n• {}\n\nEnvía el bloque completo de nuevo.",
                    errors.join("\n• ")
                );
                self.deps
                    .say(id, Reply::text(reply).row(vec![cancel_button(self.name())]))
                    .await?;
                return Ok(());
            }
        };

        let saved = match self.deps.policies.save_policy(policy).await {
            Ok(saved) => saved,
            Err(StoreError::DuplicatePolicy(number)) => {
                self.deps
                    .say(
                        id,
                        Reply::text(format!(
                            "⚠️ La póliza {} ya existe. Corrige el número y envía los datos otra vez.",
                            number
                        ))
                        .row(vec![cancel_button(self.name())]),
                    )
                    .await?;
                return Ok(());
            }
            Err(StoreError::Validation(reason)) => {
                self.deps
                    .say(id, format!("⚠️ Datos inválidos: {}", reason))
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.deps
            .registry
            .awaiting(AwaitingFlow::SaveData)
            .delete(id);
        self.deps.registry.flow_state.save_state(
            id,
            FlowContext::OpenPolicy {
                number: saved.number.clone(),
            },
        );
        info!("Policy {} saved from {}", saved.number, id);

        self.deps
            .say(
                id,
                Reply::text(format!(
                    "✅ Póliza {} registrada para {} ({}).",
                    saved.number, saved.holder, saved.insurer
                ))
                .button(
                    "📎 Subir archivos",
                    CallbackAction::start_with(FlowName::UploadFiles, saved.number.clone()),
                )
                .button("🏠 Menú principal", CallbackAction::MainMenu),
            )
            .await?;
        Ok(())
    }
}
