//! `/servicio`: record a road-assistance service and its contact time.

use super::{cancel_button, cancel_flat_flow, flat_flow_active, invariant, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::domain::policy::{normalize_policy_number, parse_contact_time, parse_service};
use crate::error::{FlowResult, StoreError};
use crate::services::Reply;
use crate::state::{AwaitingFlow, ConversationId, Pending};
use async_trait::async_trait;
use tracing::info;

const DATA_PROMPT: &str =
    "🛠 Envía el servicio en 4 líneas:\ncosto\nfecha (dd/mm/aaaa)\nexpediente\norigen - destino";

pub struct ServiceFlow {
    deps: FlowDeps,
}

fn is_skip(text: &str) -> bool {
    matches!(text.trim().to_lowercase().as_str(), "no" | "omitir" | "-")
}

impl ServiceFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }

    async fn prompt_data(&self, id: &ConversationId, number: &str) -> FlowResult<()> {
        self.deps
            .say(
                id,
                Reply::text(format!("Póliza {}.\n{}", number, DATA_PROMPT))
                    .row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(())
    }

    async fn on_number(&self, id: &ConversationId, text: &str) -> FlowResult<()> {
        let Some(number) = normalize_policy_number(text) else {
            self.deps.say(id, "⚠️ Número de póliza inválido. Intenta de nuevo:").await?;
            return Ok(());
        };
        if self.deps.policies.find_policy_by_number(&number).await?.is_none() {
            self.deps
                .say(id, format!("❌ No encontré la póliza {}. Escribe otro número:", number))
                .await?;
            return Ok(());
        }
        if self.deps.advance(
            id,
            AwaitingFlow::ServiceNumber,
            AwaitingFlow::ServiceData,
            Pending::Policy(number.clone()),
        ) {
            self.prompt_data(id, &number).await?;
        }
        Ok(())
    }

    async fn on_data(&self, id: &ConversationId, number: String, text: &str) -> FlowResult<()> {
        let service = match parse_service(text) {
            Ok(service) => service,
            Err(reason) => {
                self.deps.say(id, format!("⚠️ {}", reason)).await?;
                return Ok(());
            }
        };
        if !self.deps.registry.awaiting(AwaitingFlow::ServiceData).has(id) {
            return Ok(());
        }

        let expediente = service.expediente.clone();
        match self.deps.policies.add_service(&number, service).await {
            Ok(policy) => {
                info!("Service {} added to {} by {}", expediente, number, id);
                if self.deps.advance(
                    id,
                    AwaitingFlow::ServiceData,
                    AwaitingFlow::ContactTime,
                    Pending::Contact {
                        policy: number.clone(),
                        expediente: expediente.clone(),
                    },
                ) {
                    self.deps
                        .say(
                            id,
                            Reply::text(format!(
                                "✅ Servicio {} registrado en {} ({} servicios).\n\n\
                                 ⏰ ¿A qué hora se contactó al cliente? (HH:MM, o \"no\" para omitir)",
                                expediente,
                                number,
                                policy.services.len()
                            ))
                            .row(vec![cancel_button(self.name())]),
                        )
                        .await?;
                }
            }
            Err(StoreError::NotFound(_)) => {
                self.deps.registry.awaiting(AwaitingFlow::ServiceData).delete(id);
                self.deps
                    .say(id, format!("❌ La póliza {} ya no está activa.", number))
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn on_contact_time(
        &self,
        id: &ConversationId,
        policy: String,
        expediente: String,
        text: &str,
    ) -> FlowResult<()> {
        if is_skip(text) {
            self.deps.registry.awaiting(AwaitingFlow::ContactTime).delete(id);
            self.deps.say(id, "👌 Servicio guardado sin hora de contacto.").await?;
            return Ok(());
        }

        let time = match parse_contact_time(text) {
            Ok(time) => time,
            Err(reason) => {
                self.deps.say(id, format!("⚠️ {}", reason)).await?;
                return Ok(());
            }
        };
        if !self.deps.registry.awaiting(AwaitingFlow::ContactTime).delete(id) {
            return Ok(());
        }

        self.deps
            .policies
            .set_service_contact_time(&policy, &expediente, time)
            .await?;
        self.deps
            .say(
                id,
                format!(
                    "✅ Hora de contacto {} guardada para el expediente {}.",
                    time.format("%H:%M"),
                    expediente
                ),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FlowHandler for ServiceFlow {
    fn name(&self) -> FlowName {
        FlowName::AddService
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        flat_flow_active(&self.deps.registry, self.name(), id)
    }

    async fn start(&self, id: &ConversationId, args: FlowArgs) -> FlowResult<StartOutcome> {
        if let Some(number) = args.policy_number.as_deref().and_then(normalize_policy_number) {
            self.deps
                .registry
                .awaiting(AwaitingFlow::ServiceData)
                .set(id, Pending::Policy(number.clone()));
            self.prompt_data(id, &number).await?;
            return Ok(StartOutcome::Started);
        }

        self.deps
            .registry
            .awaiting(AwaitingFlow::ServiceNumber)
            .set(id, Pending::Fresh);
        self.deps
            .say(
                id,
                Reply::text("🛠 Escribe el número de póliza del servicio:")
                    .row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(StartOutcome::Started)
    }

    fn cancel(&self, id: &ConversationId) -> bool {
        cancel_flat_flow(&self.deps.registry, self.name(), id)
    }

    async fn on_text(
        &self,
        id: &ConversationId,
        step: AwaitingFlow,
        pending: Pending,
        text: &str,
    ) -> FlowResult<()> {
        match (step, pending) {
            (AwaitingFlow::ServiceNumber, _) => self.on_number(id, text).await,
            (AwaitingFlow::ServiceData, Pending::Policy(number)) => {
                self.on_data(id, number, text).await
            }
            (AwaitingFlow::ContactTime, Pending::Contact { policy, expediente }) => {
                self.on_contact_time(id, policy, expediente, text).await
            }
            (step, pending) => Err(invariant(format!(
                "service flow cannot handle {} with {:?}",
                step, pending
            ))),
        }
    }
}
