//! `/delete`: soft-delete one or more policies with a reason.

use super::{cancel_button, cancel_flat_flow, flat_flow_active, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::domain::policy::{normalize_policy_number, parse_policy_numbers};
use crate::error::FlowResult;
use crate::services::Reply;
use crate::state::{AwaitingFlow, ConversationId, FlowEntity, Pending};
use async_trait::async_trait;
use tracing::info;

pub struct DeletePolicyFlow {
    deps: FlowDeps,
}

impl DeletePolicyFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }

    async fn ask_reason(&self, id: &ConversationId, numbers: &[String]) -> FlowResult<()> {
        self.deps
            .say(
                id,
                Reply::text(format!(
                    "🗑 Se eliminará: {}\n\nEscribe el motivo de la eliminación:",
                    numbers.join(", ")
                ))
                .row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(())
    }

    async fn on_numbers(&self, id: &ConversationId, text: &str) -> FlowResult<()> {
        let numbers = match parse_policy_numbers(text) {
            Ok(numbers) => numbers,
            Err(reason) => {
                self.deps.say(id, format!("⚠️ {}", reason)).await?;
                return Ok(());
            }
        };

        let mut found = Vec::new();
        let mut missing = Vec::new();
        for number in numbers {
            if self.deps.policies.find_policy_by_number(&number).await?.is_some() {
                found.push(number);
            } else {
                missing.push(number);
            }
        }

        if found.is_empty() {
            self.deps
                .say(
                    id,
                    Reply::text(format!(
                        "❌ No encontré ninguna póliza activa: {}. Escribe otros números:",
                        missing.join(", ")
                    ))
                    .row(vec![cancel_button(self.name())]),
                )
                .await?;
            return Ok(());
        }
        if !missing.is_empty() {
            self.deps
                .say(id, format!("⚠️ No encontradas (se omiten): {}", missing.join(", ")))
                .await?;
        }

        if self.deps.advance(
            id,
            AwaitingFlow::DeleteNumber,
            AwaitingFlow::DeleteReason,
            Pending::Policies(found.clone()),
        ) {
            self.ask_reason(id, &found).await?;
        }
        Ok(())
    }

    async fn on_reason(&self, id: &ConversationId, numbers: Vec<String>, reason: &str) -> FlowResult<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            self.deps.say(id, "⚠️ El motivo no puede ir vacío.").await?;
            return Ok(());
        }
        if !self.deps.registry.awaiting(AwaitingFlow::DeleteReason).delete(id) {
            return Ok(());
        }

        let open = self.deps.registry.flow_state.open_policy(id);
        let mut deleted = Vec::new();
        let mut skipped = Vec::new();
        for number in numbers {
            match self.deps.policies.mark_policy_deleted(&number, reason).await? {
                Some(_) => deleted.push(number),
                None => skipped.push(number),
            }
        }

        if open.is_some_and(|open| deleted.contains(&open)) {
            self.deps
                .registry
                .flow_state
                .clear_state(id, FlowEntity::PolicyContext);
        }
        info!("Policies {:?} deleted by {}: {}", deleted, id, reason);

        let mut text = if deleted.is_empty() {
            "⚠️ No se eliminó ninguna póliza.".to_string()
        } else {
            format!("✅ Pólizas eliminadas: {}", deleted.join(", "))
        };
        if !skipped.is_empty() {
            text.push_str(&format!("\nYa no estaban activas: {}", skipped.join(", ")));
        }
        self.deps.say(id, text).await?;
        Ok(())
    }
}

#[async_trait]
impl FlowHandler for DeletePolicyFlow {
    fn name(&self) -> FlowName {
        FlowName::DeletePolicy
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        flat_flow_active(&self.deps.registry, self.name(), id)
    }

    async fn start(&self, id: &ConversationId, args: FlowArgs) -> FlowResult<StartOutcome> {
        if let Some(number) = args.policy_number.as_deref().and_then(normalize_policy_number) {
            let numbers = vec![number];
            self.deps
                .registry
                .awaiting(AwaitingFlow::DeleteReason)
                .set(id, Pending::Policies(numbers.clone()));
            self.ask_reason(id, &numbers).await?;
            return Ok(StartOutcome::Started);
        }

        self.deps
            .registry
            .awaiting(AwaitingFlow::DeleteNumber)
            .set(id, Pending::Fresh);
        self.deps
            .say(
                id,
                Reply::text("🗑 Escribe el número (o números, separados por coma) de las pólizas a eliminar:")
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
            (AwaitingFlow::DeleteNumber, _) => self.on_numbers(id, text).await,
            (AwaitingFlow::DeleteReason, Pending::Policies(numbers)) => {
                self.on_reason(id, numbers, text).await
            }
            (step, pending) => Err(super::invariant(format!(
                "delete flow cannot handle {} with {:?}",
                step, pending
            ))),
        }
    }
}
