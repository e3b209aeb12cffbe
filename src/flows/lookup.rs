//! `/get`: look a policy up and open it for follow-up actions.

use super::{cancel_button, cancel_flat_flow, flat_flow_active, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::bot::callbacks::CallbackAction;
use crate::domain::policy::normalize_policy_number;
use crate::error::FlowResult;
use crate::services::{Button, Policy, Reply};
use crate::state::{AwaitingFlow, ConversationId, FlowContext, Pending};
use async_trait::async_trait;
use tracing::warn;

/// Attachments linked from the policy summary, newest first.
const MAX_FILE_LINKS: usize = 5;

pub struct LookupFlow {
    deps: FlowDeps,
}

fn policy_summary(policy: &Policy) -> String {
    let mut lines = vec![
        format!("📄 Póliza: {}", policy.number),
        format!("👤 Titular: {}", policy.holder),
        format!("🏢 Aseguradora: {}", policy.insurer),
    ];
    if let Some(agent) = &policy.agent {
        lines.push(format!("🧑‍💼 Agente: {}", agent));
    }
    if let Some(phone) = &policy.phone {
        lines.push(format!("📞 Teléfono: {}", phone));
    }
    if let Some(date) = policy.issue_date {
        lines.push(format!("📅 Emisión: {}", date.format("%d/%m/%Y")));
    }
    let vehicle: Vec<String> = [&policy.brand, &policy.model, &policy.color, &policy.plates]
        .into_iter()
        .flatten()
        .cloned()
        .chain(policy.year.map(|y| y.to_string()))
        .collect();
    if !vehicle.is_empty() {
        lines.push(format!("🚗 Vehículo: {}", vehicle.join(" ")));
    }
    lines.push(format!(
        "💰 Pagos: {} · 🛠 Servicios: {} · 📎 Archivos: {}",
        policy.payments.len(),
        policy.services.len(),
        policy.files.len()
    ));
    lines.join("\n")
}

fn policy_actions(number: &str) -> Vec<Vec<Button>> {
    let start = |flow| CallbackAction::start_with(flow, number);
    vec![
        vec![
            Button::new("💰 Pago", start(FlowName::AddPayment)),
            Button::new("🛠 Servicio", start(FlowName::AddService)),
        ],
        vec![
            Button::new("📎 Subir archivos", start(FlowName::UploadFiles)),
            Button::new("🚕 Ocupar póliza", start(FlowName::OccupyPolicy)),
        ],
        vec![
            Button::new("🗑 Eliminar", start(FlowName::DeletePolicy)),
            Button::new("🏠 Menú principal", CallbackAction::MainMenu),
        ],
    ]
}

impl LookupFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }

    fn file_links(&self, policy: &Policy) -> Vec<String> {
        policy
            .files
            .iter()
            .rev()
            .take(MAX_FILE_LINKS)
            .filter_map(|file| {
                match self
                    .deps
                    .storage
                    .signed_url(&file.storage_key, self.deps.link_ttl)
                {
                    Ok(url) => Some(format!("• {}: {}", file.original_name, url)),
                    Err(e) => {
                        warn!("No link for {}: {}", file.storage_key, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Show the policy and remember it as the open one. `false` when not found.
    async fn show(&self, id: &ConversationId, number: &str) -> FlowResult<bool> {
        let Some(policy) = self.deps.policies.find_policy_by_number(number).await? else {
            return Ok(false);
        };

        self.deps.registry.flow_state.save_state(
            id,
            FlowContext::OpenPolicy {
                number: policy.number.clone(),
            },
        );
        let mut text = policy_summary(&policy);
        let links = self.file_links(&policy);
        if !links.is_empty() {
            text.push_str("\n\n📎 Archivos recientes:\n");
            text.push_str(&links.join("\n"));
        }
        self.deps
            .say(
                id,
                Reply {
                    text,
                    keyboard: policy_actions(&policy.number),
                },
            )
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl FlowHandler for LookupFlow {
    fn name(&self) -> FlowName {
        FlowName::GetPolicy
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        flat_flow_active(&self.deps.registry, self.name(), id)
    }

    async fn start(&self, id: &ConversationId, args: FlowArgs) -> FlowResult<StartOutcome> {
        if let Some(number) = args.policy_number.as_deref().and_then(normalize_policy_number) {
            if self.show(id, &number).await? {
                return Ok(StartOutcome::NotStarted);
            }
        }

        self.deps
            .registry
            .awaiting(AwaitingFlow::PolicySearch)
            .set(id, Pending::Fresh);
        self.deps
            .say(
                id,
                Reply::text("🔎 Escribe el número de póliza a consultar:")
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
        _step: AwaitingFlow,
        _pending: Pending,
        text: &str,
    ) -> FlowResult<()> {
        let Some(number) = normalize_policy_number(text) else {
            self.deps
                .say(id, "⚠️ Ese no parece un número de póliza. Intenta de nuevo:")
                .await?;
            return Ok(());
        };

        if self.show(id, &number).await? {
            self.deps
                .registry
                .awaiting(AwaitingFlow::PolicySearch)
                .delete(id);
        } else {
            self.deps
                .say(
                    id,
                    Reply::text(format!(
                        "❌ No encontré la póliza {}. Escribe otro número o cancela.",
                        number
                    ))
                    .row(vec![cancel_button(self.name())]),
                )
                .await?;
        }
        Ok(())
    }
}
