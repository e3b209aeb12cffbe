//! `/upload`: attach photos and PDFs to a policy.

use super::{cancel_button, cancel_flat_flow, flat_flow_active, invariant, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::bot::callbacks::CallbackAction;
use crate::domain::policy::normalize_policy_number;
use crate::error::FlowResult;
use crate::services::{IncomingFile, Reply};
use crate::state::{AwaitingFlow, ConversationId, Pending};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

pub struct UploadFilesFlow {
    deps: FlowDeps,
}

impl UploadFilesFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }

    async fn ask_files(&self, id: &ConversationId, number: &str) -> FlowResult<()> {
        self.deps
            .say(
                id,
                Reply::text(format!(
                    "📎 Envía fotos o PDFs para la póliza {}. Cuando termines, pulsa Listo.",
                    number
                ))
                .button("✅ Listo", CallbackAction::CancelFlow(self.name())),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FlowHandler for UploadFilesFlow {
    fn name(&self) -> FlowName {
        FlowName::UploadFiles
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        flat_flow_active(&self.deps.registry, self.name(), id)
    }

    async fn start(&self, id: &ConversationId, args: FlowArgs) -> FlowResult<StartOutcome> {
        if let Some(number) = self
            .deps
            .policy_for(id, &args)
            .as_deref()
            .and_then(normalize_policy_number)
        {
            self.deps
                .registry
                .awaiting(AwaitingFlow::UploadFiles)
                .set(id, Pending::Policy(number.clone()));
            self.ask_files(id, &number).await?;
            return Ok(StartOutcome::Started);
        }

        self.deps
            .registry
            .awaiting(AwaitingFlow::UploadNumber)
            .set(id, Pending::Fresh);
        self.deps
            .say(
                id,
                Reply::text("📎 Escribe el número de póliza a la que subirás archivos:")
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
        _pending: Pending,
        text: &str,
    ) -> FlowResult<()> {
        if step != AwaitingFlow::UploadNumber {
            return Err(invariant(format!("upload flow cannot handle text at {}", step)));
        }
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
            AwaitingFlow::UploadNumber,
            AwaitingFlow::UploadFiles,
            Pending::Policy(number.clone()),
        ) {
            self.ask_files(id, &number).await?;
        }
        Ok(())
    }

    async fn on_file(
        &self,
        id: &ConversationId,
        _step: AwaitingFlow,
        pending: Pending,
        file: &IncomingFile,
    ) -> FlowResult<()> {
        let number = pending
            .policy()
            .map(str::to_string)
            .ok_or_else(|| invariant("upload step without a policy"))?;
        if !file.is_image() && !file.is_pdf() {
            self.deps
                .say(id, "⚠️ Solo se aceptan fotos y archivos PDF.")
                .await?;
            return Ok(());
        }

        let metadata = HashMap::from([
            ("policy".to_string(), number.clone()),
            ("uploaded_by".to_string(), id.to_string()),
        ]);
        let uploaded = self
            .deps
            .store_file(file, &format!("polizas/{}", number), metadata)
            .await?;
        let name = uploaded.original_name.clone();
        self.deps.policies.attach_file(&number, uploaded).await?;
        info!("File {} attached to {} by {}", name, number, id);

        self.deps
            .say(id, format!("✅ {} guardado en la póliza {}.", name, number))
            .await?;
        Ok(())
    }
}
