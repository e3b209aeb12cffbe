//! `/excel`: receive a spreadsheet for bulk processing.

use super::{cancel_button, cancel_flat_flow, flat_flow_active, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::error::FlowResult;
use crate::services::{IncomingFile, Reply};
use crate::state::{AwaitingFlow, ConversationId, Pending};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

pub struct ExcelUploadFlow {
    deps: FlowDeps,
}

impl ExcelUploadFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl FlowHandler for ExcelUploadFlow {
    fn name(&self) -> FlowName {
        FlowName::ExcelUpload
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        flat_flow_active(&self.deps.registry, self.name(), id)
    }

    async fn start(&self, id: &ConversationId, _args: FlowArgs) -> FlowResult<StartOutcome> {
        self.deps
            .registry
            .awaiting(AwaitingFlow::ExcelUpload)
            .set(id, Pending::Fresh);
        self.deps
            .say(
                id,
                Reply::text("📊 Envía el archivo Excel (.xlsx o .xls):")
                    .row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(StartOutcome::Started)
    }

    fn cancel(&self, id: &ConversationId) -> bool {
        cancel_flat_flow(&self.deps.registry, self.name(), id)
    }

    async fn on_file(
        &self,
        id: &ConversationId,
        _step: AwaitingFlow,
        _pending: Pending,
        file: &IncomingFile,
    ) -> FlowResult<()> {
        if !file.is_spreadsheet() {
            self.deps
                .say(
                    id,
                    Reply::text("⚠️ El archivo debe ser .xlsx o .xls. Envíalo de nuevo:")
                        .row(vec![cancel_button(self.name())]),
                )
                .await?;
            return Ok(());
        }

        let metadata = HashMap::from([("uploaded_by".to_string(), id.to_string())]);
        let uploaded = self.deps.store_file(file, "excel", metadata).await?;
        if !self.deps.registry.awaiting(AwaitingFlow::ExcelUpload).delete(id) {
            return Ok(());
        }
        info!("Spreadsheet {} stored as {}", uploaded.original_name, uploaded.storage_key);

        self.deps
            .say(
                id,
                format!(
                    "✅ Archivo {} recibido ({} bytes). Se procesará en breve.",
                    uploaded.original_name, uploaded.size
                ),
            )
            .await?;
        Ok(())
    }
}
