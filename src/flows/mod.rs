//! Multi-step conversational flows.
//!
//! Flat flows keep one awaiting step per conversation in the registry and
//! are driven by the router through [`FlowHandler`]. The Base de Autos
//! flows keep a richer record and have their own router in `base_autos`.

pub mod assignment;
pub mod base_autos;
pub mod delete;
pub mod directory;
pub mod excel;
pub mod lookup;
pub mod occupy;
pub mod payment;
pub mod save;
pub mod service;
pub mod upload;
pub mod vehicle;

use crate::bot::callbacks::CallbackAction;
use crate::config::FlowsConfig;
use crate::db::types::UploadedFile;
use crate::domain::policy::Coordinates;
use crate::error::{FlowError, FlowResult};
use crate::services::{
    object_key, Button, IncomingFile, MessageRef, Messenger, ObjectStorage, PolicyStore, Reply,
    VehicleStore, VisionService,
};
use crate::state::{AwaitingFlow, CleanupService, ConversationId, FlowStateRegistry, Pending};
use async_trait::async_trait;
use chrono::Local;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowName {
    SavePolicy,
    GetPolicy,
    DeletePolicy,
    AddPayment,
    AddService,
    OccupyPolicy,
    UploadFiles,
    ExcelUpload,
    VehicleRegistration,
    PolicyAssignment,
}

impl FlowName {
    pub const ALL: [FlowName; 10] = [
        FlowName::SavePolicy,
        FlowName::GetPolicy,
        FlowName::DeletePolicy,
        FlowName::AddPayment,
        FlowName::AddService,
        FlowName::OccupyPolicy,
        FlowName::UploadFiles,
        FlowName::ExcelUpload,
        FlowName::VehicleRegistration,
        FlowName::PolicyAssignment,
    ];

    /// Slug used in callback data.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowName::SavePolicy => "guardar",
            FlowName::GetPolicy => "consultar",
            FlowName::DeletePolicy => "eliminar",
            FlowName::AddPayment => "pago",
            FlowName::AddService => "servicio",
            FlowName::OccupyPolicy => "ocupar",
            FlowName::UploadFiles => "subir",
            FlowName::ExcelUpload => "excel",
            FlowName::VehicleRegistration => "registrar",
            FlowName::PolicyAssignment => "asignar",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == slug)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FlowName::SavePolicy => "registro de póliza",
            FlowName::GetPolicy => "consulta de póliza",
            FlowName::DeletePolicy => "eliminación de póliza",
            FlowName::AddPayment => "registro de pago",
            FlowName::AddService => "registro de servicio",
            FlowName::OccupyPolicy => "ocupar póliza",
            FlowName::UploadFiles => "carga de archivos",
            FlowName::ExcelUpload => "carga de Excel",
            FlowName::VehicleRegistration => "registro de vehículo",
            FlowName::PolicyAssignment => "asignación de póliza",
        }
    }

    pub fn is_base_autos(&self) -> bool {
        matches!(self, FlowName::VehicleRegistration | FlowName::PolicyAssignment)
    }
}

impl fmt::Display for FlowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional arguments a flow can be started with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowArgs {
    pub policy_number: Option<String>,
    pub vehicle_id: Option<i32>,
    pub ocr: bool,
}

impl FlowArgs {
    pub fn policy(number: impl Into<String>) -> Self {
        Self {
            policy_number: Some(number.into()),
            ..Default::default()
        }
    }

    pub fn ocr() -> Self {
        Self {
            ocr: true,
            ..Default::default()
        }
    }

    /// Interpret the free argument of a start button for `flow`.
    pub fn from_arg(flow: FlowName, arg: Option<&str>, ocr: bool) -> Self {
        match (flow, arg) {
            (FlowName::PolicyAssignment, Some(arg)) => Self {
                vehicle_id: arg.parse().ok(),
                ocr,
                ..Default::default()
            },
            (_, Some(arg)) => Self {
                policy_number: Some(arg.to_string()),
                ocr,
                ..Default::default()
            },
            (_, None) => Self {
                ocr,
                ..Default::default()
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Started in manual mode because OCR is unavailable
    Redirected,
    /// The same flow is already running for this conversation
    AlreadyActive,
    /// Another flow blocks this one until it is cancelled
    Conflict(FlowName),
    /// Nothing to start (e.g. a choice was offered instead); the user was told
    NotStarted,
}

/// Common capability of every flow.
///
/// Step methods receive the awaiting step that matched and what it holds.
/// Flows whose input never arrives through awaiting steps keep the defaults.
#[async_trait]
pub trait FlowHandler: Send + Sync {
    fn name(&self) -> FlowName;

    fn is_active(&self, id: &ConversationId) -> bool;

    async fn start(&self, id: &ConversationId, args: FlowArgs) -> FlowResult<StartOutcome>;

    /// Drop the flow's state immediately. Returns whether anything was active.
    fn cancel(&self, id: &ConversationId) -> bool;

    async fn on_text(
        &self,
        _id: &ConversationId,
        _step: AwaitingFlow,
        _pending: Pending,
        _text: &str,
    ) -> FlowResult<()> {
        Ok(())
    }

    async fn on_file(
        &self,
        _id: &ConversationId,
        _step: AwaitingFlow,
        _pending: Pending,
        _file: &IncomingFile,
    ) -> FlowResult<()> {
        Ok(())
    }

    async fn on_location(
        &self,
        _id: &ConversationId,
        _step: AwaitingFlow,
        _pending: Pending,
        _at: Coordinates,
    ) -> FlowResult<()> {
        Ok(())
    }
}

/// Collaborators and shared state every flow needs.
#[derive(Clone)]
pub struct FlowDeps {
    pub messenger: Arc<dyn Messenger>,
    pub policies: Arc<dyn PolicyStore>,
    pub vehicles: Arc<dyn VehicleStore>,
    pub vision: Arc<dyn VisionService>,
    pub storage: Arc<dyn ObjectStorage>,
    pub registry: Arc<FlowStateRegistry>,
    pub cleanup: CleanupService,
    pub settings: FlowsConfig,
    /// Lifetime of signed links to stored files
    pub link_ttl: Duration,
}

impl FlowDeps {
    pub async fn say(&self, id: &ConversationId, reply: impl Into<Reply>) -> FlowResult<MessageRef> {
        Ok(self.messenger.send(id, reply.into()).await?)
    }

    /// Move from one awaiting step to the next, unless the first was
    /// cleared while the caller was waiting on a collaborator.
    pub fn advance(
        &self,
        id: &ConversationId,
        from: AwaitingFlow,
        to: AwaitingFlow,
        pending: Pending,
    ) -> bool {
        if !self.registry.awaiting(from).delete(id) {
            return false;
        }
        self.registry.awaiting(to).set(id, pending);
        true
    }

    /// The explicit policy argument, or the policy opened with `/get`.
    pub fn policy_for(&self, id: &ConversationId, args: &FlowArgs) -> Option<String> {
        args.policy_number
            .clone()
            .or_else(|| self.registry.flow_state.open_policy(id))
    }

    /// Download a chat file and put it in object storage under `prefix`.
    pub async fn store_file(
        &self,
        file: &IncomingFile,
        prefix: &str,
        metadata: HashMap<String, String>,
    ) -> FlowResult<UploadedFile> {
        let data = self.messenger.download(&file.file_id).await?;
        self.store_bytes(&data, file, prefix, metadata).await
    }

    pub async fn store_bytes(
        &self,
        data: &[u8],
        file: &IncomingFile,
        prefix: &str,
        metadata: HashMap<String, String>,
    ) -> FlowResult<UploadedFile> {
        let name = file.display_name();
        let key = object_key(prefix, &file.storage_tag(), &name, Local::now());
        let stored = self
            .storage
            .upload(data, &key, &file.content_type(), &metadata)
            .await?;
        Ok(stored.into_uploaded_file(name))
    }
}

pub fn cancel_button(flow: FlowName) -> Button {
    Button::new("❌ Cancelar", CallbackAction::CancelFlow(flow))
}

/// Whether any awaiting step owned by `flow` is set.
pub(crate) fn flat_flow_active(
    registry: &FlowStateRegistry,
    flow: FlowName,
    id: &ConversationId,
) -> bool {
    AwaitingFlow::ALL
        .into_iter()
        .any(|step| step.owner() == flow && registry.awaiting(step).has(id))
}

/// Clear every awaiting step owned by `flow`.
pub(crate) fn cancel_flat_flow(
    registry: &FlowStateRegistry,
    flow: FlowName,
    id: &ConversationId,
) -> bool {
    AwaitingFlow::ALL
        .into_iter()
        .filter(|step| step.owner() == flow)
        .fold(false, |any, step| registry.awaiting(step).delete(id) || any)
}

pub(crate) fn invariant(message: impl Into<String>) -> FlowError {
    FlowError::Invariant(message.into())
}
