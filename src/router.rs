//! Dispatch of every inbound message, location and button press to the one
//! flow that is waiting for it.

use crate::bot::callbacks::{CallbackAction, VehicleAction};
use crate::domain::policy::Coordinates;
use crate::error::{FlowError, FlowResult};
use crate::flows::assignment::PolicyAssignmentFlow;
use crate::flows::base_autos::BaseAutosRouter;
use crate::flows::delete::DeletePolicyFlow;
use crate::flows::directory::FlowDirectory;
use crate::flows::excel::ExcelUploadFlow;
use crate::flows::lookup::LookupFlow;
use crate::flows::occupy::OccupyPolicyFlow;
use crate::flows::payment::PaymentFlow;
use crate::flows::save::SavePolicyFlow;
use crate::flows::service::ServiceFlow;
use crate::flows::upload::UploadFilesFlow;
use crate::flows::vehicle::VehicleRegistrationFlow;
use crate::flows::{FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::services::{Button, IncomingFile, Reply};
use crate::state::{AwaitingFlow, ConversationId};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Typed text that always returns to the main menu.
pub const MAIN_MENU_LABEL: &str = "🏠 Menú principal";

/// Awaiting steps that take files, tried in this order.
const FILE_STEPS: [AwaitingFlow; 2] = [AwaitingFlow::ExcelUpload, AwaitingFlow::UploadFiles];

/// Awaiting steps that take locations, tried in this order.
const LOCATION_STEPS: [AwaitingFlow; 2] = [AwaitingFlow::Origin, AwaitingFlow::Destination];

pub fn main_menu() -> Reply {
    let start = |label: &str, flow: FlowName| Button::new(label, CallbackAction::start(flow));
    let start_ocr = |label: &str, flow: FlowName| {
        Button::new(
            label,
            CallbackAction::StartFlow {
                flow,
                arg: None,
                ocr: true,
            },
        )
    };

    Reply::text("📋 Menú principal\n\n¿Qué quieres hacer?")
        .row(vec![
            start("📝 Registrar póliza", FlowName::SavePolicy),
            start("🔎 Consultar póliza", FlowName::GetPolicy),
        ])
        .row(vec![
            start("💰 Registrar pago", FlowName::AddPayment),
            start("🛠 Registrar servicio", FlowName::AddService),
        ])
        .row(vec![
            start("📎 Subir archivos", FlowName::UploadFiles),
            start("📊 Cargar Excel", FlowName::ExcelUpload),
        ])
        .row(vec![start("🗑 Eliminar póliza", FlowName::DeletePolicy)])
        .row(vec![
            start("🚗 Registrar vehículo", FlowName::VehicleRegistration),
            start_ocr("📸 Registrar con foto", FlowName::VehicleRegistration),
        ])
        .row(vec![
            start("📄 Asignar póliza", FlowName::PolicyAssignment),
            start_ocr("📸 Asignar con foto", FlowName::PolicyAssignment),
        ])
}

pub struct MessageRouter {
    deps: FlowDeps,
    directory: FlowDirectory,
    base_autos: BaseAutosRouter,
    vehicles: Arc<VehicleRegistrationFlow>,
    assignments: Arc<PolicyAssignmentFlow>,
    occupy: Arc<OccupyPolicyFlow>,
    text_routes: Vec<(AwaitingFlow, Arc<dyn FlowHandler>)>,
}

impl MessageRouter {
    pub fn new(deps: FlowDeps) -> Self {
        let vehicles = Arc::new(VehicleRegistrationFlow::new(deps.clone()));
        let assignments = Arc::new(PolicyAssignmentFlow::new(deps.clone()));
        let occupy = Arc::new(OccupyPolicyFlow::new(deps.clone()));

        let mut directory = FlowDirectory::new(deps.clone());
        directory.register(Arc::new(SavePolicyFlow::new(deps.clone())));
        directory.register(Arc::new(LookupFlow::new(deps.clone())));
        directory.register(Arc::new(DeletePolicyFlow::new(deps.clone())));
        directory.register(Arc::new(PaymentFlow::new(deps.clone())));
        directory.register(Arc::new(ServiceFlow::new(deps.clone())));
        directory.register(occupy.clone());
        directory.register(Arc::new(UploadFilesFlow::new(deps.clone())));
        directory.register(Arc::new(ExcelUploadFlow::new(deps.clone())));
        directory.register(vehicles.clone());
        directory.register(assignments.clone());

        let text_routes = AwaitingFlow::TEXT_PRIORITY
            .into_iter()
            .filter_map(|step| {
                directory
                    .get(step.owner())
                    .map(|flow| (step, Arc::clone(flow)))
            })
            .collect();

        let base_autos = BaseAutosRouter::new(deps.clone(), vehicles.clone(), assignments.clone());

        Self {
            deps,
            directory,
            base_autos,
            vehicles,
            assignments,
            occupy,
            text_routes,
        }
    }

    pub fn has_active_flow(&self, name: FlowName, id: &ConversationId) -> bool {
        self.directory.has_active_flow(name, id)
    }

    /// Log a failed handler and tell the user, without letting it escape.
    async fn report(&self, id: &ConversationId, context: &str, e: FlowError) {
        error!("{} failed for {}: {}", context, id, e);
        if let Err(send_error) = self
            .deps
            .say(
                id,
                Reply::text("❌ Ocurrió un error al procesar tu mensaje. Intenta de nuevo.")
                    .button(MAIN_MENU_LABEL, CallbackAction::MainMenu),
            )
            .await
        {
            warn!("Could not report error to {}: {}", id, send_error);
        }
    }

    /// Run one routing step, turning errors into a reply. A failed step
    /// counts as handled.
    async fn guarded(&self, id: &ConversationId, context: &str, result: FlowResult<bool>) -> bool {
        match result {
            Ok(handled) => handled,
            Err(e) => {
                self.report(id, context, e).await;
                true
            }
        }
    }

    pub async fn route_text(&self, id: &ConversationId, text: &str) -> bool {
        let result = self.try_route_text(id, text).await;
        self.guarded(id, "text", result).await
    }

    async fn try_route_text(&self, id: &ConversationId, text: &str) -> FlowResult<bool> {
        let text = text.trim();
        if text.starts_with('/') {
            return Ok(false);
        }
        if text == MAIN_MENU_LABEL {
            self.return_to_menu(id).await?;
            return Ok(true);
        }
        if self.base_autos.route_text(id, text).await? {
            return Ok(true);
        }

        for (step, flow) in &self.text_routes {
            let Some(pending) = self.deps.registry.awaiting(*step).get(id) else {
                continue;
            };
            debug!("Text from {} routed to {}", id, step);
            flow.on_text(id, *step, pending, text).await?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn route_photo(&self, id: &ConversationId, photo: &IncomingFile) -> bool {
        let result = self.try_route_file(id, photo).await;
        self.guarded(id, "photo", result).await
    }

    pub async fn route_document(&self, id: &ConversationId, document: &IncomingFile) -> bool {
        let result = self.try_route_file(id, document).await;
        self.guarded(id, "document", result).await
    }

    /// Unsolicited files fall through silently.
    async fn try_route_file(&self, id: &ConversationId, file: &IncomingFile) -> FlowResult<bool> {
        for step in FILE_STEPS {
            let Some(pending) = self.deps.registry.awaiting(step).get(id) else {
                continue;
            };
            let Some(flow) = self.directory.get(step.owner()) else {
                continue;
            };
            debug!("File from {} routed to {}", id, step);
            flow.on_file(id, step, pending, file).await?;
            return Ok(true);
        }

        self.base_autos.route_file(id, file).await
    }

    pub async fn route_location(&self, id: &ConversationId, at: Coordinates) -> bool {
        let result = self.try_route_location(id, at).await;
        self.guarded(id, "location", result).await
    }

    async fn try_route_location(&self, id: &ConversationId, at: Coordinates) -> FlowResult<bool> {
        for step in LOCATION_STEPS {
            if let Some(pending) = self.deps.registry.awaiting(step).get(id) {
                debug!("Location from {} routed to {}", id, step);
                self.occupy.on_location(id, step, pending, at).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Handle a button press. Returns whether the data was understood.
    pub async fn route_callback(&self, id: &ConversationId, callback_id: &str, data: &str) -> bool {
        let Some(action) = CallbackAction::parse(data) else {
            debug!("Stale callback data from {}: {}", id, data);
            if let Err(e) = self
                .deps
                .messenger
                .answer_callback(callback_id, Some("Este botón ya no es válido.".to_string()))
                .await
            {
                warn!("Could not answer callback for {}: {}", id, e);
            }
            return false;
        };

        if let Err(e) = self.deps.messenger.answer_callback(callback_id, None).await {
            warn!("Could not answer callback for {}: {}", id, e);
        }
        let result = self.handle_action(id, action).await.map(|()| true);
        self.guarded(id, "callback", result).await
    }

    async fn handle_action(&self, id: &ConversationId, action: CallbackAction) -> FlowResult<()> {
        match action {
            CallbackAction::MainMenu => self.return_to_menu(id).await,
            CallbackAction::StartFlow { flow, arg, ocr } => {
                let args = FlowArgs::from_arg(flow, arg.as_deref(), ocr);
                self.directory.start_flow(flow, id, args).await.map(|_| ())
            }
            CallbackAction::CancelFlow(flow) => self.directory.cancel_flow(flow, id).await.map(|_| ()),
            CallbackAction::Vehicle(action) => match action {
                VehicleAction::Confirm => self.vehicles.confirm(id).await,
                VehicleAction::Correct | VehicleAction::SwitchToManual => {
                    self.vehicles.restart_manual(id).await
                }
                VehicleAction::Finalize => self.vehicles.finalize(id).await.map(|_| ()),
                VehicleAction::RetryCard => self.vehicles.retry_card(id).await,
                VehicleAction::Edit(field) => self.vehicles.edit_field(id, field).await,
            },
            CallbackAction::IssueDate(true) => {
                self.assignments.confirm_issue_date(id).await.map(|_| ())
            }
            CallbackAction::IssueDate(false) => self.assignments.change_issue_date(id).await,
            CallbackAction::OccupyAsText => {
                if !self.occupy.use_text_route(id).await? {
                    self.deps
                        .say(id, "Este botón ya no aplica al paso actual.")
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Entry point for commands and buttons that start a flow.
    pub async fn start_flow(&self, name: FlowName, id: &ConversationId, args: FlowArgs) -> StartOutcome {
        match self.directory.start_flow(name, id, args).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report(id, "start", e).await;
                StartOutcome::NotStarted
            }
        }
    }

    pub async fn cancel_flow(&self, name: FlowName, id: &ConversationId) -> bool {
        let result = self.directory.cancel_flow(name, id).await;
        self.guarded(id, "cancel", result).await
    }

    /// `/cancel`: drop every piece of state of the conversation.
    pub async fn cancel_all(&self, id: &ConversationId) {
        let cleared = self.deps.cleanup.clear_all(id);
        let text = if cleared > 0 {
            "❌ Operación cancelada."
        } else {
            "No hay ninguna operación activa."
        };
        if let Err(e) = self
            .deps
            .say(id, Reply::text(text).button(MAIN_MENU_LABEL, CallbackAction::MainMenu))
            .await
        {
            warn!("Could not confirm cancel to {}: {}", id, e);
        }
    }

    pub async fn show_main_menu(&self, id: &ConversationId) {
        if let Err(e) = self.deps.say(id, main_menu()).await {
            warn!("Could not show main menu to {}: {}", id, e);
        }
    }

    pub async fn show_help(&self, id: &ConversationId, commands: String) {
        let reply = Reply::text(commands).button(MAIN_MENU_LABEL, CallbackAction::MainMenu);
        if let Err(e) = self.deps.say(id, reply).await {
            warn!("Could not show help to {}: {}", id, e);
        }
    }

    async fn return_to_menu(&self, id: &ConversationId) -> FlowResult<()> {
        let cleared = self.deps.cleanup.clear_all(id);
        if cleared > 0 {
            info!("Returned {} to the main menu, {} states dropped", id, cleared);
        }
        self.deps.say(id, main_menu()).await?;
        Ok(())
    }
}
