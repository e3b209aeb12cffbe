use crate::flows::{FlowArgs, FlowName};
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Comandos disponibles:")]
pub enum Command {
    #[command(description = "Mostrar el menú principal")]
    Start,
    #[command(description = "Mostrar esta ayuda")]
    Help,
    #[command(description = "Registrar una póliza")]
    Save,
    #[command(description = "Consultar una póliza\n  Uso: /get [número]")]
    Get(String),
    #[command(description = "Eliminar pólizas\n  Uso: /delete [número]")]
    Delete(String),
    #[command(description = "Registrar un pago\n  Uso: /pago [número]")]
    Pago(String),
    #[command(description = "Registrar un servicio\n  Uso: /servicio [número]")]
    Servicio(String),
    #[command(description = "Subir fotos o PDFs a una póliza\n  Uso: /upload [número]")]
    Upload(String),
    #[command(description = "Cargar un archivo Excel")]
    Excel,
    #[command(description = "Registrar un vehículo capturando los datos")]
    Registrar,
    #[command(description = "Registrar un vehículo con foto de la tarjeta de circulación")]
    RegistrarOcr,
    #[command(description = "Asignar póliza a un vehículo\n  Uso: /asignar [id de vehículo]")]
    Asignar(String),
    #[command(description = "Cancelar la operación en curso")]
    Cancel,
}

/// What a command asks the router to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandAction {
    Menu,
    Help,
    Cancel,
    Start(FlowName, FlowArgs),
}

fn arg(raw: &str) -> Option<&str> {
    Some(raw.trim()).filter(|arg| !arg.is_empty())
}

impl Command {
    pub fn action(&self) -> CommandAction {
        let start = |flow: FlowName, raw: &str, ocr: bool| {
            CommandAction::Start(flow, FlowArgs::from_arg(flow, arg(raw), ocr))
        };
        match self {
            Command::Start => CommandAction::Menu,
            Command::Help => CommandAction::Help,
            Command::Cancel => CommandAction::Cancel,
            Command::Save => start(FlowName::SavePolicy, "", false),
            Command::Get(raw) => start(FlowName::GetPolicy, raw, false),
            Command::Delete(raw) => start(FlowName::DeletePolicy, raw, false),
            Command::Pago(raw) => start(FlowName::AddPayment, raw, false),
            Command::Servicio(raw) => start(FlowName::AddService, raw, false),
            Command::Upload(raw) => start(FlowName::UploadFiles, raw, false),
            Command::Excel => start(FlowName::ExcelUpload, "", false),
            Command::Registrar => start(FlowName::VehicleRegistration, "", false),
            Command::RegistrarOcr => start(FlowName::VehicleRegistration, "", true),
            Command::Asignar(raw) => start(FlowName::PolicyAssignment, raw, false),
        }
    }
}
