//! Inline button vocabulary.
//!
//! Every button the bot renders carries one of these actions as its
//! callback data, so a press is always parsed back into a closed set.

use crate::domain::vehicle::VehicleField;
use crate::flows::FlowName;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VehicleAction {
    Confirm,
    Correct,
    Finalize,
    RetryCard,
    SwitchToManual,
    Edit(VehicleField),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    MainMenu,
    StartFlow {
        flow: FlowName,
        arg: Option<String>,
        ocr: bool,
    },
    CancelFlow(FlowName),
    Vehicle(VehicleAction),
    /// `true` confirms the issue date, `false` asks for it again
    IssueDate(bool),
    /// Type origin and destination instead of sending locations
    OccupyAsText,
}

impl CallbackAction {
    pub fn start(flow: FlowName) -> Self {
        CallbackAction::StartFlow {
            flow,
            arg: None,
            ocr: false,
        }
    }

    pub fn start_with(flow: FlowName, arg: impl Into<String>) -> Self {
        CallbackAction::StartFlow {
            flow,
            arg: Some(arg.into()),
            ocr: false,
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let parts: Vec<&str> = data.split(':').collect();
        let action = match parts.as_slice() {
            ["menu", "main"] => CallbackAction::MainMenu,
            ["flow", "start", flow, rest @ ..] => {
                let flow = FlowName::from_slug(flow)?;
                let (ocr, rest) = match rest {
                    [head @ .., "ocr"] => (true, head),
                    _ => (false, rest),
                };
                let arg = match rest {
                    [] => None,
                    [arg] if !arg.is_empty() => Some(arg.to_string()),
                    _ => return None,
                };
                CallbackAction::StartFlow { flow, arg, ocr }
            }
            ["flow", "cancel", flow] => CallbackAction::CancelFlow(FlowName::from_slug(flow)?),
            ["vehiculo", "confirmar"] => CallbackAction::Vehicle(VehicleAction::Confirm),
            ["vehiculo", "corregir"] => CallbackAction::Vehicle(VehicleAction::Correct),
            ["vehiculo", "finalizar"] => CallbackAction::Vehicle(VehicleAction::Finalize),
            ["vehiculo", "reintentar"] => CallbackAction::Vehicle(VehicleAction::RetryCard),
            ["vehiculo", "manual"] => CallbackAction::Vehicle(VehicleAction::SwitchToManual),
            ["vehiculo", "editar", field] => {
                CallbackAction::Vehicle(VehicleAction::Edit(VehicleField::from_key(field)?))
            }
            ["asignar", "fecha", "confirmar"] => CallbackAction::IssueDate(true),
            ["asignar", "fecha", "cambiar"] => CallbackAction::IssueDate(false),
            ["ocupar", "texto"] => CallbackAction::OccupyAsText,
            _ => return None,
        };
        Some(action)
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackAction::MainMenu => f.write_str("menu:main"),
            CallbackAction::StartFlow { flow, arg, ocr } => {
                write!(f, "flow:start:{}", flow)?;
                if let Some(arg) = arg {
                    write!(f, ":{}", arg)?;
                }
                if *ocr {
                    f.write_str(":ocr")?;
                }
                Ok(())
            }
            CallbackAction::CancelFlow(flow) => write!(f, "flow:cancel:{}", flow),
            CallbackAction::Vehicle(action) => match action {
                VehicleAction::Confirm => f.write_str("vehiculo:confirmar"),
                VehicleAction::Correct => f.write_str("vehiculo:corregir"),
                VehicleAction::Finalize => f.write_str("vehiculo:finalizar"),
                VehicleAction::RetryCard => f.write_str("vehiculo:reintentar"),
                VehicleAction::SwitchToManual => f.write_str("vehiculo:manual"),
                VehicleAction::Edit(field) => write!(f, "vehiculo:editar:{}", field.key()),
            },
            CallbackAction::IssueDate(true) => f.write_str("asignar:fecha:confirmar"),
            CallbackAction::IssueDate(false) => f.write_str("asignar:fecha:cambiar"),
            CallbackAction::OccupyAsText => f.write_str("ocupar:texto"),
        }
    }
}
