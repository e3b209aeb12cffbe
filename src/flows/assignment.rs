//! Assigning a new policy to a registered vehicle that has none.
//!
//! Legacy mode asks each policy field in turn. OCR mode first takes a
//! photo or PDF of the policy and only asks for what could not be read.
//! Both end on the issue date confirmation.

use super::{cancel_button, invariant, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::bot::callbacks::CallbackAction;
use crate::db::types::UploadedFile;
use crate::domain::policy::{normalize_policy_number, parse_date, NewPolicy};
use crate::error::{FlowResult, StoreError};
use crate::services::{Button, DocumentKind, ExtractedFields, IncomingFile, Reply, Vehicle};
use crate::state::{BaseAutosKind, ConversationId, FlowContext};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use std::collections::HashMap;
use tracing::{error, info, warn};

const VEHICLE_CHOICES: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignmentMode {
    Legacy,
    Ocr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyField {
    Number,
    Insurer,
    Agent,
    IssueDate,
}

impl PolicyField {
    pub const ORDER: [PolicyField; 4] = [
        PolicyField::Number,
        PolicyField::Insurer,
        PolicyField::Agent,
        PolicyField::IssueDate,
    ];

    pub fn prompt(&self) -> &'static str {
        match self {
            PolicyField::Number => "📄 Escribe el número de póliza:",
            PolicyField::Insurer => "🏢 Escribe la aseguradora:",
            PolicyField::Agent => "🧑‍💼 Escribe el nombre del agente:",
            PolicyField::IssueDate => "📅 Escribe la fecha de emisión (dd/mm/aaaa):",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignmentStep {
    AwaitingDocument,
    AwaitingField(PolicyField),
    ConfirmingIssueDate,
}

#[derive(Clone, Debug)]
pub struct AssignmentRecord {
    pub mode: AssignmentMode,
    pub step: AssignmentStep,
    pub vehicle_id: i32,
    pub vehicle_label: String,
    pub number: Option<String>,
    pub insurer: Option<String>,
    pub agent: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub document: Option<UploadedFile>,
    pub started_at: DateTime<Local>,
}

fn validate_name(raw: &str, what: &str) -> Result<String, String> {
    let value = raw.trim();
    match value.chars().count() {
        2..=60 => Ok(value.to_string()),
        _ => Err(format!("{} debe tener entre 2 y 60 caracteres.", what)),
    }
}

impl AssignmentRecord {
    fn with_step(mode: AssignmentMode, step: AssignmentStep, vehicle_id: i32, vehicle_label: String) -> Self {
        Self {
            mode,
            step,
            vehicle_id,
            vehicle_label,
            number: None,
            insurer: None,
            agent: None,
            issue_date: None,
            document: None,
            started_at: Local::now(),
        }
    }

    pub fn legacy(vehicle_id: i32, vehicle_label: String) -> Self {
        Self::with_step(
            AssignmentMode::Legacy,
            AssignmentStep::AwaitingField(PolicyField::Number),
            vehicle_id,
            vehicle_label,
        )
    }

    pub fn ocr(vehicle_id: i32, vehicle_label: String) -> Self {
        Self::with_step(
            AssignmentMode::Ocr,
            AssignmentStep::AwaitingDocument,
            vehicle_id,
            vehicle_label,
        )
    }

    fn is_set(&self, field: PolicyField) -> bool {
        match field {
            PolicyField::Number => self.number.is_some(),
            PolicyField::Insurer => self.insurer.is_some(),
            PolicyField::Agent => self.agent.is_some(),
            PolicyField::IssueDate => self.issue_date.is_some(),
        }
    }

    fn advance(&mut self) {
        self.step = PolicyField::ORDER
            .into_iter()
            .find(|field| !self.is_set(*field))
            .map(AssignmentStep::AwaitingField)
            .unwrap_or(AssignmentStep::ConfirmingIssueDate);
    }

    /// Validate and store `raw` for `field`, then move to the next gap.
    pub fn accept(&mut self, field: PolicyField, raw: &str) -> Result<(), String> {
        if self.step != AssignmentStep::AwaitingField(field) {
            return Err("Ese dato ya no se está pidiendo.".to_string());
        }
        match field {
            PolicyField::Number => {
                self.number = Some(
                    normalize_policy_number(raw)
                        .ok_or_else(|| "Número de póliza inválido.".to_string())?,
                )
            }
            PolicyField::Insurer => self.insurer = Some(validate_name(raw, "La aseguradora")?),
            PolicyField::Agent => self.agent = Some(validate_name(raw, "El agente")?),
            PolicyField::IssueDate => self.issue_date = Some(parse_date(raw)?),
        }
        self.advance();
        Ok(())
    }

    /// Keep the values read from a policy document that pass validation.
    pub fn apply_extraction(&mut self, extracted: &ExtractedFields) {
        let get = |key: &str| extracted.fields.get(key).map(String::as_str);
        if let Some(number) = get("poliza").and_then(normalize_policy_number) {
            self.number = Some(number);
        }
        if let Some(insurer) = get("aseguradora").and_then(|v| validate_name(v, "").ok()) {
            self.insurer = Some(insurer);
        }
        if let Some(agent) = get("agente").and_then(|v| validate_name(v, "").ok()) {
            self.agent = Some(agent);
        }
        if let Some(date) = get("fecha_emision").and_then(|v| parse_date(v).ok()) {
            self.issue_date = Some(date);
        }
        self.advance();
    }

    fn summary(&self) -> String {
        let show = |value: Option<&str>| value.unwrap_or("—").to_string();
        format!(
            "🚗 {}\n📄 Póliza: {}\n🏢 Aseguradora: {}\n🧑‍💼 Agente: {}\n📅 Emisión: {}",
            self.vehicle_label,
            show(self.number.as_deref()),
            show(self.insurer.as_deref()),
            show(self.agent.as_deref()),
            self.issue_date
                .map(|d| d.format("%d/%m/%Y").to_string())
                .unwrap_or_else(|| "—".to_string())
        )
    }
}

fn vehicle_label(vehicle: &Vehicle) -> String {
    format!(
        "{} {} {} ({})",
        vehicle.brand, vehicle.model, vehicle.year, vehicle.plates
    )
}

pub struct PolicyAssignmentFlow {
    deps: FlowDeps,
}

impl PolicyAssignmentFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }

    /// True from start until cancel or the confirmed issue date.
    pub fn has_assignment_in_progress(&self, id: &ConversationId) -> bool {
        self.deps.registry.assignments.has(id)
    }

    pub fn accepts_document(&self, id: &ConversationId) -> bool {
        self.deps
            .registry
            .assignments
            .get(id)
            .is_some_and(|record| record.step == AssignmentStep::AwaitingDocument)
    }

    async fn offer_vehicles(&self, id: &ConversationId, ocr: bool) -> FlowResult<()> {
        let vehicles = self
            .deps
            .vehicles
            .vehicles_without_policy(VEHICLE_CHOICES)
            .await?;
        if vehicles.is_empty() {
            self.deps
                .say(
                    id,
                    Reply::text("✅ No hay vehículos pendientes de póliza.")
                        .button("🏠 Menú principal", CallbackAction::MainMenu),
                )
                .await?;
            return Ok(());
        }

        let mut reply = Reply::text("🚗 Elige el vehículo al que se asignará la póliza:");
        for vehicle in &vehicles {
            reply = reply.button(
                vehicle_label(vehicle),
                CallbackAction::StartFlow {
                    flow: FlowName::PolicyAssignment,
                    arg: Some(vehicle.id.to_string()),
                    ocr,
                },
            );
        }
        self.deps
            .say(id, reply.button("🏠 Menú principal", CallbackAction::MainMenu))
            .await?;
        Ok(())
    }

    async fn prompt_step(&self, id: &ConversationId, record: &AssignmentRecord) -> FlowResult<()> {
        let reply = match record.step {
            AssignmentStep::AwaitingDocument => Reply::text(
                "📎 Envía una foto o el PDF de la póliza. Intentaré leer los datos por ti.",
            ),
            AssignmentStep::AwaitingField(field) => Reply::text(field.prompt()),
            AssignmentStep::ConfirmingIssueDate => Reply::text(format!(
                "{}\n\n¿La fecha de emisión es correcta?",
                record.summary()
            ))
            .row(vec![
                Button::new("✅ Confirmar", CallbackAction::IssueDate(true)),
                Button::new("✏️ Cambiar fecha", CallbackAction::IssueDate(false)),
            ]),
        };
        self.deps
            .say(id, reply.row(vec![cancel_button(self.name())]))
            .await?;
        Ok(())
    }

    /// Handle a text message. `false` when there is no assignment for `id`.
    pub async fn process_text(&self, id: &ConversationId, text: &str) -> FlowResult<bool> {
        let Some(record) = self.deps.registry.assignments.get(id) else {
            return Ok(false);
        };

        let field = match record.step {
            AssignmentStep::AwaitingField(field) => field,
            AssignmentStep::AwaitingDocument => {
                self.deps
                    .say(id, "📎 Espero una foto o el PDF de la póliza.")
                    .await?;
                return Ok(true);
            }
            AssignmentStep::ConfirmingIssueDate => {
                self.deps
                    .say(id, "Usa los botones para confirmar o cambiar la fecha.")
                    .await?;
                return Ok(true);
            }
        };

        if field == PolicyField::Number {
            if let Some(number) = normalize_policy_number(text) {
                if self.deps.policies.find_policy_by_number(&number).await?.is_some() {
                    self.deps
                        .say(
                            id,
                            format!("⚠️ La póliza {} ya existe. Escribe otro número:", number),
                        )
                        .await?;
                    return Ok(true);
                }
            }
        }

        let Some(result) = self
            .deps
            .registry
            .assignments
            .update(id, |record| record.accept(field, text).map(|()| record.clone()))
        else {
            return Ok(true);
        };
        match result {
            Ok(updated) => self.prompt_step(id, &updated).await?,
            Err(reason) => {
                self.deps
                    .say(id, format!("⚠️ {}\n{}", reason, field.prompt()))
                    .await?;
            }
        }
        Ok(true)
    }

    /// Handle a photo or document. `false` when there is no assignment for `id`.
    pub async fn process_document(
        &self,
        id: &ConversationId,
        file: &IncomingFile,
    ) -> FlowResult<bool> {
        let Some(record) = self.deps.registry.assignments.get(id) else {
            return Ok(false);
        };
        if record.step != AssignmentStep::AwaitingDocument {
            self.deps
                .say(id, "Ahora mismo no espero documentos; responde al mensaje anterior.")
                .await?;
            return Ok(true);
        }
        if !file.is_image() && !file.is_pdf() {
            self.deps
                .say(id, "⚠️ Envía una foto o un PDF de la póliza.")
                .await?;
            return Ok(true);
        }

        let data = match self.deps.messenger.download(&file.file_id).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Policy document download failed for {}: {}", id, e);
                self.deps
                    .say(id, "❌ No pude descargar el archivo. Envíalo de nuevo.")
                    .await?;
                return Ok(true);
            }
        };

        let metadata = HashMap::from([
            ("vehicle_id".to_string(), record.vehicle_id.to_string()),
            ("uploaded_by".to_string(), id.to_string()),
        ]);
        let uploaded = self
            .deps
            .store_bytes(
                &data,
                file,
                &format!("polizas/asignacion/{}", record.vehicle_id),
                metadata,
            )
            .await?;

        let extracted = if file.is_image() {
            let progress = self.deps.say(id, "🔍 Leyendo la póliza...").await?;
            match self
                .deps
                .vision
                .extract_fields(&data, DocumentKind::PolicyDocument)
                .await
            {
                Ok(extracted) => {
                    self.deps
                        .messenger
                        .edit(
                            id,
                            progress,
                            Reply::text(format!(
                                "✅ Encontré {} de {} datos.",
                                extracted.fields_found.len(),
                                PolicyField::ORDER.len()
                            )),
                        )
                        .await?;
                    Some(extracted)
                }
                Err(e) => {
                    warn!("Policy extraction failed for {}: {}", id, e);
                    self.deps
                        .messenger
                        .edit(
                            id,
                            progress,
                            Reply::text("⚠️ No pude leer la póliza; te pediré los datos."),
                        )
                        .await?;
                    None
                }
            }
        } else {
            self.deps
                .say(id, "📄 PDF guardado. Te pediré los datos de la póliza.")
                .await?;
            None
        };

        let updated = self.deps.registry.assignments.update(id, |record| {
            if record.step != AssignmentStep::AwaitingDocument {
                return None;
            }
            record.document = Some(uploaded);
            match &extracted {
                Some(extracted) => record.apply_extraction(extracted),
                None => record.advance(),
            }
            Some(record.clone())
        });
        if let Some(Some(record)) = updated {
            self.prompt_step(id, &record).await?;
        }
        Ok(true)
    }

    /// Save the policy, link it to the vehicle and end the flow.
    /// `false` when the flow stays open.
    pub async fn confirm_issue_date(&self, id: &ConversationId) -> FlowResult<bool> {
        let Some(record) = self.deps.registry.assignments.get(id) else {
            self.deps
                .say(id, "No tienes una asignación de póliza en curso.")
                .await?;
            return Ok(false);
        };
        if record.step != AssignmentStep::ConfirmingIssueDate {
            self.deps
                .say(id, "Este botón ya no aplica al paso actual.")
                .await?;
            return Ok(false);
        }
        let (Some(number), Some(insurer)) = (record.number.clone(), record.insurer.clone()) else {
            return Err(invariant(format!("assignment of {} confirmed without policy data", id)));
        };

        let vehicle = match self.deps.vehicles.find_vehicle(record.vehicle_id).await? {
            Some(vehicle) if vehicle.policy_number.is_none() => vehicle,
            _ => {
                self.deps.registry.assignments.delete(id);
                self.deps.registry.release_base_autos_if_idle(id);
                self.deps
                    .say(id, "⚠️ El vehículo ya no está disponible para asignación.")
                    .await?;
                return Ok(false);
            }
        };

        let policy = NewPolicy {
            number,
            holder: record.vehicle_label.clone(),
            insurer,
            agent: record.agent.clone(),
            issue_date: record.issue_date,
            brand: Some(vehicle.brand.clone()),
            model: Some(vehicle.model.clone()),
            year: Some(vehicle.year),
            color: Some(vehicle.color.clone()),
            serie: Some(vehicle.serie.clone()),
            plates: Some(vehicle.plates.clone()),
            files: record.document.clone().into_iter().collect(),
            ..Default::default()
        };

        let saved = match self.deps.vehicles.assign_new_policy(vehicle.id, policy).await {
            Ok(saved) => saved,
            Err(StoreError::DuplicatePolicy(number)) => {
                self.deps.registry.assignments.update(id, |record| {
                    record.number = None;
                    record.step = AssignmentStep::AwaitingField(PolicyField::Number);
                });
                self.deps
                    .say(
                        id,
                        Reply::text(format!(
                            "⚠️ La póliza {} ya existe. {}",
                            number,
                            PolicyField::Number.prompt()
                        ))
                        .row(vec![cancel_button(self.name())]),
                    )
                    .await?;
                return Ok(false);
            }
            Err(StoreError::Validation(reason)) => {
                self.deps
                    .say(id, format!("⚠️ Datos inválidos: {}", reason))
                    .await?;
                return Ok(false);
            }
            Err(StoreError::NotFound(_)) => {
                self.deps.registry.assignments.delete(id);
                self.deps.registry.release_base_autos_if_idle(id);
                self.deps
                    .say(id, "⚠️ El vehículo ya no está disponible para asignación.")
                    .await?;
                return Ok(false);
            }
            Err(e) => {
                // Nothing was written, so the same confirmation can be retried
                error!("Policy assignment failed for {}: {}", id, e);
                self.deps
                    .say(
                        id,
                        Reply::text(
                            "❌ No pude guardar la póliza. Tus datos se conservan; intenta confirmar de nuevo.",
                        )
                        .button("✅ Confirmar", CallbackAction::IssueDate(true))
                        .row(vec![cancel_button(self.name())]),
                    )
                    .await?;
                return Ok(false);
            }
        };

        self.deps.registry.assignments.delete(id);
        self.deps.registry.release_base_autos_if_idle(id);
        info!(
            "Policy {} assigned to vehicle {} by {} ({:?} entry, started {})",
            saved.number,
            vehicle.id,
            id,
            record.mode,
            record.started_at.format("%H:%M:%S")
        );

        self.deps
            .say(
                id,
                Reply::text(format!(
                    "✅ Póliza {} asignada a {}.",
                    saved.number, record.vehicle_label
                ))
                .button(
                    "🔎 Ver póliza",
                    CallbackAction::start_with(FlowName::GetPolicy, saved.number.clone()),
                )
                .button("🏠 Menú principal", CallbackAction::MainMenu),
            )
            .await?;
        Ok(true)
    }

    pub async fn change_issue_date(&self, id: &ConversationId) -> FlowResult<()> {
        let changed = self.deps.registry.assignments.update(id, |record| {
            let allowed = record.step == AssignmentStep::ConfirmingIssueDate;
            if allowed {
                record.issue_date = None;
                record.step = AssignmentStep::AwaitingField(PolicyField::IssueDate);
            }
            allowed
        });

        match changed {
            Some(true) => {
                self.deps
                    .say(
                        id,
                        Reply::text(PolicyField::IssueDate.prompt())
                            .row(vec![cancel_button(self.name())]),
                    )
                    .await?;
            }
            Some(false) => {
                self.deps
                    .say(id, "Este botón ya no aplica al paso actual.")
                    .await?;
            }
            None => {
                self.deps
                    .say(id, "No tienes una asignación de póliza en curso.")
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FlowHandler for PolicyAssignmentFlow {
    fn name(&self) -> FlowName {
        FlowName::PolicyAssignment
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        self.has_assignment_in_progress(id)
    }

    async fn start(&self, id: &ConversationId, args: FlowArgs) -> FlowResult<StartOutcome> {
        let Some(vehicle_id) = args.vehicle_id else {
            self.offer_vehicles(id, args.ocr).await?;
            return Ok(StartOutcome::NotStarted);
        };

        let vehicle = match self.deps.vehicles.find_vehicle(vehicle_id).await? {
            Some(vehicle) if vehicle.policy_number.is_none() => vehicle,
            Some(vehicle) => {
                self.deps
                    .say(
                        id,
                        format!(
                            "⚠️ Ese vehículo ya tiene la póliza {}.",
                            vehicle.policy_number.unwrap_or_default()
                        ),
                    )
                    .await?;
                return Ok(StartOutcome::NotStarted);
            }
            None => {
                self.deps.say(id, "❌ No encontré ese vehículo.").await?;
                return Ok(StartOutcome::NotStarted);
            }
        };

        let label = vehicle_label(&vehicle);
        let (record, outcome) = match args.ocr {
            true if self.deps.vision.is_configured() => {
                (AssignmentRecord::ocr(vehicle.id, label), StartOutcome::Started)
            }
            true => (AssignmentRecord::legacy(vehicle.id, label), StartOutcome::Redirected),
            false => (AssignmentRecord::legacy(vehicle.id, label), StartOutcome::Started),
        };

        if !self
            .deps
            .registry
            .assignments
            .insert_if_absent(id, record.clone())
        {
            return Ok(StartOutcome::AlreadyActive);
        }
        self.deps
            .registry
            .flow_state
            .save_state(id, FlowContext::BaseAutos(BaseAutosKind::Assignment));
        info!(
            "Policy assignment ({:?}) for vehicle {} started by {}",
            record.mode, vehicle.id, id
        );

        if outcome == StartOutcome::Redirected {
            self.deps
                .say(id, "ℹ️ La lectura automática no está disponible; capturaremos los datos a mano.")
                .await?;
        }
        self.deps
            .say(id, format!("🚗 Vehículo: {}", record.vehicle_label))
            .await?;
        self.prompt_step(id, &record).await?;
        Ok(outcome)
    }

    fn cancel(&self, id: &ConversationId) -> bool {
        let removed = self.deps.registry.assignments.delete(id);
        self.deps.registry.release_base_autos_if_idle(id);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_asks_fields_in_order() {
        let mut record = AssignmentRecord::legacy(3, "NISSAN VERSA 2020 (ABC1234)".to_string());

        record.accept(PolicyField::Number, "pol-77").unwrap();
        assert_eq!(record.step, AssignmentStep::AwaitingField(PolicyField::Insurer));
        record.accept(PolicyField::Insurer, "Qualitas").unwrap();
        record.accept(PolicyField::Agent, "Luis Gómez").unwrap();
        record.accept(PolicyField::IssueDate, "05/01/2026").unwrap();

        assert_eq!(record.step, AssignmentStep::ConfirmingIssueDate);
        assert_eq!(record.number.as_deref(), Some("POL-77"));
    }

    #[test]
    fn test_rejects_field_not_being_asked() {
        let mut record = AssignmentRecord::legacy(3, "v".to_string());

        assert!(record.accept(PolicyField::Insurer, "GNP").is_err());
        assert!(record.accept(PolicyField::Number, "###").is_err());
        assert_eq!(record.step, AssignmentStep::AwaitingField(PolicyField::Number));
    }

    #[test]
    fn test_extraction_skips_to_first_gap() {
        let mut record = AssignmentRecord::ocr(3, "v".to_string());
        let extracted = ExtractedFields {
            fields: HashMap::from([
                ("poliza".to_string(), "A-1".to_string()),
                ("aseguradora".to_string(), "GNP".to_string()),
                ("fecha_emision".to_string(), "no legible".to_string()),
            ]),
            fields_found: vec!["poliza".to_string(), "aseguradora".to_string()],
        };

        record.apply_extraction(&extracted);

        assert_eq!(record.step, AssignmentStep::AwaitingField(PolicyField::Agent));
        assert_eq!(record.issue_date, None);
    }
}
