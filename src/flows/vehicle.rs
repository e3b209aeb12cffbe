//! Vehicle registration for the Base de Autos, by typing every field or
//! by photographing the tarjeta de circulación.

use super::{cancel_button, invariant, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::bot::callbacks::{CallbackAction, VehicleAction};
use crate::db::types::UploadedFile;
use crate::domain::vehicle::{VehicleField, VehicleFields};
use crate::error::{FlowResult, StoreError};
use crate::services::{Button, DocumentKind, ExtractedFields, IncomingFile, MessageRef, Reply};
use crate::state::{BaseAutosKind, ConversationId, FlowContext};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationMode {
    Manual,
    Ocr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VehicleState {
    AwaitingCard,
    RetryingCard,
    ConfirmingData,
    AwaitingMissingField,
    EditingField(VehicleField),
    AwaitingPhotos,
    Completed,
}

impl VehicleState {
    pub fn label(&self) -> &'static str {
        match self {
            VehicleState::AwaitingCard => "ESPERANDO_TARJETA",
            VehicleState::RetryingCard => "REINTENTANDO_TARJETA",
            VehicleState::ConfirmingData => "CONFIRMANDO_DATOS",
            VehicleState::AwaitingMissingField => "ESPERANDO_DATO_FALTANTE",
            VehicleState::EditingField(_) => "EDITANDO_CAMPO",
            VehicleState::AwaitingPhotos => "ESPERANDO_FOTOS_VEHICULO",
            VehicleState::Completed => "COMPLETADO",
        }
    }

    fn expects_card(&self) -> bool {
        matches!(self, VehicleState::AwaitingCard | VehicleState::RetryingCard)
    }
}

impl fmt::Display for VehicleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// In-progress registration of one vehicle.
///
/// `current` is always the head of `missing` while `missing` is non-empty,
/// and the record leaves `AwaitingMissingField` as soon as it is empty.
#[derive(Clone, Debug)]
pub struct VehicleRecord {
    pub mode: RegistrationMode,
    pub state: VehicleState,
    pub fields: VehicleFields,
    pub missing: Vec<VehicleField>,
    pub current: Option<VehicleField>,
    pub photos: Vec<UploadedFile>,
    pub detected_plates: Vec<String>,
    pub status_message: Option<MessageRef>,
    pub started_at: DateTime<Local>,
}

impl VehicleRecord {
    pub fn new(mode: RegistrationMode) -> Self {
        let mut record = Self {
            mode,
            state: VehicleState::AwaitingCard,
            fields: VehicleFields::default(),
            missing: Vec::new(),
            current: None,
            photos: Vec::new(),
            detected_plates: Vec::new(),
            status_message: None,
            started_at: Local::now(),
        };
        if mode == RegistrationMode::Manual {
            record.missing = VehicleField::ORDER.to_vec();
            record.next_missing();
        }
        record
    }

    fn next_missing(&mut self) {
        self.current = self.missing.first().copied();
        self.state = match self.current {
            Some(_) => VehicleState::AwaitingMissingField,
            None => VehicleState::ConfirmingData,
        };
    }

    /// Take the OCR values that pass validation. Returns the fields whose
    /// value was rejected; they are asked for like any other missing field.
    pub fn apply_extraction(&mut self, extracted: &ExtractedFields) -> Vec<VehicleField> {
        let mut rejected = Vec::new();
        for field in VehicleField::ORDER {
            let Some(raw) = extracted.fields.get(field.key()) else {
                continue;
            };
            match field.validate(raw) {
                Ok(value) => self.fields.set(field, value),
                Err(_) => rejected.push(field),
            }
        }
        self.missing = self.fields.missing();
        self.next_missing();
        rejected
    }

    /// Store a typed value for `current`. Returns the next field to ask for.
    pub fn accept_value(&mut self, raw: &str) -> Result<Option<VehicleField>, String> {
        let field = match (self.state, self.current) {
            (VehicleState::AwaitingMissingField, Some(field)) => field,
            _ => return Err("No hay ningún dato pendiente.".to_string()),
        };
        let value = field.validate(raw)?;
        self.fields.set(field, value);
        self.missing.retain(|f| *f != field);
        self.next_missing();
        Ok(self.current)
    }

    /// Replace one field from the confirmation screen.
    pub fn apply_edit(&mut self, raw: &str) -> Result<(), String> {
        let VehicleState::EditingField(field) = self.state else {
            return Err("No hay ningún campo en edición.".to_string());
        };
        let value = field.validate(raw)?;
        self.fields.set(field, value);
        self.state = VehicleState::ConfirmingData;
        Ok(())
    }
}

fn confirmation(fields: &VehicleFields) -> Reply {
    let mut reply = Reply::text(format!(
        "🚗 Datos del vehículo:\n\n{}\n\n¿Son correctos?",
        fields.summary()
    ))
    .row(vec![
        Button::new("✅ Confirmar", CallbackAction::Vehicle(VehicleAction::Confirm)),
        Button::new("🔄 Corregir todo", CallbackAction::Vehicle(VehicleAction::Correct)),
    ]);
    for pair in VehicleField::ORDER.chunks(2) {
        reply = reply.row(
            pair.iter()
                .map(|field| {
                    Button::new(
                        format!("✏️ {}", field.label()),
                        CallbackAction::Vehicle(VehicleAction::Edit(*field)),
                    )
                })
                .collect(),
        );
    }
    reply.row(vec![cancel_button(FlowName::VehicleRegistration)])
}

fn photo_status(record: &VehicleRecord) -> Reply {
    let mut text = format!("📸 Fotos recibidas: {}", record.photos.len());
    if !record.detected_plates.is_empty() {
        text.push_str(&format!("\n🔎 Placas detectadas: {}", record.detected_plates.join(", ")));
    }
    text.push_str("\n\nEnvía más fotos o finaliza el registro.");
    Reply::text(text)
        .button(
            "✅ Finalizar registro",
            CallbackAction::Vehicle(VehicleAction::Finalize),
        )
        .row(vec![cancel_button(FlowName::VehicleRegistration)])
}

/// Post the consolidated photo status and drop the previous one.
async fn send_photo_status(deps: &FlowDeps, id: &ConversationId) -> FlowResult<()> {
    let Some(record) = deps.registry.vehicles.get(id) else {
        return Ok(());
    };
    if record.state != VehicleState::AwaitingPhotos {
        return Ok(());
    }

    let sent = deps.say(id, photo_status(&record)).await?;
    if let Some(previous) = record.status_message {
        if let Err(e) = deps.messenger.delete(id, previous).await {
            debug!("Could not delete old photo status for {}: {}", id, e);
        }
    }
    deps.registry
        .vehicles
        .update(id, |r| r.status_message = Some(sent));
    Ok(())
}

pub struct VehicleRegistrationFlow {
    deps: FlowDeps,
}

impl VehicleRegistrationFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }

    pub fn state(&self, id: &ConversationId) -> Option<VehicleState> {
        self.deps.registry.vehicles.get(id).map(|record| record.state)
    }

    /// Whether a photo or document from `id` belongs to this flow.
    pub fn accepts_files(&self, id: &ConversationId) -> bool {
        self.state(id).is_some_and(|state| {
            state.expects_card() || state == VehicleState::AwaitingPhotos
        })
    }

    async fn prompt_field(&self, id: &ConversationId, field: VehicleField) -> FlowResult<()> {
        self.deps
            .say(
                id,
                Reply::text(field.prompt()).row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(())
    }

    async fn ask_card(&self, id: &ConversationId) -> FlowResult<()> {
        self.deps
            .say(
                id,
                Reply::text("📸 Envía una foto clara de la tarjeta de circulación.")
                    .button(
                        "⌨️ Capturar a mano",
                        CallbackAction::Vehicle(VehicleAction::SwitchToManual),
                    )
                    .row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(())
    }

    /// Handle a text message. `false` when there is no registration for `id`.
    pub async fn process_text(&self, id: &ConversationId, text: &str) -> FlowResult<bool> {
        let Some(state) = self.state(id) else {
            return Ok(false);
        };

        match state {
            VehicleState::AwaitingMissingField => {
                let Some(result) = self
                    .deps
                    .registry
                    .vehicles
                    .update(id, |record| record.accept_value(text))
                else {
                    return Ok(true);
                };
                match result {
                    Ok(Some(next)) => self.prompt_field(id, next).await?,
                    Ok(None) => self.show_confirmation(id).await?,
                    Err(reason) => {
                        let current = self
                            .deps
                            .registry
                            .vehicles
                            .get(id)
                            .and_then(|record| record.current);
                        let prompt = current.map(|f| f.prompt()).unwrap_or_default();
                        self.deps
                            .say(id, format!("⚠️ {}\n{}", reason, prompt))
                            .await?;
                    }
                }
            }
            VehicleState::EditingField(field) => {
                match self
                    .deps
                    .registry
                    .vehicles
                    .update(id, |record| record.apply_edit(text))
                {
                    Some(Ok(())) => self.show_confirmation(id).await?,
                    Some(Err(reason)) => {
                        self.deps
                            .say(id, format!("⚠️ {}\n{}", reason, field.prompt()))
                            .await?;
                    }
                    None => {}
                }
            }
            VehicleState::AwaitingCard | VehicleState::RetryingCard => {
                self.deps
                    .say(id, "📸 Espero una foto de la tarjeta de circulación.")
                    .await?;
            }
            VehicleState::ConfirmingData => {
                self.deps
                    .say(id, "Usa los botones para confirmar o corregir los datos.")
                    .await?;
            }
            VehicleState::AwaitingPhotos => {
                self.deps
                    .say(id, "📷 Envía fotos del vehículo o pulsa Finalizar registro.")
                    .await?;
            }
            VehicleState::Completed => {
                self.deps.say(id, "⏳ Guardando el registro...").await?;
            }
        }
        Ok(true)
    }

    /// Handle a photo or document. `false` when there is no registration for `id`.
    pub async fn process_file(&self, id: &ConversationId, file: &IncomingFile) -> FlowResult<bool> {
        let Some(record) = self.deps.registry.vehicles.get(id) else {
            return Ok(false);
        };

        if !file.is_image() {
            self.deps
                .say(id, "⚠️ Envía una imagen (foto o archivo de imagen).")
                .await?;
            return Ok(true);
        }

        match record.state {
            state if state.expects_card() => self.process_card(id, record, file).await?,
            VehicleState::AwaitingPhotos => self.process_vehicle_photo(id, record, file).await?,
            state => {
                debug!("Ignoring image for {} in {}", id, state);
                self.deps
                    .say(id, "Ahora mismo no espero fotos; usa los botones del mensaje anterior.")
                    .await?;
            }
        }
        Ok(true)
    }

    async fn process_card(
        &self,
        id: &ConversationId,
        record: VehicleRecord,
        file: &IncomingFile,
    ) -> FlowResult<()> {
        let image = match self.deps.messenger.download(&file.file_id).await {
            Ok(image) => image,
            Err(e) => {
                warn!("Card download failed for {}: {}", id, e);
                self.deps
                    .say(id, "❌ No pude descargar la imagen. Envíala de nuevo.")
                    .await?;
                return Ok(());
            }
        };

        let progress = self.deps.say(id, "🔍 Leyendo la tarjeta...").await?;

        let extracted = match self
            .deps
            .vision
            .extract_fields(&image, DocumentKind::VehicleCard)
            .await
        {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!("Card extraction failed for {}: {}", id, e);
                self.deps
                    .messenger
                    .edit(
                        id,
                        progress,
                        Reply::text("❌ No pude leer la tarjeta.")
                            .row(vec![
                                Button::new(
                                    "🔁 Reintentar",
                                    CallbackAction::Vehicle(VehicleAction::RetryCard),
                                ),
                                Button::new(
                                    "⌨️ Capturar a mano",
                                    CallbackAction::Vehicle(VehicleAction::SwitchToManual),
                                ),
                            ])
                            .row(vec![cancel_button(self.name())]),
                    )
                    .await?;
                return Ok(());
            }
        };

        let mut next = record;
        let rejected = next.apply_extraction(&extracted);
        if !self.deps.registry.vehicles.replace_if_present(id, next.clone()) {
            return Ok(());
        }
        info!(
            "Card read for {}: found {:?}, rejected {:?}",
            id, extracted.fields_found, rejected
        );

        let found = VehicleField::ORDER.len() - next.missing.len();
        self.deps
            .messenger
            .edit(
                id,
                progress,
                Reply::text(format!(
                    "✅ Tarjeta leída: {} de {} datos.",
                    found,
                    VehicleField::ORDER.len()
                )),
            )
            .await?;

        match next.current {
            Some(field) => {
                let labels: Vec<&str> = next.missing.iter().map(|f| f.label()).collect();
                self.deps
                    .say(id, format!("Faltan: {}", labels.join(", ")))
                    .await?;
                self.prompt_field(id, field).await
            }
            None => self.show_confirmation(id).await,
        }
    }

    async fn process_vehicle_photo(
        &self,
        id: &ConversationId,
        record: VehicleRecord,
        file: &IncomingFile,
    ) -> FlowResult<()> {
        let max = self.deps.settings.max_vehicle_photos;
        if record.photos.len() >= max {
            self.deps
                .say(
                    id,
                    format!("⚠️ Ya tienes {} fotos, el máximo. Pulsa Finalizar registro.", max),
                )
                .await?;
            return Ok(());
        }

        let image = match self.deps.messenger.download(&file.file_id).await {
            Ok(image) => image,
            Err(e) => {
                warn!("Vehicle photo download failed for {}: {}", id, e);
                self.deps
                    .say(id, "❌ No pude descargar la foto. Envíala de nuevo.")
                    .await?;
                return Ok(());
            }
        };

        let serie = record.fields.serie.clone().unwrap_or_else(|| "sin-serie".to_string());
        let metadata = HashMap::from([
            ("serie".to_string(), serie.clone()),
            ("uploaded_by".to_string(), id.to_string()),
        ]);
        let uploaded = self
            .deps
            .store_bytes(&image, file, &format!("vehiculos/{}", serie), metadata)
            .await?;

        let plates = if self.deps.vision.is_configured() {
            match self.deps.vision.detect_plates(&image).await {
                Ok(plates) => plates,
                Err(e) => {
                    debug!("Plate detection skipped for {}: {}", id, e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let added = self
            .deps
            .registry
            .vehicles
            .update(id, |record| {
                if record.state != VehicleState::AwaitingPhotos {
                    return false;
                }
                record.photos.push(uploaded);
                for plate in plates {
                    if !record.detected_plates.contains(&plate) {
                        record.detected_plates.push(plate);
                    }
                }
                true
            })
            .unwrap_or(false);
        if !added {
            return Ok(());
        }

        let deps = self.deps.clone();
        let id = *id;
        self.deps
            .registry
            .photo_batches
            .schedule(id.user_key(), move || async move {
                if let Err(e) = send_photo_status(&deps, &id).await {
                    warn!("Photo status for {} failed: {}", id, e);
                }
            });
        Ok(())
    }

    async fn show_confirmation(&self, id: &ConversationId) -> FlowResult<()> {
        let Some(record) = self.deps.registry.vehicles.get(id) else {
            return Ok(());
        };
        self.deps.say(id, confirmation(&record.fields)).await?;
        Ok(())
    }

    async fn no_registration(&self, id: &ConversationId) -> FlowResult<()> {
        self.deps
            .say(
                id,
                Reply::text("No tienes un registro de vehículo en curso.")
                    .button("🏠 Menú principal", CallbackAction::MainMenu),
            )
            .await?;
        Ok(())
    }

    /// Accept the collected data and move on to the photos.
    pub async fn confirm(&self, id: &ConversationId) -> FlowResult<()> {
        let moved = self.deps.registry.vehicles.update(id, |record| {
            let ready = record.state == VehicleState::ConfirmingData && record.missing.is_empty();
            if ready {
                record.state = VehicleState::AwaitingPhotos;
            }
            ready
        });

        match moved {
            Some(true) => {
                self.deps
                    .say(
                        id,
                        Reply::text(
                            "📷 Datos confirmados. Ahora envía fotos del vehículo (al menos una).",
                        )
                        .row(vec![cancel_button(self.name())]),
                    )
                    .await?;
            }
            Some(false) => {
                self.deps
                    .say(id, "Este botón ya no aplica al paso actual.")
                    .await?;
            }
            None => self.no_registration(id).await?,
        }
        Ok(())
    }

    /// Discard everything collected and ask for each field by hand.
    pub async fn restart_manual(&self, id: &ConversationId) -> FlowResult<()> {
        let restartable = self
            .state(id)
            .is_some_and(|state| state != VehicleState::Completed);
        if !restartable
            || !self
                .deps
                .registry
                .vehicles
                .replace_if_present(id, VehicleRecord::new(RegistrationMode::Manual))
        {
            return self.no_registration(id).await;
        }
        self.deps
            .registry
            .photo_batches
            .cancel(&id.user_key());

        self.deps
            .say(id, "⌨️ Captura manual: te pediré cada dato.")
            .await?;
        self.prompt_field(id, VehicleField::ORDER[0]).await
    }

    pub async fn edit_field(&self, id: &ConversationId, field: VehicleField) -> FlowResult<()> {
        let editing = self.deps.registry.vehicles.update(id, |record| {
            let allowed = record.state == VehicleState::ConfirmingData;
            if allowed {
                record.state = VehicleState::EditingField(field);
            }
            allowed
        });

        match editing {
            Some(true) => self.prompt_field(id, field).await,
            Some(false) => {
                self.deps
                    .say(id, "Este botón ya no aplica al paso actual.")
                    .await?;
                Ok(())
            }
            None => self.no_registration(id).await,
        }
    }

    pub async fn retry_card(&self, id: &ConversationId) -> FlowResult<()> {
        let retrying = self.deps.registry.vehicles.update(id, |record| {
            let allowed = record.state.expects_card();
            if allowed {
                record.state = VehicleState::RetryingCard;
            }
            allowed
        });

        match retrying {
            Some(true) => self.ask_card(id).await,
            Some(false) => {
                self.deps
                    .say(id, "Este botón ya no aplica al paso actual.")
                    .await?;
                Ok(())
            }
            None => self.no_registration(id).await,
        }
    }

    /// Persist the vehicle. `false` when the registration stays open.
    pub async fn finalize(&self, id: &ConversationId) -> FlowResult<bool> {
        let Some(record) = self.deps.registry.vehicles.get(id) else {
            self.no_registration(id).await?;
            return Ok(false);
        };
        if record.state != VehicleState::AwaitingPhotos {
            self.deps
                .say(id, "Aún no puedes finalizar: completa y confirma los datos primero.")
                .await?;
            return Ok(false);
        }
        if record.photos.is_empty() {
            self.deps
                .say(id, "⚠️ Envía al menos una foto del vehículo antes de finalizar.")
                .await?;
            return Ok(false);
        }
        let draft = record
            .fields
            .to_draft()
            .ok_or_else(|| invariant(format!("vehicle record of {} confirmed with missing fields", id)))?;

        self.deps
            .registry
            .vehicles
            .update(id, |r| r.state = VehicleState::Completed);
        self.deps.registry.photo_batches.cancel(&id.user_key());

        let owner = id
            .user_id
            .and_then(|user| i64::try_from(user).ok())
            .unwrap_or(id.chat_id);
        let photo_count = record.photos.len();
        let vehicle = match self
            .deps
            .vehicles
            .register_vehicle(draft, owner, record.photos.clone())
            .await
        {
            Ok(vehicle) => vehicle,
            Err(e) => {
                self.deps
                    .registry
                    .vehicles
                    .update(id, |r| r.state = VehicleState::AwaitingPhotos);
                let text = match &e {
                    StoreError::DuplicateVehicle(what) => {
                        format!("⚠️ Ya existe un vehículo registrado con {}.", what)
                    }
                    other => {
                        error!("Vehicle registration failed for {}: {}", id, other);
                        "❌ No pude guardar el vehículo. Tus datos se conservan; intenta finalizar de nuevo."
                            .to_string()
                    }
                };
                self.deps
                    .say(
                        id,
                        Reply::text(text)
                            .button(
                                "✅ Finalizar registro",
                                CallbackAction::Vehicle(VehicleAction::Finalize),
                            )
                            .row(vec![cancel_button(self.name())]),
                    )
                    .await?;
                return Ok(false);
            }
        };

        self.deps.registry.vehicles.delete(id);
        self.deps.registry.release_base_autos_if_idle(id);
        if let Some(status) = record.status_message {
            if let Err(e) = self.deps.messenger.delete(id, status).await {
                debug!("Could not delete photo status for {}: {}", id, e);
            }
        }
        info!(
            "Vehicle {} ({}) registered by {} with {} photos ({:?} entry, started {})",
            vehicle.id,
            vehicle.serie,
            id,
            photo_count,
            record.mode,
            record.started_at.format("%H:%M:%S")
        );

        self.deps
            .say(
                id,
                Reply::text(format!(
                    "✅ Vehículo registrado: {} {} {} ({}), placas {}. {} fotos guardadas.",
                    vehicle.brand, vehicle.model, vehicle.year, vehicle.color, vehicle.plates, photo_count
                ))
                .button(
                    "📄 Asignar póliza",
                    CallbackAction::start_with(FlowName::PolicyAssignment, vehicle.id.to_string()),
                )
                .button("🏠 Menú principal", CallbackAction::MainMenu),
            )
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl FlowHandler for VehicleRegistrationFlow {
    fn name(&self) -> FlowName {
        FlowName::VehicleRegistration
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        self.deps.registry.vehicles.has(id)
    }

    async fn start(&self, id: &ConversationId, args: FlowArgs) -> FlowResult<StartOutcome> {
        let (mode, outcome) = match args.ocr {
            true if self.deps.vision.is_configured() => (RegistrationMode::Ocr, StartOutcome::Started),
            true => (RegistrationMode::Manual, StartOutcome::Redirected),
            false => (RegistrationMode::Manual, StartOutcome::Started),
        };

        if !self
            .deps
            .registry
            .vehicles
            .insert_if_absent(id, VehicleRecord::new(mode))
        {
            return Ok(StartOutcome::AlreadyActive);
        }
        self.deps
            .registry
            .flow_state
            .save_state(id, FlowContext::BaseAutos(BaseAutosKind::Registration));
        info!("Vehicle registration ({:?}) started for {}", mode, id);

        if outcome == StartOutcome::Redirected {
            self.deps
                .say(id, "ℹ️ La lectura automática no está disponible; capturaremos los datos a mano.")
                .await?;
        }
        match mode {
            RegistrationMode::Ocr => self.ask_card(id).await?,
            RegistrationMode::Manual => self.prompt_field(id, VehicleField::ORDER[0]).await?,
        }
        Ok(outcome)
    }

    fn cancel(&self, id: &ConversationId) -> bool {
        let removed = self.deps.registry.vehicles.delete(id);
        self.deps.registry.photo_batches.cancel(&id.user_key());
        self.deps.registry.release_base_autos_if_idle(id);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extracted(pairs: &[(&str, &str)]) -> ExtractedFields {
        ExtractedFields {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fields_found: pairs.iter().map(|(k, _)| k.to_string()).collect(),
        }
    }

    #[test]
    fn test_manual_record_asks_serie_first() {
        let record = VehicleRecord::new(RegistrationMode::Manual);

        assert_eq!(record.state, VehicleState::AwaitingMissingField);
        assert_eq!(record.current, Some(VehicleField::Serie));
        assert_eq!(record.missing, VehicleField::ORDER.to_vec());
    }

    #[test]
    fn test_invalid_ocr_value_counts_as_missing() {
        let mut record = VehicleRecord::new(RegistrationMode::Ocr);

        let rejected = record.apply_extraction(&extracted(&[
            ("serie", "3VW1K1AJ5EM123456"),
            ("marca", "VOLKSWAGEN"),
            ("submarca", "JETTA"),
            ("anio", "1890"),
            ("color", "BLANCO"),
            ("placas", "ABC1234"),
        ]));

        assert_eq!(rejected, vec![VehicleField::Anio]);
        assert_eq!(record.missing, vec![VehicleField::Anio]);
        assert_eq!(record.current, Some(VehicleField::Anio));
        assert_eq!(record.state, VehicleState::AwaitingMissingField);
    }

    #[test]
    fn test_missing_fields_converge_in_order() {
        let mut record = VehicleRecord::new(RegistrationMode::Ocr);
        record.apply_extraction(&extracted(&[("marca", "NISSAN"), ("color", "GRIS")]));
        assert_eq!(
            record.missing,
            vec![
                VehicleField::Serie,
                VehicleField::Submarca,
                VehicleField::Anio,
                VehicleField::Placas
            ]
        );

        let mut asked = Vec::new();
        for value in ["3N1CN7AD0LK123456", "VERSA", "2020", "xyz-1234"] {
            asked.push(record.current);
            record.accept_value(value).unwrap();
        }

        assert_eq!(
            asked,
            vec![
                Some(VehicleField::Serie),
                Some(VehicleField::Submarca),
                Some(VehicleField::Anio),
                Some(VehicleField::Placas)
            ]
        );
        assert_eq!(record.state, VehicleState::ConfirmingData);
        assert!(record.missing.is_empty());
        assert_eq!(record.fields.marca.as_deref(), Some("NISSAN"));
        assert_eq!(record.fields.placas.as_deref(), Some("XYZ-1234"));
    }

    #[test]
    fn test_invalid_value_keeps_the_same_field() {
        let mut record = VehicleRecord::new(RegistrationMode::Manual);

        assert!(record.accept_value("corta").is_err());
        assert_eq!(record.current, Some(VehicleField::Serie));
        assert_eq!(record.missing.len(), 6);
    }

    #[test]
    fn test_edit_returns_to_confirmation() {
        let mut record = VehicleRecord::new(RegistrationMode::Manual);
        for value in ["3N1CN7AD0LK123456", "NISSAN", "VERSA", "2020", "gris", "ABC1234"] {
            record.accept_value(value).unwrap();
        }
        record.state = VehicleState::EditingField(VehicleField::Color);

        record.apply_edit("Rojo").unwrap();

        assert_eq!(record.state, VehicleState::ConfirmingData);
        assert_eq!(record.fields.color.as_deref(), Some("Rojo"));
        assert_eq!(record.fields.serie.as_deref(), Some("3N1CN7AD0LK123456"));
    }
}
