//! In-process doubles for the chat transport, vision and object storage,
//! and end-to-end conversations driven through the router.

use crate::bot::callbacks::{CallbackAction, VehicleAction};
use crate::config::FlowsConfig;
use crate::db::repo::Repo;
use crate::db::types::UploadedFile;
use crate::domain::policy::NewPolicy;
use crate::domain::vehicle::VehicleDraft;
use crate::error::{StorageError, StoreError, TransportError, VisionError};
use crate::flows::vehicle::VehicleState;
use crate::flows::{FlowArgs, FlowDeps, FlowName, StartOutcome};
use crate::router::MessageRouter;
use crate::services::{
    DocumentKind, ExtractedFields, FileKind, IncomingFile, MessageRef, Messenger, ObjectStorage,
    Policy, Reply, StoredObject, Vehicle, VehicleStore, VisionService,
};
use crate::state::{CleanupService, ConversationId, FlowStateRegistry};
use async_trait::async_trait;
use sea_orm::{Database, DbErr};
use sea_orm_migration::MigratorTrait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct RecordingMessenger {
    next_id: AtomicI32,
    pub sent: Mutex<Vec<(ConversationId, Reply)>>,
    pub edits: Mutex<Vec<(MessageRef, Reply)>>,
    pub deleted: Mutex<Vec<MessageRef>>,
    pub answers: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingMessenger {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reply)| reply.text.clone())
            .collect()
    }

    pub fn last_text(&self) -> String {
        self.texts().pop().unwrap_or_default()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, to: &ConversationId, reply: Reply) -> Result<MessageRef, TransportError> {
        self.sent.lock().unwrap().push((*to, reply));
        Ok(MessageRef(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn edit(
        &self,
        _to: &ConversationId,
        message: MessageRef,
        reply: Reply,
    ) -> Result<(), TransportError> {
        self.edits.lock().unwrap().push((message, reply));
        Ok(())
    }

    async fn delete(&self, _to: &ConversationId, message: MessageRef) -> Result<(), TransportError> {
        self.deleted.lock().unwrap().push(message);
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<String>,
    ) -> Result<(), TransportError> {
        self.answers
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text));
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        Ok(format!("bytes of {}", file_id).into_bytes())
    }
}

/// Take one unit from `budget`. True while it was still positive.
fn consume(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Vision that answers every card read with the same fields, after
/// failing the first `failures` reads.
#[derive(Default)]
pub struct ScriptedVision {
    pub configured: bool,
    pub card: Option<ExtractedFields>,
    pub failures: AtomicU32,
}

impl ScriptedVision {
    pub fn reading(pairs: &[(&str, &str)]) -> Self {
        Self {
            configured: true,
            card: Some(ExtractedFields {
                fields: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                fields_found: pairs.iter().map(|(k, _)| k.to_string()).collect(),
            }),
            failures: AtomicU32::new(0),
        }
    }

    pub fn failing_first(self, reads: u32) -> Self {
        self.failures.store(reads, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl VisionService for ScriptedVision {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn extract_fields(
        &self,
        _image: &[u8],
        _kind: DocumentKind,
    ) -> Result<ExtractedFields, VisionError> {
        match (&self.card, self.configured) {
            (_, false) => Err(VisionError::NotConfigured),
            (_, true) if consume(&self.failures) => Err(VisionError::Timeout),
            (Some(card), true) => Ok(card.clone()),
            (None, true) => Err(VisionError::InvalidResponse("unreadable".to_string())),
        }
    }

    async fn detect_plates(&self, _image: &[u8]) -> Result<Vec<String>, VisionError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        data: &[u8],
        key: &str,
        content_type: &str,
        _metadata: &HashMap<String, String>,
    ) -> Result<StoredObject, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(StoredObject {
            url: format!("memory://{}", key),
            key: key.to_string(),
            size: data.len() as u64,
            content_type: content_type.to_string(),
        })
    }

    fn signed_url(&self, key: &str, _ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("memory://{}?signed", key))
    }
}

/// The real repository, with the next `failures` vehicle writes failing
/// as if the database were unreachable.
pub struct FlakyVehicles {
    repo: Arc<Repo>,
    pub failures: AtomicU32,
}

impl FlakyVehicles {
    fn check(&self) -> Result<(), StoreError> {
        match consume(&self.failures) {
            true => Err(StoreError::Database(DbErr::Custom("database is locked".to_string()))),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl VehicleStore for FlakyVehicles {
    async fn register_vehicle(
        &self,
        draft: VehicleDraft,
        owner_user_id: i64,
        photos: Vec<UploadedFile>,
    ) -> Result<Vehicle, StoreError> {
        self.check()?;
        self.repo.register_vehicle(draft, owner_user_id, photos).await
    }

    async fn find_vehicle(&self, vehicle_id: i32) -> Result<Option<Vehicle>, StoreError> {
        self.repo.find_vehicle(vehicle_id).await
    }

    async fn vehicles_without_policy(&self, limit: u64) -> Result<Vec<Vehicle>, StoreError> {
        self.repo.vehicles_without_policy(limit).await
    }

    async fn assign_new_policy(&self, vehicle_id: i32, data: NewPolicy) -> Result<Policy, StoreError> {
        self.check()?;
        self.repo.assign_new_policy(vehicle_id, data).await
    }
}

pub struct Harness {
    pub router: MessageRouter,
    pub messenger: Arc<RecordingMessenger>,
    pub storage: Arc<MemoryStorage>,
    pub registry: Arc<FlowStateRegistry>,
    pub repo: Arc<Repo>,
    pub vehicles: Arc<FlakyVehicles>,
}

impl Harness {
    pub async fn new(vision: ScriptedVision) -> Self {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        let repo = Arc::new(Repo::new(db));

        let settings = FlowsConfig {
            photo_batch_window_ms: 2000,
            ..Default::default()
        };
        let registry = Arc::new(FlowStateRegistry::new(settings.photo_batch_window()));
        let messenger = Arc::new(RecordingMessenger::default());
        let storage = Arc::new(MemoryStorage::default());
        let vehicles = Arc::new(FlakyVehicles {
            repo: repo.clone(),
            failures: AtomicU32::new(0),
        });

        let deps = FlowDeps {
            messenger: messenger.clone(),
            policies: repo.clone(),
            vehicles: vehicles.clone(),
            vision: Arc::new(vision),
            storage: storage.clone(),
            registry: registry.clone(),
            cleanup: CleanupService::new(registry.clone()),
            settings,
            link_ttl: Duration::from_secs(3600),
        };

        Self {
            router: MessageRouter::new(deps),
            messenger,
            storage,
            registry,
            repo,
            vehicles,
        }
    }

    pub fn fail_next_vehicle_writes(&self, writes: u32) {
        self.vehicles.failures.store(writes, Ordering::SeqCst);
    }

    pub async fn press(&self, id: &ConversationId, action: CallbackAction) -> bool {
        self.router
            .route_callback(id, "cb", &action.to_string())
            .await
    }

    pub fn vehicle_state(&self, id: &ConversationId) -> Option<VehicleState> {
        self.registry.vehicles.get(id).map(|record| record.state)
    }
}

pub fn photo(n: usize) -> IncomingFile {
    IncomingFile {
        file_id: format!("photo-{}", n),
        file_name: None,
        mime_type: None,
        size: Some(1024),
        kind: FileKind::Photo,
    }
}

pub fn document(file_id: &str, name: Option<&str>, mime: &str) -> IncomingFile {
    IncomingFile {
        file_id: file_id.to_string(),
        file_name: name.map(str::to_string),
        mime_type: Some(mime.to_string()),
        size: Some(2048),
        kind: FileKind::Document,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::Coordinates;
    use crate::domain::vehicle::VehicleField;
    use crate::flows::assignment::{AssignmentRecord, AssignmentStep};
    use crate::services::PolicyStore;
    use crate::state::{sweep_expired, AwaitingFlow, BaseAutosKind, FlowContext, FlowEntity, Pending};

    const SERIE: &str = "3N1CN7AD0LK123456";

    fn user(chat: i64, user: u64) -> ConversationId {
        ConversationId::new(chat, None, Some(user))
    }

    /// Type every field of a manual registration and confirm it.
    async fn manual_vehicle_confirmed(h: &Harness, id: &ConversationId) {
        let outcome = h
            .router
            .start_flow(FlowName::VehicleRegistration, id, FlowArgs::default())
            .await;
        assert_eq!(outcome, StartOutcome::Started);

        for value in [SERIE, "NISSAN", "VERSA", "2020", "GRIS", "ABC1234"] {
            assert!(h.router.route_text(id, value).await);
        }
        assert_eq!(h.vehicle_state(id), Some(VehicleState::ConfirmingData));

        assert!(h.press(id, CallbackAction::Vehicle(VehicleAction::Confirm)).await);
        assert_eq!(h.vehicle_state(id), Some(VehicleState::AwaitingPhotos));
    }

    #[tokio::test]
    async fn test_text_goes_to_highest_priority_step() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(1, 1);
        h.registry
            .awaiting(AwaitingFlow::PaymentNumber)
            .set(&id, Pending::Fresh);
        h.registry
            .awaiting(AwaitingFlow::PolicySearch)
            .set(&id, Pending::Fresh);

        assert!(h.router.route_text(&id, "p-404").await);

        assert!(h.messenger.last_text().contains("No encontré la póliza P-404"));
        assert!(h.registry.awaiting(AwaitingFlow::PolicySearch).has(&id));
        assert!(h.registry.awaiting(AwaitingFlow::PaymentNumber).has(&id));
    }

    #[tokio::test]
    async fn test_unsolicited_input_is_not_handled() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(1, 1);

        assert!(!h.router.route_text(&id, "hola").await);
        assert!(!h.router.route_photo(&id, &photo(1)).await);
        assert!(h.messenger.texts().is_empty());
    }

    #[tokio::test]
    async fn test_second_save_is_already_active() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(5, 5);

        let first = h
            .router
            .start_flow(FlowName::SavePolicy, &id, FlowArgs::default())
            .await;
        let second = h
            .router
            .start_flow(FlowName::SavePolicy, &id, FlowArgs::default())
            .await;

        assert_eq!(first, StartOutcome::Started);
        assert_eq!(second, StartOutcome::AlreadyActive);
        assert!(h.router.has_active_flow(FlowName::SavePolicy, &id));
    }

    #[tokio::test]
    async fn test_save_policy_then_open_it() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(5, 5);

        h.router
            .start_flow(FlowName::SavePolicy, &id, FlowArgs::default())
            .await;
        assert!(
            h.router
                .route_text(&id, "poliza: abc-123\ntitular: Ana López\naseguradora: GNP")
                .await
        );

        let saved = h.repo.find_policy_by_number("ABC-123").await.unwrap();
        assert_eq!(saved.map(|p| p.holder), Some("Ana López".to_string()));
        assert!(!h.router.has_active_flow(FlowName::SavePolicy, &id));
        assert_eq!(
            h.registry.flow_state.open_policy(&id),
            Some("ABC-123".to_string())
        );

        // A known policy is shown straight away instead of prompting
        let outcome = h
            .router
            .start_flow(FlowName::GetPolicy, &id, FlowArgs::policy("ABC-123"))
            .await;
        assert_eq!(outcome, StartOutcome::NotStarted);
        assert!(!h.registry.awaiting(AwaitingFlow::PolicySearch).has(&id));
    }

    #[tokio::test]
    async fn test_open_policy_links_its_files() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(5, 6);
        h.router
            .start_flow(FlowName::SavePolicy, &id, FlowArgs::default())
            .await;
        h.router
            .route_text(&id, "poliza: P-77\ntitular: Luis Pérez\naseguradora: Qualitas")
            .await;
        let stored = StoredObject {
            url: "memory://polizas/P-77/caratula.pdf".to_string(),
            key: "polizas/P-77/caratula.pdf".to_string(),
            size: 10,
            content_type: "application/pdf".to_string(),
        };
        h.repo
            .attach_file("P-77", stored.into_uploaded_file("caratula.pdf"))
            .await
            .unwrap();

        h.router
            .start_flow(FlowName::GetPolicy, &id, FlowArgs::policy("P-77"))
            .await;

        let text = h.messenger.last_text();
        assert!(text.contains("📎 Archivos recientes:"));
        assert!(text.contains("• caratula.pdf: memory://polizas/P-77/caratula.pdf?signed"));
    }

    #[tokio::test]
    async fn test_base_autos_blocks_other_flows() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(2, 2);

        let started = h
            .router
            .start_flow(FlowName::VehicleRegistration, &id, FlowArgs::default())
            .await;
        let save = h
            .router
            .start_flow(FlowName::SavePolicy, &id, FlowArgs::default())
            .await;
        let assign = h
            .router
            .start_flow(FlowName::PolicyAssignment, &id, FlowArgs::default())
            .await;

        assert_eq!(started, StartOutcome::Started);
        assert_eq!(save, StartOutcome::Conflict(FlowName::VehicleRegistration));
        assert_eq!(assign, StartOutcome::Conflict(FlowName::VehicleRegistration));
        assert!(!h.registry.awaiting(AwaitingFlow::SaveData).has(&id));
        assert!(h.registry.assignments.get(&id).is_none());

        assert!(h.router.cancel_flow(FlowName::VehicleRegistration, &id).await);
        assert!(!h
            .registry
            .flow_state
            .has_state(&id, FlowEntity::BaseAutos));
        let save = h
            .router
            .start_flow(FlowName::SavePolicy, &id, FlowArgs::default())
            .await;
        assert_eq!(save, StartOutcome::Started);
    }

    #[tokio::test]
    async fn test_ocr_card_missing_color_asks_for_it() {
        let vision = ScriptedVision::reading(&[
            ("serie", SERIE),
            ("marca", "NISSAN"),
            ("submarca", "VERSA"),
            ("anio", "2020"),
            ("placas", "ABC1234"),
        ]);
        let h = Harness::new(vision).await;
        let id = ConversationId::new(100, None, Some(7));

        let outcome = h
            .router
            .start_flow(FlowName::VehicleRegistration, &id, FlowArgs::ocr())
            .await;
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(h.vehicle_state(&id), Some(VehicleState::AwaitingCard));

        assert!(h.router.route_photo(&id, &photo(0)).await);
        let record = h.registry.vehicles.get(&id).unwrap();
        assert_eq!(record.state, VehicleState::AwaitingMissingField);
        assert_eq!(record.current, Some(VehicleField::Color));
        assert_eq!(h.messenger.last_text(), "Escribe el color del vehículo:");

        assert!(h.router.route_text(&id, "rojo").await);
        let record = h.registry.vehicles.get(&id).unwrap();
        assert_eq!(record.state, VehicleState::ConfirmingData);
        assert!(record.missing.is_empty());
        assert_eq!(record.fields.color.as_deref(), Some("rojo"));
    }

    #[tokio::test]
    async fn test_ocr_without_vision_falls_back_to_manual() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(3, 3);

        let outcome = h
            .router
            .start_flow(FlowName::VehicleRegistration, &id, FlowArgs::ocr())
            .await;

        assert_eq!(outcome, StartOutcome::Redirected);
        assert_eq!(h.vehicle_state(&id), Some(VehicleState::AwaitingMissingField));
    }

    #[tokio::test]
    async fn test_invalid_value_keeps_asking_the_same_field() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(3, 3);
        h.router
            .start_flow(FlowName::VehicleRegistration, &id, FlowArgs::default())
            .await;

        assert!(h.router.route_text(&id, "corta").await);

        let record = h.registry.vehicles.get(&id).unwrap();
        assert_eq!(record.current, Some(VehicleField::Serie));
        assert_eq!(record.missing.len(), 6);
        assert!(h.messenger.last_text().starts_with("⚠️"));
    }

    #[tokio::test]
    async fn test_finalize_without_photos_stays_open() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(4, 4);
        manual_vehicle_confirmed(&h, &id).await;

        assert!(h.press(&id, CallbackAction::Vehicle(VehicleAction::Finalize)).await);

        assert_eq!(h.vehicle_state(&id), Some(VehicleState::AwaitingPhotos));
        assert!(h.messenger.last_text().contains("al menos una foto"));
        assert!(h.repo.vehicles_without_policy(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_photo_burst_is_acknowledged_once_then_finalized() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(6, 6);
        manual_vehicle_confirmed(&h, &id).await;

        tokio::time::pause();
        for n in 0..5 {
            assert!(h.router.route_photo(&id, &photo(n)).await);
        }
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tokio::time::resume();

        let statuses: Vec<String> = h
            .messenger
            .texts()
            .into_iter()
            .filter(|text| text.starts_with("📸 Fotos recibidas"))
            .collect();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].starts_with("📸 Fotos recibidas: 5"));
        assert_eq!(h.storage.objects.lock().unwrap().len(), 5);

        assert!(h.press(&id, CallbackAction::Vehicle(VehicleAction::Finalize)).await);

        let vehicles = h.repo.vehicles_without_policy(10).await.unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].serie, SERIE);
        assert_eq!(vehicles[0].owner_user_id, 6);
        assert_eq!(vehicles[0].photos.len(), 5);
        assert!(h.registry.vehicles.get(&id).is_none());
        assert!(!h
            .registry
            .flow_state
            .has_state(&id, FlowEntity::BaseAutos));
        assert!(h.messenger.last_text().starts_with("✅ Vehículo registrado"));
    }

    #[tokio::test]
    async fn test_cancel_clears_every_map() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(8, 8);
        manual_vehicle_confirmed(&h, &id).await;
        for step in AwaitingFlow::ALL {
            h.registry.awaiting(step).set(&id, Pending::Fresh);
        }
        h.registry
            .assignments
            .set(&id, AssignmentRecord::legacy(1, "NISSAN VERSA".to_string()));
        h.registry.flow_state.save_state(
            &id,
            FlowContext::OpenPolicy {
                number: "P-1".to_string(),
            },
        );
        h.registry
            .flow_state
            .save_state(&id, FlowContext::BaseAutos(BaseAutosKind::Assignment));

        h.router.cancel_all(&id).await;

        for map in h.registry.tracked_maps() {
            assert!(!map.has(&id), "{} still holds state", map.name());
        }
        assert!(!h.registry.photo_batches.is_pending(&id.user_key()));
        assert_eq!(h.messenger.last_text(), "❌ Operación cancelada.");
    }

    #[tokio::test]
    async fn test_stale_button_gets_a_toast() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(9, 9);

        assert!(!h.router.route_callback(&id, "cb-1", "legacy_button_42").await);

        let answers = h.messenger.answers.lock().unwrap().clone();
        assert_eq!(
            answers,
            vec![(
                "cb-1".to_string(),
                Some("Este botón ya no es válido.".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_main_menu_label_drops_state() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(10, 10);
        h.router
            .start_flow(FlowName::AddPayment, &id, FlowArgs::default())
            .await;
        assert!(h.router.has_active_flow(FlowName::AddPayment, &id));

        assert!(h.router.route_text(&id, "🏠 Menú principal").await);

        assert!(!h.router.has_active_flow(FlowName::AddPayment, &id));
        assert!(h.messenger.last_text().starts_with("📋 Menú principal"));
    }

    #[tokio::test]
    async fn test_vehicle_register_is_visible_to_assignment() {
        let h = Harness::new(ScriptedVision::default()).await;
        let draft = VehicleDraft {
            serie: SERIE.to_string(),
            brand: "NISSAN".to_string(),
            model: "VERSA".to_string(),
            year: 2020,
            color: "GRIS".to_string(),
            plates: "ABC1234".to_string(),
        };
        let vehicle = h.repo.register_vehicle(draft, 11, Vec::new()).await.unwrap();
        let id = user(11, 11);

        let outcome = h
            .router
            .start_flow(
                FlowName::PolicyAssignment,
                &id,
                FlowArgs {
                    vehicle_id: Some(vehicle.id),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(outcome, StartOutcome::Started);
        assert!(h.registry.assignments.get(&id).is_some());
        assert!(h
            .registry
            .flow_state
            .has_state(&id, FlowEntity::BaseAutos));
    }

    async fn registered_vehicle(h: &Harness) -> i32 {
        let draft = VehicleDraft {
            serie: SERIE.to_string(),
            brand: "NISSAN".to_string(),
            model: "VERSA".to_string(),
            year: 2020,
            color: "GRIS".to_string(),
            plates: "ABC1234".to_string(),
        };
        h.repo.register_vehicle(draft, 1, Vec::new()).await.unwrap().id
    }

    async fn saved_policy(h: &Harness, number: &str) {
        h.repo
            .save_policy(NewPolicy {
                number: number.to_string(),
                holder: "Ana López".to_string(),
                insurer: "GNP".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_long_registration_outlives_umbrella_marker() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(12, 12);
        let ttl = Duration::from_secs(30 * 60);
        h.router
            .start_flow(FlowName::VehicleRegistration, &id, FlowArgs::default())
            .await;

        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(25 * 60)).await;
        assert!(h.router.route_text(&id, SERIE).await);
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        sweep_expired(&h.registry, ttl);
        tokio::time::resume();

        assert!(!h.registry.flow_state.has_state(&id, FlowEntity::BaseAutos));
        assert!(h.router.route_text(&id, "NISSAN").await);
        assert!(h.registry.flow_state.has_state(&id, FlowEntity::BaseAutos));
        let record = h.registry.vehicles.get(&id).unwrap();
        assert_eq!(record.fields.marca.as_deref(), Some("NISSAN"));
        assert_eq!(record.current, Some(VehicleField::Submarca));

        assert!(h.router.cancel_flow(FlowName::VehicleRegistration, &id).await);
        let save = h
            .router
            .start_flow(FlowName::SavePolicy, &id, FlowArgs::default())
            .await;
        assert_eq!(save, StartOutcome::Started);
    }

    #[tokio::test]
    async fn test_unreadable_card_can_be_retried() {
        let vision = ScriptedVision::reading(&[
            ("serie", SERIE),
            ("marca", "NISSAN"),
            ("submarca", "VERSA"),
            ("anio", "2020"),
            ("color", "GRIS"),
            ("placas", "ABC1234"),
        ])
        .failing_first(1);
        let h = Harness::new(vision).await;
        let id = user(13, 13);
        h.router
            .start_flow(FlowName::VehicleRegistration, &id, FlowArgs::ocr())
            .await;

        assert!(h.router.route_photo(&id, &photo(1)).await);
        assert_eq!(h.vehicle_state(&id), Some(VehicleState::AwaitingCard));
        let edits = h.messenger.edits.lock().unwrap().clone();
        assert!(edits.last().unwrap().1.text.contains("No pude leer la tarjeta"));

        assert!(h.press(&id, CallbackAction::Vehicle(VehicleAction::RetryCard)).await);
        assert_eq!(h.vehicle_state(&id), Some(VehicleState::RetryingCard));

        assert!(h.router.route_photo(&id, &photo(2)).await);
        let record = h.registry.vehicles.get(&id).unwrap();
        assert_eq!(record.state, VehicleState::ConfirmingData);
        assert_eq!(record.fields.serie.as_deref(), Some(SERIE));
    }

    #[tokio::test]
    async fn test_duplicate_serie_at_finalize_keeps_registration() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(14, 14);
        registered_vehicle(&h).await;
        manual_vehicle_confirmed(&h, &id).await;
        assert!(h.router.route_photo(&id, &photo(1)).await);

        assert!(h.press(&id, CallbackAction::Vehicle(VehicleAction::Finalize)).await);

        let record = h.registry.vehicles.get(&id).unwrap();
        assert_eq!(record.state, VehicleState::AwaitingPhotos);
        assert_eq!(record.photos.len(), 1);
        assert!(h
            .messenger
            .last_text()
            .contains("Ya existe un vehículo registrado con serie"));
        assert!(h.router.has_active_flow(FlowName::VehicleRegistration, &id));
    }

    #[tokio::test]
    async fn test_failed_registration_write_keeps_photos_for_retry() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(15, 15);
        manual_vehicle_confirmed(&h, &id).await;
        assert!(h.router.route_photo(&id, &photo(1)).await);
        assert!(h.router.route_photo(&id, &photo(2)).await);

        h.fail_next_vehicle_writes(1);
        assert!(h.press(&id, CallbackAction::Vehicle(VehicleAction::Finalize)).await);

        assert!(h.messenger.last_text().contains("No pude guardar el vehículo"));
        assert_eq!(h.registry.vehicles.get(&id).unwrap().photos.len(), 2);
        assert!(h.repo.vehicles_without_policy(10).await.unwrap().is_empty());

        assert!(h.press(&id, CallbackAction::Vehicle(VehicleAction::Finalize)).await);

        let vehicles = h.repo.vehicles_without_policy(10).await.unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].photos.len(), 2);
        assert!(h.registry.vehicles.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_assignment_runs_until_issue_date_is_confirmed() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(16, 16);
        let vehicle_id = registered_vehicle(&h).await;
        h.router
            .start_flow(
                FlowName::PolicyAssignment,
                &id,
                FlowArgs {
                    vehicle_id: Some(vehicle_id),
                    ..Default::default()
                },
            )
            .await;

        for value in ["pol-9", "Qualitas", "Luis Gómez", "05/01/2026"] {
            assert!(h.router.route_text(&id, value).await);
            assert!(h.router.has_active_flow(FlowName::PolicyAssignment, &id));
        }
        assert_eq!(
            h.registry.assignments.get(&id).map(|record| record.step),
            Some(AssignmentStep::ConfirmingIssueDate)
        );

        // A failed write leaves nothing behind and the same button works again
        h.fail_next_vehicle_writes(1);
        assert!(h.press(&id, CallbackAction::IssueDate(true)).await);
        assert!(h.router.has_active_flow(FlowName::PolicyAssignment, &id));
        assert!(h.messenger.last_text().contains("No pude guardar la póliza"));
        assert!(h.repo.find_policy_by_number("POL-9").await.unwrap().is_none());

        assert!(h.press(&id, CallbackAction::IssueDate(true)).await);

        assert!(!h.router.has_active_flow(FlowName::PolicyAssignment, &id));
        assert!(!h.registry.flow_state.has_state(&id, FlowEntity::BaseAutos));
        let policy = h.repo.find_policy_by_number("POL-9").await.unwrap().unwrap();
        assert_eq!(policy.insurer, "Qualitas");
        let vehicle = h.repo.find_vehicle(vehicle_id).await.unwrap().unwrap();
        assert_eq!(vehicle.policy_number.as_deref(), Some("POL-9"));
        assert!(h.messenger.last_text().starts_with("✅ Póliza POL-9 asignada"));
    }

    #[tokio::test]
    async fn test_locations_fill_origin_then_destination() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(17, 17);
        saved_policy(&h, "P-20").await;

        assert!(!h.router.route_location(&id, Coordinates { lat: 19.4, lon: -99.1 }).await);

        h.router
            .start_flow(FlowName::OccupyPolicy, &id, FlowArgs::policy("P-20"))
            .await;
        assert!(h.router.route_text(&id, "55 1234 5678").await);
        assert!(h.registry.awaiting(AwaitingFlow::Origin).has(&id));

        let origin = Coordinates { lat: 19.4326, lon: -99.1332 };
        assert!(h.router.route_location(&id, origin).await);
        assert_eq!(
            h.registry.awaiting(AwaitingFlow::Destination).get(&id),
            Some(Pending::Route {
                policy: "P-20".to_string(),
                origin,
            })
        );

        assert!(h.router.route_location(&id, Coordinates { lat: 19.5, lon: -99.2 }).await);

        assert!(!h.router.has_active_flow(FlowName::OccupyPolicy, &id));
        assert!(h.messenger.last_text().starts_with("🚕 Ruta para la póliza P-20"));
        let phone = h.repo.find_policy_by_number("P-20").await.unwrap().unwrap().phone;
        assert_eq!(phone.as_deref(), Some("5512345678"));
    }

    #[tokio::test]
    async fn test_files_go_to_excel_then_upload_then_base_autos() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(18, 18);
        saved_policy(&h, "P-30").await;
        manual_vehicle_confirmed(&h, &id).await;
        h.registry
            .awaiting(AwaitingFlow::ExcelUpload)
            .set(&id, Pending::Fresh);
        h.registry
            .awaiting(AwaitingFlow::UploadFiles)
            .set(&id, Pending::Policy("P-30".to_string()));

        let sheet = document("sheet-1", Some("cartera.xlsx"), "application/octet-stream");
        assert!(h.router.route_document(&id, &sheet).await);
        assert!(h.messenger.last_text().starts_with("✅ Archivo cartera.xlsx recibido"));
        assert!(!h.registry.awaiting(AwaitingFlow::ExcelUpload).has(&id));

        let pdf = document("pdf-1", Some("caratula.pdf"), "application/pdf");
        assert!(h.router.route_document(&id, &pdf).await);
        assert!(h.messenger.last_text().contains("guardado en la póliza P-30"));
        assert!(h.registry.awaiting(AwaitingFlow::UploadFiles).has(&id));

        h.registry.awaiting(AwaitingFlow::UploadFiles).delete(&id);
        assert!(h.router.route_photo(&id, &photo(1)).await);
        assert_eq!(h.registry.vehicles.get(&id).unwrap().photos.len(), 1);
    }

    #[tokio::test]
    async fn test_same_named_uploads_keep_separate_objects() {
        let h = Harness::new(ScriptedVision::default()).await;
        let id = user(19, 19);
        saved_policy(&h, "P-40").await;
        h.registry
            .awaiting(AwaitingFlow::UploadFiles)
            .set(&id, Pending::Policy("P-40".to_string()));

        for file_id in ["BQACAgEAAxkBAAIa", "BQACAgEAAxkBAAIb"] {
            let scan = document(file_id, None, "application/pdf");
            assert!(h.router.route_document(&id, &scan).await);
        }

        assert_eq!(h.storage.objects.lock().unwrap().len(), 2);
        let policy = h.repo.find_policy_by_number("P-40").await.unwrap().unwrap();
        let keys: Vec<&str> = policy.files.iter().map(|f| f.storage_key.as_str()).collect();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
    }
}
