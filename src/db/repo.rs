use async_trait::async_trait;
use chrono::{Local, NaiveTime};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    TransactionTrait,
};

use super::entities::{policies, vehicles};
use crate::db::types::{Attachments, Payment, Payments, PolicyStatus, Service, UploadedFile};
use crate::domain::policy::NewPolicy;
use crate::domain::vehicle::VehicleDraft;
use crate::error::StoreError;
use crate::services::{Policy, PolicyStore, Vehicle, VehicleStore};

pub struct Repo {
    db: DatabaseConnection,
}

impl Repo {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn ping(&self) -> Result<(), DbErr> {
        self.db.ping().await
    }

    async fn active_policy(&self, number: &str) -> Result<Policy, StoreError> {
        self.find_policy_by_number(number)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("policy {}", number)))
    }
}

/// Map a unique-index violation to the given domain error.
fn unique_violation(err: DbErr, duplicate: impl FnOnce() -> StoreError) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => duplicate(),
        _ => StoreError::Database(err),
    }
}

/// Validate and insert a new policy on `conn`, which may be a transaction.
async fn insert_policy<C: ConnectionTrait>(conn: &C, data: NewPolicy) -> Result<Policy, StoreError> {
    for (value, field) in [
        (&data.number, "number"),
        (&data.holder, "holder"),
        (&data.insurer, "insurer"),
    ] {
        if value.trim().is_empty() {
            return Err(StoreError::Validation(format!("{} is required", field)));
        }
    }

    // Deleted policies keep their number reserved
    let existing = policies::Entity::find()
        .filter(policies::Column::Number.eq(data.number.as_str()))
        .one(conn)
        .await?;
    if existing.is_some() {
        return Err(StoreError::DuplicatePolicy(data.number));
    }

    let now = Local::now().naive_local();
    let number = data.number.clone();
    let policy = policies::ActiveModel {
        number: Set(data.number),
        holder: Set(data.holder),
        phone: Set(data.phone),
        insurer: Set(data.insurer),
        agent: Set(data.agent),
        issue_date: Set(data.issue_date),
        brand: Set(data.brand),
        model: Set(data.model),
        year: Set(data.year),
        color: Set(data.color),
        serie: Set(data.serie),
        plates: Set(data.plates),
        status: Set(PolicyStatus::Active),
        deletion_reason: Set(None),
        payments: Set(Payments::default()),
        services: Set(Default::default()),
        files: Set(Attachments::from(data.files)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    policy
        .insert(conn)
        .await
        .map_err(|e| unique_violation(e, || StoreError::DuplicatePolicy(number)))
}

// ==================== Policies ====================

#[async_trait]
impl PolicyStore for Repo {
    async fn find_policy_by_number(&self, number: &str) -> Result<Option<Policy>, StoreError> {
        Ok(policies::Entity::find()
            .filter(policies::Column::Number.eq(number))
            .filter(policies::Column::Status.eq(PolicyStatus::Active))
            .one(&self.db)
            .await?)
    }

    async fn save_policy(&self, data: NewPolicy) -> Result<Policy, StoreError> {
        insert_policy(&self.db, data).await
    }

    async fn mark_policy_deleted(
        &self,
        number: &str,
        reason: &str,
    ) -> Result<Option<Policy>, StoreError> {
        let Some(policy) = self.find_policy_by_number(number).await? else {
            return Ok(None);
        };

        let mut active = policy.into_active_model();
        active.status = Set(PolicyStatus::Deleted);
        active.deletion_reason = Set(Some(reason.to_string()));
        active.updated_at = Set(Local::now().naive_local());

        Ok(Some(active.update(&self.db).await?))
    }

    async fn add_payment(&self, number: &str, payment: Payment) -> Result<Policy, StoreError> {
        let policy = self.active_policy(number).await?;
        let mut payments = policy.payments.0.clone();
        payments.push(payment);

        let mut active = policy.into_active_model();
        active.payments = Set(payments.into());
        active.updated_at = Set(Local::now().naive_local());

        Ok(active.update(&self.db).await?)
    }

    async fn add_service(&self, number: &str, service: Service) -> Result<Policy, StoreError> {
        let policy = self.active_policy(number).await?;
        let mut services = policy.services.0.clone();
        services.push(service);

        let mut active = policy.into_active_model();
        active.services = Set(services.into());
        active.updated_at = Set(Local::now().naive_local());

        Ok(active.update(&self.db).await?)
    }

    async fn set_service_contact_time(
        &self,
        number: &str,
        expediente: &str,
        time: NaiveTime,
    ) -> Result<(), StoreError> {
        let policy = self.active_policy(number).await?;
        let mut services = policy.services.0.clone();

        let service = services
            .iter_mut()
            .rev()
            .find(|s| s.expediente == expediente)
            .ok_or_else(|| StoreError::NotFound(format!("service {}", expediente)))?;
        service.contact_time = Some(time);

        let mut active = policy.into_active_model();
        active.services = Set(services.into());
        active.updated_at = Set(Local::now().naive_local());
        active.update(&self.db).await?;

        Ok(())
    }

    async fn update_phone(&self, number: &str, phone: &str) -> Result<(), StoreError> {
        let policy = self.active_policy(number).await?;

        let mut active = policy.into_active_model();
        active.phone = Set(Some(phone.to_string()));
        active.updated_at = Set(Local::now().naive_local());
        active.update(&self.db).await?;

        Ok(())
    }

    async fn attach_file(&self, number: &str, file: UploadedFile) -> Result<(), StoreError> {
        let policy = self.active_policy(number).await?;
        let mut files = policy.files.0.clone();
        files.push(file);

        let mut active = policy.into_active_model();
        active.files = Set(files.into());
        active.updated_at = Set(Local::now().naive_local());
        active.update(&self.db).await?;

        Ok(())
    }
}

// ==================== Vehicles ====================

#[async_trait]
impl VehicleStore for Repo {
    async fn register_vehicle(
        &self,
        draft: VehicleDraft,
        owner_user_id: i64,
        photos: Vec<UploadedFile>,
    ) -> Result<Vehicle, StoreError> {
        let existing = vehicles::Entity::find()
            .filter(
                Condition::any()
                    .add(vehicles::Column::Serie.eq(draft.serie.as_str()))
                    .add(vehicles::Column::Plates.eq(draft.plates.as_str())),
            )
            .one(&self.db)
            .await?;
        if let Some(vehicle) = existing {
            let what = if vehicle.serie == draft.serie {
                format!("serie {}", draft.serie)
            } else {
                format!("placas {}", draft.plates)
            };
            return Err(StoreError::DuplicateVehicle(what));
        }

        let now = Local::now().naive_local();
        let serie = draft.serie.clone();
        let vehicle = vehicles::ActiveModel {
            serie: Set(draft.serie),
            brand: Set(draft.brand),
            model: Set(draft.model),
            year: Set(draft.year),
            color: Set(draft.color),
            plates: Set(draft.plates),
            owner_user_id: Set(owner_user_id),
            photos: Set(Attachments::from(photos)),
            policy_number: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        vehicle
            .insert(&self.db)
            .await
            .map_err(|e| unique_violation(e, || StoreError::DuplicateVehicle(format!("serie {}", serie))))
    }

    async fn find_vehicle(&self, vehicle_id: i32) -> Result<Option<Vehicle>, StoreError> {
        Ok(vehicles::Entity::find_by_id(vehicle_id).one(&self.db).await?)
    }

    async fn vehicles_without_policy(&self, limit: u64) -> Result<Vec<Vehicle>, StoreError> {
        Ok(vehicles::Entity::find()
            .filter(vehicles::Column::PolicyNumber.is_null())
            .order_by_asc(vehicles::Column::CreatedAt)
            .order_by_asc(vehicles::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    async fn assign_new_policy(&self, vehicle_id: i32, data: NewPolicy) -> Result<Policy, StoreError> {
        let txn = self.db.begin().await?;

        // Insert first so the number is claimed; any failure below rolls it back
        let policy = insert_policy(&txn, data).await?;

        let vehicle = vehicles::Entity::find_by_id(vehicle_id)
            .one(&txn)
            .await?
            .filter(|vehicle| vehicle.policy_number.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("vehicle {} without policy", vehicle_id)))?;

        let mut active = vehicle.into_active_model();
        active.policy_number = Set(Some(policy.number.clone()));
        active.updated_at = Set(Local::now().naive_local());
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(policy)
    }
}
