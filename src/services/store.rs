//! Persistence contracts consumed by the flows.

use crate::db::entities::{policies, vehicles};
use crate::db::types::{Payment, Service, UploadedFile};
use crate::domain::policy::NewPolicy;
use crate::domain::vehicle::VehicleDraft;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::NaiveTime;

pub type Policy = policies::Model;
pub type Vehicle = vehicles::Model;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Active policy with this number. Deleted policies are not returned.
    async fn find_policy_by_number(&self, number: &str) -> Result<Option<Policy>, StoreError>;

    /// Fails with `DuplicatePolicy` when the number exists (even if deleted)
    /// and with `Validation` when a required field is empty.
    async fn save_policy(&self, data: NewPolicy) -> Result<Policy, StoreError>;

    /// Soft delete. `None` when there is no active policy with this number.
    async fn mark_policy_deleted(
        &self,
        number: &str,
        reason: &str,
    ) -> Result<Option<Policy>, StoreError>;

    async fn add_payment(&self, number: &str, payment: Payment) -> Result<Policy, StoreError>;

    async fn add_service(&self, number: &str, service: Service) -> Result<Policy, StoreError>;

    async fn set_service_contact_time(
        &self,
        number: &str,
        expediente: &str,
        time: NaiveTime,
    ) -> Result<(), StoreError>;

    async fn update_phone(&self, number: &str, phone: &str) -> Result<(), StoreError>;

    async fn attach_file(&self, number: &str, file: UploadedFile) -> Result<(), StoreError>;
}

#[async_trait]
pub trait VehicleStore: Send + Sync {
    /// Insert the vehicle together with its photos.
    /// Fails with `DuplicateVehicle` when the serie or the plates are taken.
    async fn register_vehicle(
        &self,
        draft: VehicleDraft,
        owner_user_id: i64,
        photos: Vec<UploadedFile>,
    ) -> Result<Vehicle, StoreError>;

    async fn find_vehicle(&self, vehicle_id: i32) -> Result<Option<Vehicle>, StoreError>;

    /// Oldest first.
    async fn vehicles_without_policy(&self, limit: u64) -> Result<Vec<Vehicle>, StoreError>;

    /// Save `data` and link it to the vehicle in one transaction. Nothing is
    /// written when either step fails. `NotFound` when the vehicle is gone or
    /// already has a policy; otherwise the errors of [`PolicyStore::save_policy`].
    async fn assign_new_policy(&self, vehicle_id: i32, data: NewPolicy) -> Result<Policy, StoreError>;
}
