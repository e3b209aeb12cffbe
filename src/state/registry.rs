//! Every piece of conversational state the bot keeps, in one owned place.

use super::batcher::PhotoBatcher;
use super::flow_state::{FlowEntity, FlowStateManager};
use super::identity::{ConversationId, KeyScope};
use super::map::{StateMap, TrackedState};
use crate::domain::policy::Coordinates;
use crate::flows::assignment::AssignmentRecord;
use crate::flows::vehicle::VehicleRecord;
use crate::flows::FlowName;
use std::fmt;
use std::time::Duration;

/// The step a flat flow is waiting on.
///
/// Declaration order is the text routing priority for the first
/// fourteen steps; the last two only ever receive files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AwaitingFlow {
    SaveData,
    PolicySearch,
    UploadNumber,
    DeleteNumber,
    PaymentNumber,
    PaymentData,
    ContactTime,
    ServiceNumber,
    ServiceData,
    PhoneNumber,
    Origin,
    Destination,
    OriginDestination,
    DeleteReason,
    ExcelUpload,
    UploadFiles,
}

impl AwaitingFlow {
    pub const COUNT: usize = 16;

    pub const ALL: [AwaitingFlow; Self::COUNT] = [
        AwaitingFlow::SaveData,
        AwaitingFlow::PolicySearch,
        AwaitingFlow::UploadNumber,
        AwaitingFlow::DeleteNumber,
        AwaitingFlow::PaymentNumber,
        AwaitingFlow::PaymentData,
        AwaitingFlow::ContactTime,
        AwaitingFlow::ServiceNumber,
        AwaitingFlow::ServiceData,
        AwaitingFlow::PhoneNumber,
        AwaitingFlow::Origin,
        AwaitingFlow::Destination,
        AwaitingFlow::OriginDestination,
        AwaitingFlow::DeleteReason,
        AwaitingFlow::ExcelUpload,
        AwaitingFlow::UploadFiles,
    ];

    /// Order in which text messages check the awaiting maps.
    pub const TEXT_PRIORITY: [AwaitingFlow; 14] = [
        AwaitingFlow::SaveData,
        AwaitingFlow::PolicySearch,
        AwaitingFlow::UploadNumber,
        AwaitingFlow::DeleteNumber,
        AwaitingFlow::PaymentNumber,
        AwaitingFlow::PaymentData,
        AwaitingFlow::ContactTime,
        AwaitingFlow::ServiceNumber,
        AwaitingFlow::ServiceData,
        AwaitingFlow::PhoneNumber,
        AwaitingFlow::Origin,
        AwaitingFlow::Destination,
        AwaitingFlow::OriginDestination,
        AwaitingFlow::DeleteReason,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AwaitingFlow::SaveData => "save-data",
            AwaitingFlow::PolicySearch => "policy-search",
            AwaitingFlow::UploadNumber => "upload-number",
            AwaitingFlow::DeleteNumber => "delete-number",
            AwaitingFlow::PaymentNumber => "payment-number",
            AwaitingFlow::PaymentData => "payment-data",
            AwaitingFlow::ContactTime => "contact-time",
            AwaitingFlow::ServiceNumber => "service-number",
            AwaitingFlow::ServiceData => "service-data",
            AwaitingFlow::PhoneNumber => "phone-number",
            AwaitingFlow::Origin => "origin",
            AwaitingFlow::Destination => "destination",
            AwaitingFlow::OriginDestination => "origin-destination",
            AwaitingFlow::DeleteReason => "delete-reason",
            AwaitingFlow::ExcelUpload => "excel-upload",
            AwaitingFlow::UploadFiles => "upload-files",
        }
    }

    /// The flow that owns this step.
    pub fn owner(&self) -> FlowName {
        match self {
            AwaitingFlow::SaveData => FlowName::SavePolicy,
            AwaitingFlow::PolicySearch => FlowName::GetPolicy,
            AwaitingFlow::UploadNumber | AwaitingFlow::UploadFiles => FlowName::UploadFiles,
            AwaitingFlow::DeleteNumber | AwaitingFlow::DeleteReason => FlowName::DeletePolicy,
            AwaitingFlow::PaymentNumber | AwaitingFlow::PaymentData => FlowName::AddPayment,
            AwaitingFlow::ContactTime | AwaitingFlow::ServiceNumber | AwaitingFlow::ServiceData => {
                FlowName::AddService
            }
            AwaitingFlow::PhoneNumber
            | AwaitingFlow::Origin
            | AwaitingFlow::Destination
            | AwaitingFlow::OriginDestination => FlowName::OccupyPolicy,
            AwaitingFlow::ExcelUpload => FlowName::ExcelUpload,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AwaitingFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an awaiting step already knows.
#[derive(Clone, Debug, PartialEq)]
pub enum Pending {
    /// Nothing collected yet
    Fresh,
    /// Bound to one policy
    Policy(String),
    /// Bound to several policies (bulk delete)
    Policies(Vec<String>),
    /// Service just recorded, waiting for its contact time
    Contact { policy: String, expediente: String },
    /// Origin known, waiting for the destination
    Route { policy: String, origin: Coordinates },
}

impl Pending {
    pub fn policy(&self) -> Option<&str> {
        match self {
            Pending::Policy(number)
            | Pending::Contact { policy: number, .. }
            | Pending::Route { policy: number, .. } => Some(number),
            Pending::Fresh | Pending::Policies(_) => None,
        }
    }
}

/// Owns every state map. Constructed once and shared by the router,
/// the flows, the cleanup service and the expiry sweep.
#[derive(Debug)]
pub struct FlowStateRegistry {
    awaiting: [StateMap<Pending>; AwaitingFlow::COUNT],
    pub vehicles: StateMap<VehicleRecord>,
    pub assignments: StateMap<AssignmentRecord>,
    pub flow_state: FlowStateManager,
    pub photo_batches: PhotoBatcher,
}

impl FlowStateRegistry {
    pub fn new(photo_batch_window: Duration) -> Self {
        Self {
            awaiting: std::array::from_fn(|i| {
                StateMap::new(AwaitingFlow::ALL[i].as_str(), KeyScope::User)
            }),
            vehicles: StateMap::new("vehicle-registration", KeyScope::User),
            assignments: StateMap::new("policy-assignment", KeyScope::User),
            flow_state: FlowStateManager::new(),
            photo_batches: PhotoBatcher::new(photo_batch_window),
        }
    }

    pub fn awaiting(&self, step: AwaitingFlow) -> &StateMap<Pending> {
        &self.awaiting[step.index()]
    }

    /// Awaiting steps currently set for `id`, in declaration order.
    pub fn active_steps(&self, id: &ConversationId) -> Vec<AwaitingFlow> {
        AwaitingFlow::ALL
            .into_iter()
            .filter(|step| self.awaiting(*step).has(id))
            .collect()
    }

    pub fn has_base_autos_record(&self, id: &ConversationId) -> bool {
        self.vehicles.has(id) || self.assignments.has(id)
    }

    /// Drop the Base de Autos umbrella marker once neither sub-flow has a record.
    pub fn release_base_autos_if_idle(&self, id: &ConversationId) -> bool {
        if self.has_base_autos_record(id) {
            return false;
        }
        self.flow_state.clear_state(id, FlowEntity::BaseAutos)
    }

    /// Every map, for sweeps that must not miss one.
    pub fn tracked_maps(&self) -> Vec<&dyn TrackedState> {
        let mut maps: Vec<&dyn TrackedState> = self
            .awaiting
            .iter()
            .map(|map| map as &dyn TrackedState)
            .collect();
        maps.push(&self.vehicles);
        maps.push(&self.assignments);
        maps.push(self.flow_state.tracked());
        maps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_matches_declaration_order() {
        for (i, step) in AwaitingFlow::ALL.iter().enumerate() {
            assert_eq!(step.index(), i, "{} out of place", step);
        }
    }

    #[test]
    fn test_text_priority_is_declaration_prefix() {
        assert_eq!(
            AwaitingFlow::TEXT_PRIORITY[..],
            AwaitingFlow::ALL[..AwaitingFlow::TEXT_PRIORITY.len()]
        );
    }

    #[test]
    fn test_every_map_is_tracked() {
        let registry = FlowStateRegistry::new(Duration::from_secs(2));
        assert_eq!(registry.tracked_maps().len(), AwaitingFlow::COUNT + 3);
    }

    #[test]
    fn test_map_names_follow_steps() {
        let registry = FlowStateRegistry::new(Duration::from_secs(2));
        assert_eq!(registry.awaiting(AwaitingFlow::ContactTime).name(), "contact-time");
    }

    #[test]
    fn test_active_steps() {
        let registry = FlowStateRegistry::new(Duration::from_secs(2));
        let id = ConversationId::new(1, None, Some(1));

        registry
            .awaiting(AwaitingFlow::DeleteReason)
            .set(&id, Pending::Policies(vec!["A".into()]));
        registry
            .awaiting(AwaitingFlow::SaveData)
            .set(&id, Pending::Fresh);

        assert_eq!(
            registry.active_steps(&id),
            vec![AwaitingFlow::SaveData, AwaitingFlow::DeleteReason]
        );
    }
}
