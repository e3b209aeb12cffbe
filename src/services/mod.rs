//! Collaborators the flows talk to, behind narrow traits.

pub mod circuit_breaker;
pub mod messenger;
pub mod storage;
pub mod store;
pub mod vision;

pub use messenger::{Button, FileKind, IncomingFile, MessageRef, Messenger, Reply};
pub use storage::{object_key, LocalObjectStorage, ObjectStorage, StoredObject};
pub use store::{Policy, PolicyStore, Vehicle, VehicleStore};
pub use vision::{DocumentKind, ExtractedFields, OpenAiVision, VisionService};
