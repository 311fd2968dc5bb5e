pub mod domain;
pub mod error;
pub mod identity;
pub mod patients;
pub mod ports;
pub mod scan;
pub mod store;

pub use domain::{Gender, MedicalRecord, Patient, PatientDraft, PatientId, Role, Session, User};
pub use error::{CoreError, CoreResult};
pub use identity::{IdentityConfig, IdentityService, SessionSlots};
pub use patients::PatientRepository;
pub use ports::{
    AttachmentEncoder, EncodedAttachment, KeyValueStore, PortError, PortResult, ScanEvent,
    ScanEventStream, ScanSource, SurfaceHandle,
};
pub use scan::{
    rejection_message, ScanConfig, ScanContext, ScanOutcome, ScanResolution, ScanResolver,
    ScanSession,
};
pub use store::{Collection, MemoryKeyValueStore, RecordStore, Slot};
