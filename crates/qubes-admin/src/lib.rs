// qubes-admin: Admin API surface for Qubes desktop tooling
//
// Device wire types and their string encoding, the `AdminClient` and
// `PolicyStore` traits, and in-process implementations of both.

pub mod client;
pub mod device;
pub mod domain;
pub mod error;
pub mod memory;
pub mod policy;
pub mod snapshot;

pub use client::{AdminClient, AdminEvent, Call, apply_feature_change, feature_bool};
pub use device::{
    AssignmentMode, DevClass, DeviceAssignment, DeviceInfo, DeviceInterface, Port, WILDCARD,
};
pub use domain::{Domain, DomainClass};
pub use error::{Error, Result};
pub use memory::MemoryQubes;
pub use policy::{
    DirPolicyStore, MemoryPolicyStore, PolicyStore, PrefixedPolicyStore, TOKEN_ANY, TOKEN_NEW,
};
pub use snapshot::{DomainState, Snapshot};
