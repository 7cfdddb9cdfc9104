//! Security primitives for the mlld runtime.
//!
//! Policy-based, not memory-isolated: branded path types keep unvalidated
//! strings away from I/O, security descriptors carry taint labels and
//! provenance through pipelines and effects, and capability contexts scope
//! what an operation is allowed to do.

pub mod capability;
pub mod descriptor;
pub mod error;
pub mod paths;
pub mod policy;
pub mod taint;

pub use capability::{CapabilityContext, CapabilityKind, DescriptorStack, ImportType};
pub use descriptor::{SecurityDescriptor, TaintLevel};
pub use error::PathValidationError;
pub use paths::{
    MlldPath, NormalizedAbsolutePath, PathContentType, PathValidator, RawPath,
    ValidatedResourcePath, ValidationContext,
};
pub use policy::{ApprovalGate, ApproveAll, HashAllowlistGate, ImportApprovalDecision, PolicyConfig, normalize_policy_config};
pub use taint::TaintTracker;
