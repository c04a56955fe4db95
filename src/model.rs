//! Core data model for docket.
//!
//! Descriptors as read from disk, the actions they name, and the records
//! left behind once they have been archived.

mod action;
mod descriptor;
mod record;

pub use action::{Action, UnknownAction};
pub use descriptor::{Channel, Options, Provenance, TargetRef, UpdateDescriptor};
pub use record::{ArchiveRecord, Outcome, RecordFile};
