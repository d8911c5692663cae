//! xing-core: Core library for reconciling duplicated crossing records
//!
//! This library provides functionality to:
//! - Scan a document for every placed crossing marker
//! - Group markers into crossings by code and detect field disagreements
//! - Resolve disagreements through a pluggable policy
//! - Renumber crossings on insert, delete and explicit renumbering
//! - Write canonical values back to every marker and summary table
//! - Merge imported rows and exchange records as CSV

pub mod applier;
pub mod config;
pub mod csv_io;
pub mod error;
pub mod history;
pub mod identity;
pub mod merge;
pub mod record;
pub mod renumber;
pub mod resolver;
pub mod scanner;
pub mod session;
pub mod store;
pub mod table_sync;
pub mod validate;

pub use applier::{apply_changes, delete_instances, insert_crossing, ApplyReport};
pub use config::Config;
pub use error::{Error, Result, Stage, ValidationErrors, ValidationIssue};
pub use history::{create_entry, ApplyEntry, ApplyHistory};
pub use identity::{crossing_key, IdentityKey};
pub use merge::{merge_imported, ImportRow, MergeReport};
pub use record::{CrossingRecord, Field, FieldSet, GroupState, InstanceContext, InstanceRef};
pub use renumber::RenumberEngine;
pub use resolver::{
    Conflict, ConflictGroup, DuplicateResolver, FirstDiscovered, Resolution, ResolutionPolicy,
    ResolveSummary,
};
pub use scanner::{scan, ScanResult};
pub use session::{ChangeEvent, ReconcileReport, ScanStats, Session};
pub use store::{
    DocumentStore, FileStore, GridVisibility, MemoryStore, Placement, RegionId, StoreError,
    TableRef,
};
pub use table_sync::{SyncReport, TableKind, TableSync};
pub use validate::validate;
