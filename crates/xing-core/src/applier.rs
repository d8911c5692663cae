//! Writing canonical records back into the document

use crate::error::{Error, Result, Stage, StageExt};
use crate::record::{CrossingRecord, GroupState, InstanceRef};
use crate::store::{in_transaction, DocumentStore, Placement};
use crate::table_sync::{RowIndex, SyncReport, TableSync};
use crate::validate::validate;

/// Counts from one apply batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub records: usize,
    pub instances_written: usize,
    pub sync: SyncReport,
}

/// Write every record's fields onto all of its instances and synchronize
/// every table, as one transaction.
///
/// Conflicted or invalid record sets are refused before the transaction
/// opens. Any store failure rolls the whole batch back.
pub fn apply_changes<S: DocumentStore + ?Sized>(
    store: &mut S,
    records: &[CrossingRecord],
    tables: &TableSync,
) -> Result<ApplyReport> {
    check_applicable(records)?;

    let report = in_transaction(store, Stage::Apply, |store| {
        write_back(store, records, tables)
    })?;

    tracing::info!(
        "applied {} record(s): {} instance write(s), {} cell write(s)",
        report.records,
        report.instances_written,
        report.sync.cells_written
    );
    Ok(report)
}

/// Fail with `Error::Unresolved` while any record is conflicted, then
/// validate the set
pub(crate) fn check_applicable(records: &[CrossingRecord]) -> Result<()> {
    let count = records
        .iter()
        .filter(|r| r.state == GroupState::Conflicted)
        .count();
    if count > 0 {
        return Err(Error::Unresolved { count });
    }
    validate(records)
}

/// Instance writes and table sync for one batch. The caller owns the
/// transaction.
pub(crate) fn write_back<S: DocumentStore + ?Sized>(
    store: &mut S,
    records: &[CrossingRecord],
    tables: &TableSync,
) -> Result<ApplyReport> {
    // Captured before any write so renumbered rows can still be found
    let index = RowIndex::build(&*store, records);

    let mut instances_written = 0;
    for record in records {
        for &instance in &record.all_instances {
            store.write_fields(instance, &record.fields).at(Stage::Apply)?;
            instances_written += 1;
        }
    }

    let sync = tables.sync_tables(store, &index)?;

    Ok(ApplyReport {
        records: records.len(),
        instances_written,
        sync,
    })
}

/// Remove the entities behind `instances`.
///
/// The caller drops the owning record and renumbers afterwards.
pub fn delete_instances<S: DocumentStore + ?Sized>(
    store: &mut S,
    instances: &[InstanceRef],
) -> Result<usize> {
    in_transaction(store, Stage::Delete, |store| remove_entities(store, instances))
}

pub(crate) fn remove_entities<S: DocumentStore + ?Sized>(
    store: &mut S,
    instances: &[InstanceRef],
) -> Result<usize> {
    for &instance in instances {
        store.delete_entity(instance).at(Stage::Delete)?;
    }
    Ok(instances.len())
}

/// Place one new instance seeded from `record`.
///
/// The caller attaches the returned handle to the record.
pub fn insert_crossing<S: DocumentStore + ?Sized>(
    store: &mut S,
    record: &CrossingRecord,
    placement: &Placement,
) -> Result<InstanceRef> {
    in_transaction(store, Stage::Insert, |store| {
        create_entity(store, record, placement)
    })
}

pub(crate) fn create_entity<S: DocumentStore + ?Sized>(
    store: &mut S,
    record: &CrossingRecord,
    placement: &Placement,
) -> Result<InstanceRef> {
    store
        .create_entity(placement, &record.fields)
        .at(Stage::Insert)
}
