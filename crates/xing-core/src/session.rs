//! Reconciliation session
//!
//! A `Session` owns the document store and the ordered record sequence for
//! the lifetime of one editing session. It is created once with [`Session::open`],
//! passed to whatever needs document access, and torn down with
//! [`Session::close`], which hands the store back.
//!
//! Every operation either completes or leaves the record sequence exactly as
//! it was. Observers learn about changes through [`Session::subscribe`].

use crate::applier::{
    apply_changes, check_applicable, create_entity, remove_entities, write_back, ApplyReport,
};
use crate::config::Config;
use crate::error::{Error, Result, Stage};
use crate::history::{create_entry, ApplyHistory};
use crate::merge::{merge_imported, ImportRow, MergeReport};
use crate::record::{CrossingRecord, Field, FieldSet, GroupState};
use crate::renumber::RenumberEngine;
use crate::resolver::{Conflict, ContextMap, DuplicateResolver, ResolutionPolicy, ResolveSummary};
use crate::scanner::{scan, ScanResult};
use crate::store::{in_transaction, DocumentStore, Placement, TableRef};
use crate::table_sync::TableSync;

/// Counts from one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub regions: usize,
    pub instances: usize,
    pub records: usize,
    pub skipped: usize,
}

impl From<&ScanResult> for ScanStats {
    fn from(result: &ScanResult) -> Self {
        Self {
            regions: result.regions_scanned,
            instances: result.instance_count(),
            records: result.records.len(),
            skipped: result.skipped,
        }
    }
}

/// Outcome of a full scan, resolve and apply pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scan: ScanStats,
    pub resolve: ResolveSummary,
    pub apply: ApplyReport,
}

/// Change notification delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Scanned(ScanStats),
    Resolved(ResolveSummary),
    Applied(ApplyReport),
    Inserted { index: usize, code: String },
    Deleted { index: usize, code: String },
    Edited { index: usize, field: Field },
    Renumbered { changed: usize },
    Merged(MergeReport),
    TableCreated(TableRef),
}

pub type Listener = Box<dyn FnMut(&ChangeEvent)>;

/// Explicit owner of the document and its crossing records
pub struct Session<S: DocumentStore> {
    store: S,
    config: Config,
    renumber: RenumberEngine,
    tables: TableSync,
    records: Vec<CrossingRecord>,
    contexts: ContextMap,
    listeners: Vec<Listener>,
    history: ApplyHistory,
}

impl<S: DocumentStore> Session<S> {
    /// Start a session over `store`. No scan happens until [`Session::scan`].
    pub fn open(store: S, config: Config) -> Self {
        tracing::debug!("opening session (prefix {:?})", config.default_prefix);
        Self {
            renumber: config.renumber_engine(),
            tables: config.table_sync(),
            store,
            config,
            records: Vec::new(),
            contexts: ContextMap::new(),
            listeners: Vec::new(),
            history: ApplyHistory::new(),
        }
    }

    /// Continue an existing apply history
    pub fn with_history(mut self, history: ApplyHistory) -> Self {
        self.history = history;
        self
    }

    /// End the session and return the store
    pub fn close(self) -> S {
        tracing::debug!("closing session with {} record(s)", self.records.len());
        self.store
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn records(&self) -> &[CrossingRecord] {
        &self.records
    }

    pub fn contexts(&self) -> &ContextMap {
        &self.contexts
    }

    pub fn history(&self) -> &ApplyHistory {
        &self.history
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&ChangeEvent) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn notify(&mut self, event: ChangeEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    /// Rescan the document, replacing the record sequence
    pub fn scan(&mut self) -> Result<ScanStats> {
        let result = scan(&self.store)?;
        let stats = ScanStats::from(&result);
        self.records = result.records;
        self.contexts = result.contexts;
        self.notify(ChangeEvent::Scanned(stats));
        Ok(stats)
    }

    /// Open disagreements on any tracked field, across all records
    pub fn conflicts(&self) -> Vec<Conflict> {
        let resolver = DuplicateResolver::main();
        self.records
            .iter()
            .filter(|r| r.state == GroupState::Conflicted)
            .flat_map(|r| resolver.conflicts(r, &self.contexts))
            .collect()
    }

    /// Number of crossings whose instances still disagree
    pub fn unresolved(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == GroupState::Conflicted)
            .count()
    }

    /// Fail with `Error::Unresolved` while any crossing is conflicted
    pub fn ensure_resolved(&self) -> Result<()> {
        match self.unresolved() {
            0 => Ok(()),
            count => Err(Error::Unresolved { count }),
        }
    }

    /// Resolve duplicates on every tracked field
    pub fn resolve(&mut self, policy: &mut dyn ResolutionPolicy) -> Result<ResolveSummary> {
        self.resolve_with(&DuplicateResolver::main(), policy)
    }

    /// Resolve duplicates on the coordinate fields only
    pub fn resolve_lat_long(&mut self, policy: &mut dyn ResolutionPolicy) -> Result<ResolveSummary> {
        self.resolve_with(&DuplicateResolver::lat_long(), policy)
    }

    fn resolve_with(
        &mut self,
        resolver: &DuplicateResolver,
        policy: &mut dyn ResolutionPolicy,
    ) -> Result<ResolveSummary> {
        let summary = resolver.resolve_duplicates(&mut self.records, &self.contexts, policy)?;
        self.notify(ChangeEvent::Resolved(summary));
        Ok(summary)
    }

    /// Write the record sequence back to the document and its tables
    pub fn apply(&mut self) -> Result<ApplyReport> {
        let report = apply_changes(&mut self.store, &self.records, &self.tables)?;
        self.record_apply(report);
        Ok(report)
    }

    fn record_apply(&mut self, report: ApplyReport) {
        self.history.add_entry(create_entry(&report));
        self.notify(ChangeEvent::Applied(report));
    }

    /// Scan, resolve and apply in one pass.
    ///
    /// Nothing is kept if any step fails.
    pub fn reconcile(&mut self, policy: &mut dyn ResolutionPolicy) -> Result<ReconcileReport> {
        let mut scanned = scan(&self.store)?;
        let stats = ScanStats::from(&scanned);
        let resolve = DuplicateResolver::main().resolve_duplicates(
            &mut scanned.records,
            &scanned.contexts,
            policy,
        )?;
        let apply = apply_changes(&mut self.store, &scanned.records, &self.tables)?;

        self.records = scanned.records;
        self.contexts = scanned.contexts;
        self.notify(ChangeEvent::Scanned(stats));
        self.notify(ChangeEvent::Resolved(resolve));
        self.record_apply(apply);

        Ok(ReconcileReport {
            scan: stats,
            resolve,
            apply,
        })
    }

    /// Place a new crossing at position `index`, shifting later codes up.
    ///
    /// The new marker and the renumbered sequence are written in one
    /// transaction; on any failure the document and records are unchanged.
    pub fn insert_at(&mut self, index: usize, placement: &Placement) -> Result<ApplyReport> {
        if index > self.records.len() {
            return Err(Error::NotFound(format!(
                "insert position {} (have {} crossings)",
                index,
                self.records.len()
            )));
        }

        let mut records = self.records.clone();
        self.renumber.shift(&mut records, index, 1);
        let code = self.renumber.name_at(index);
        self.place(records, index, code, placement)
    }

    /// Place a new crossing after all existing ones
    pub fn append(&mut self, placement: &Placement) -> Result<ApplyReport> {
        let code = self.renumber.next_name(&self.records);
        let records = self.records.clone();
        let index = records.len();
        self.place(records, index, code, placement)
    }

    fn place(
        &mut self,
        mut records: Vec<CrossingRecord>,
        index: usize,
        code: String,
        placement: &Placement,
    ) -> Result<ApplyReport> {
        records.insert(
            index,
            CrossingRecord::unplaced(FieldSet::with_code(code.clone())),
        );
        check_applicable(&records)?;

        let tables = &self.tables;
        let report = in_transaction(&mut self.store, Stage::Insert, |store| {
            let instance = create_entity(store, &records[index], placement)?;
            records[index].attach(instance);
            write_back(store, &records, tables)
        })?;

        tracing::info!("inserted {} at position {}", code, index + 1);
        self.records = records;
        self.notify(ChangeEvent::Inserted { index, code });
        self.record_apply(report);
        Ok(report)
    }

    /// Delete the crossing at `index` with all its instances, shifting later
    /// codes down. Removal and renumbering are written in one transaction.
    pub fn delete_at(&mut self, index: usize) -> Result<(CrossingRecord, ApplyReport)> {
        if index >= self.records.len() {
            return Err(Error::NotFound(format!("crossing at position {}", index)));
        }

        let mut records = self.records.clone();
        let removed = records.remove(index);
        self.renumber.shift(&mut records, index, -1);
        check_applicable(&records)?;

        let tables = &self.tables;
        let report = in_transaction(&mut self.store, Stage::Delete, |store| {
            remove_entities(store, &removed.all_instances)?;
            write_back(store, &records, tables)
        })?;

        tracing::info!("deleted {} at position {}", removed.code(), index + 1);
        self.records = records;
        self.notify(ChangeEvent::Deleted {
            index,
            code: removed.code().to_string(),
        });
        self.record_apply(report);
        Ok((removed, report))
    }

    /// Delete a crossing by code
    pub fn delete_code(&mut self, code: &str) -> Result<(CrossingRecord, ApplyReport)> {
        let key = crate::identity::crossing_key(code);
        let index = self
            .records
            .iter()
            .position(|r| r.key() == key)
            .ok_or_else(|| Error::NotFound(format!("crossing {}", code.trim())))?;
        self.delete_at(index)
    }

    /// Edit one field of the record at `index`; written on the next apply
    pub fn set_field(&mut self, index: usize, field: Field, value: &str) -> Result<()> {
        let record = self
            .records
            .get_mut(index)
            .ok_or_else(|| Error::NotFound(format!("crossing at position {}", index)))?;
        record.fields.set(field, value);
        self.notify(ChangeEvent::Edited { index, field });
        Ok(())
    }

    /// Number every crossing by its position
    pub fn renumber(&mut self) -> usize {
        let changed = self.renumber.renumber_sequential(&mut self.records);
        self.notify(ChangeEvent::Renumbered { changed });
        changed
    }

    /// Merge imported rows; written on the next apply
    pub fn merge_imported(&mut self, rows: Vec<ImportRow>) -> MergeReport {
        let report = merge_imported(&mut self.records, rows);
        self.notify(ChangeEvent::Merged(report.clone()));
        report
    }

    pub fn create_page_table(
        &mut self,
        dwg_ref: Option<&str>,
        placement: &Placement,
    ) -> Result<TableRef> {
        let table =
            self.tables
                .create_and_insert_page_table(&mut self.store, &self.records, dwg_ref, placement)?;
        self.notify(ChangeEvent::TableCreated(table));
        Ok(table)
    }

    pub fn create_lat_long_table(&mut self, placement: &Placement) -> Result<TableRef> {
        let table =
            self.tables
                .create_and_insert_lat_long_table(&mut self.store, &self.records, placement)?;
        self.notify(ChangeEvent::TableCreated(table));
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ConflictGroup, FirstDiscovered, Resolution};
    use crate::store::{EntityDoc, MemoryStore, RegionId};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fields(code: &str, owner: &str) -> FieldSet {
        FieldSet {
            owner: owner.to_string(),
            ..FieldSet::with_code(code)
        }
    }

    fn codes<S: DocumentStore>(session: &Session<S>) -> Vec<&str> {
        session.records().iter().map(|r| r.code()).collect()
    }

    fn three_crossings() -> (MemoryStore, RegionId) {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet 1");
        store.add_marker(sheet, fields("X1", "Co A"));
        store.add_marker(sheet, fields("X2", "Co B"));
        store.add_marker(sheet, fields("X3", "Co C"));
        (store, sheet)
    }

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_insert_shifts_later_codes() {
        let (mut store, sheet) = three_crossings();
        let table = store.add_table(
            sheet,
            grid(&[
                &["XING", "OWNER", "DESCRIPTION"],
                &["X1", "Co A", ""],
                &["X2", "Co B", ""],
                &["X3", "Co C", ""],
            ]),
        );
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();

        let report = session.insert_at(2, &Placement::new(sheet, 5.0, 5.0)).unwrap();
        let inserted = &session.records()[2];
        assert_eq!(inserted.code(), "X3");
        assert_eq!(inserted.all_instances.len(), 1);
        assert_eq!(codes(&session), vec!["X1", "X2", "X3", "X4"]);
        assert_eq!(report.instances_written, 4);
        assert_eq!(session.history().len(), 1);

        let store = session.close();
        let cells = store.cells_of(table).unwrap();
        assert_eq!(cells[3], vec!["X4", "Co C", ""]);
    }

    #[test]
    fn test_delete_shifts_remainder_down() {
        let (store, _) = three_crossings();
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();
        let doomed = session.records()[1].all_instances.clone();

        let (removed, _) = session.delete_code("x2").unwrap();

        assert_eq!(removed.code(), "X2");
        assert_eq!(codes(&session), vec!["X1", "X2"]);
        assert_eq!(session.records()[1].fields.owner, "Co C");
        assert!(!session.store().contains_entity(doomed[0]));

        let store = session.close();
        let rescanned = scan(&store).unwrap();
        assert_eq!(rescanned.records[1].code(), "X2");
        assert_eq!(rescanned.records[1].fields.owner, "Co C");
    }

    #[test]
    fn test_invalid_records_block_delete() {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet 1");
        let first = store.add_marker(sheet, fields("X1", "Co A"));
        store.add_marker(sheet, fields("X2", "Co B"));
        store.add_marker(
            sheet,
            FieldSet {
                lat: "north".to_string(),
                ..fields("X3", "Co C")
            },
        );
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();
        let before = session.records().to_vec();

        let err = session.delete_at(0).unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(session.store().contains_entity(first));
        assert_eq!(session.records(), before.as_slice());
    }

    #[test]
    fn test_delete_unknown_code() {
        let (store, _) = three_crossings();
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();

        let err = session.delete_code("X9").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(session.records().len(), 3);
    }

    #[test]
    fn test_failed_insert_leaves_records_unchanged() {
        let (store, _) = three_crossings();
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();
        let before = session.records().to_vec();

        let err = session
            .insert_at(0, &Placement::new(RegionId(99), 0.0, 0.0))
            .unwrap_err();

        assert!(matches!(err, Error::Store { .. }));
        assert_eq!(session.records(), before.as_slice());
    }

    #[test]
    fn test_invalid_records_block_insert() {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet 1");
        store.add_marker(sheet, fields("X1", "Co A"));
        store.add_marker(
            sheet,
            FieldSet {
                lat: "north".to_string(),
                ..fields("X2", "Co B")
            },
        );
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();
        let before = session.records().to_vec();

        let err = session
            .insert_at(1, &Placement::new(sheet, 0.0, 0.0))
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(session.records(), before.as_slice());
        assert_eq!(session.store().counts().entities_created, 0);

        let rescanned = scan(session.store()).unwrap();
        assert_eq!(rescanned.records.len(), 2);
        assert!(rescanned
            .records
            .iter()
            .all(|r| r.state != GroupState::Conflicted && r.all_instances.len() == 1));
    }

    #[test]
    fn test_failed_renumber_write_removes_new_marker() {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet 1");
        let first = store.add_marker(sheet, fields("X1", "Co A"));
        store.add_entity(
            sheet,
            EntityDoc {
                kind: "XING".to_string(),
                fields: Some(fields("X2", "Co B")),
                read_only: true,
                ..EntityDoc::default()
            },
        );
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();
        let before = session.records().to_vec();

        let err = session
            .insert_at(0, &Placement::new(sheet, 0.0, 0.0))
            .unwrap_err();

        assert!(matches!(err, Error::Store { stage: Stage::Apply, .. }));
        assert_eq!(session.records(), before.as_slice());
        assert!(session.history().is_empty());
        assert_eq!(session.store().fields_of(first).unwrap().crossing, "X1");

        let rescanned = scan(session.store()).unwrap();
        let found: Vec<&str> = rescanned.records.iter().map(|r| r.code()).collect();
        assert_eq!(found, vec!["X1", "X2"]);
        assert_eq!(rescanned.instance_count(), 2);
    }

    #[test]
    fn test_append_uses_next_number() {
        let (store, sheet) = three_crossings();
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();

        session.append(&Placement::new(sheet, 0.0, 0.0)).unwrap();
        assert_eq!(codes(&session), vec!["X1", "X2", "X3", "X4"]);
        assert_eq!(session.records()[3].all_instances.len(), 1);
    }

    #[test]
    fn test_reconcile_converges_and_records_history() {
        let mut store = MemoryStore::new();
        let a = store.add_region("A");
        let b = store.add_region("B");
        store.add_marker(a, fields("X1", "Co A"));
        let second = store.add_marker(b, fields("X1", "Co B"));
        let mut session = Session::open(store, Config::default());

        assert!(session.conflicts().is_empty());
        let report = session.reconcile(&mut FirstDiscovered).unwrap();

        assert_eq!(report.scan.instances, 2);
        assert_eq!(report.resolve.decided, 1);
        assert_eq!(report.apply.instances_written, 2);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.store().fields_of(second).unwrap().owner, "Co A");
    }

    #[test]
    fn test_aborted_resolve_keeps_conflicts() {
        let mut store = MemoryStore::new();
        let a = store.add_region("A");
        store.add_marker(a, fields("X1", "Co A"));
        store.add_marker(a, fields("X1", "Co B"));
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();
        assert_eq!(session.conflicts().len(), 1);

        let mut cancel = |_: &ConflictGroup<'_>| -> Option<Resolution> { None };
        let err = session.resolve(&mut cancel).unwrap_err();

        assert!(matches!(err, Error::ResolutionAborted { .. }));
        assert_eq!(session.records()[0].state, GroupState::Conflicted);
        assert_eq!(session.conflicts().len(), 1);
        assert!(matches!(
            session.ensure_resolved(),
            Err(Error::Unresolved { count: 1 })
        ));
    }

    #[test]
    fn test_apply_refuses_unresolved_conflicts() {
        let mut store = MemoryStore::new();
        let a = store.add_region("A");
        store.add_marker(a, fields("X1", "Co A"));
        let second = store.add_marker(a, fields("X1", "Co B"));
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();

        let err = session.apply().unwrap_err();

        assert!(matches!(err, Error::Unresolved { count: 1 }));
        assert!(session.history().is_empty());
        assert_eq!(session.store().fields_of(second).unwrap().owner, "Co B");
    }

    #[test]
    fn test_listeners_see_changes() {
        let (store, _) = three_crossings();
        let mut session = Session::open(store, Config::default());
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        session.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        session.scan().unwrap();
        session.set_field(0, Field::Location, "Mile 2").unwrap();
        session.merge_imported(vec![ImportRow::new("X7")]);
        session.renumber();

        let events = events.borrow();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ChangeEvent::Scanned(ScanStats { records: 3, .. })));
        assert_eq!(
            events[1],
            ChangeEvent::Edited {
                index: 0,
                field: Field::Location
            }
        );
        assert_eq!(events[3], ChangeEvent::Renumbered { changed: 1 });
    }

    #[test]
    fn test_create_tables_from_records() {
        let (store, sheet) = three_crossings();
        let mut session = Session::open(store, Config::default());
        session.scan().unwrap();
        session.set_field(2, Field::Lat, "45.25").unwrap();

        let page = session
            .create_page_table(None, &Placement::new(sheet, 0.0, 0.0))
            .unwrap();
        let coords = session
            .create_lat_long_table(&Placement::new(sheet, 0.0, 10.0))
            .unwrap();

        let store = session.close();
        assert_eq!(store.cells_of(page).unwrap().len(), 4);
        let coord_cells = store.cells_of(coords).unwrap();
        assert_eq!(coord_cells.len(), 2);
        assert_eq!(coord_cells[1][0], "X3");
    }
}
