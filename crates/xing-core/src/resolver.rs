//! Duplicate detection and resolution
//!
//! Instances sharing a crossing key form one group. A group whose instances
//! agree on every compared field is `Unanimous` and resolves on its own; a
//! group with at least one disagreeing field is `Conflicted` and needs a
//! [`ResolutionPolicy`] decision. Decisions for the whole record set are
//! collected before any record is touched, so an aborted policy leaves every
//! record exactly as it was.

use crate::error::{Error, Result};
use crate::record::{CrossingRecord, Field, GroupState, InstanceContext, InstanceRef};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// Instance contexts keyed by handle, in discovery order
pub type ContextMap = IndexMap<InstanceRef, InstanceContext>;

/// Disagreement on one field within a crossing group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub crossing_key: String,
    pub field: Field,
    /// Value held by each instance, in discovery order
    pub values: Vec<(InstanceRef, String)>,
}

impl Conflict {
    /// Distinct values with the instances holding them, first-seen order
    pub fn distinct_values(&self) -> Vec<(&str, Vec<InstanceRef>)> {
        let mut distinct: IndexMap<&str, Vec<InstanceRef>> = IndexMap::new();
        for (instance, value) in &self.values {
            distinct.entry(value.as_str()).or_default().push(*instance);
        }
        distinct.into_iter().collect()
    }
}

/// Everything a policy needs to decide one conflicted crossing
#[derive(Debug)]
pub struct ConflictGroup<'a> {
    /// Position of the record in the record sequence
    pub index: usize,
    pub record: &'a CrossingRecord,
    /// The group's instances, in discovery order
    pub instances: Vec<&'a InstanceContext>,
    pub conflicts: Vec<Conflict>,
}

/// A policy's decision for one conflicted crossing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Take every conflicted value from one instance
    TakeInstance(InstanceRef),
    /// Take each listed field from the named instance; conflicted fields not
    /// listed keep the first-discovered value
    PerField(Vec<(Field, InstanceRef)>),
}

/// Decides conflicted crossings; returning `None` aborts resolution
pub trait ResolutionPolicy {
    fn resolve(&mut self, group: &ConflictGroup<'_>) -> Option<Resolution>;
}

impl<F> ResolutionPolicy for F
where
    F: FnMut(&ConflictGroup<'_>) -> Option<Resolution>,
{
    fn resolve(&mut self, group: &ConflictGroup<'_>) -> Option<Resolution> {
        self(group)
    }
}

/// Headless policy: the first-discovered instance wins wholesale.
///
/// Discovery order is region order, then entity order within a region, so
/// the outcome is stable across runs over the same document.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstDiscovered;

impl ResolutionPolicy for FirstDiscovered {
    fn resolve(&mut self, group: &ConflictGroup<'_>) -> Option<Resolution> {
        group
            .instances
            .first()
            .map(|c| Resolution::TakeInstance(c.instance))
    }
}

/// Outcome counts of one resolution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveSummary {
    /// Groups resolved without a decision
    pub unanimous: usize,
    /// Groups resolved by the policy
    pub decided: usize,
    /// Records left untouched that still conflict on fields outside this
    /// resolver's scope
    pub still_conflicted: usize,
}

struct Decision {
    values: Vec<(Field, String)>,
    canonical: Option<InstanceRef>,
}

/// Group instances by crossing key, in first-discovery order.
///
/// Each record starts from its first instance's values and is marked
/// `Unanimous` or `Conflicted`.
pub fn group_instances<'a, I>(contexts: I) -> Vec<CrossingRecord>
where
    I: IntoIterator<Item = &'a InstanceContext>,
{
    let mut groups: IndexMap<String, Vec<&InstanceContext>> = IndexMap::new();
    for context in contexts {
        groups.entry(context.fields.key()).or_default().push(context);
    }

    groups
        .into_values()
        .map(|members| {
            let first = members[0];
            let conflicted = Field::TRACKED
                .iter()
                .any(|&field| disagrees(&members, field));

            CrossingRecord {
                fields: first.fields.clone(),
                all_instances: members.iter().map(|c| c.instance).collect(),
                canonical_instance: Some(first.instance),
                state: if conflicted {
                    GroupState::Conflicted
                } else {
                    GroupState::Unanimous
                },
                settled_fields: BTreeSet::new(),
            }
        })
        .collect()
}

fn disagrees(members: &[&InstanceContext], field: Field) -> bool {
    members
        .windows(2)
        .any(|pair| pair[0].fields.get(field) != pair[1].fields.get(field))
}

/// Resolves duplicates over a fixed set of fields
#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    fields: Vec<Field>,
}

impl DuplicateResolver {
    pub fn new(fields: &[Field]) -> Self {
        Self {
            fields: fields.to_vec(),
        }
    }

    /// Resolver over every tracked field
    pub fn main() -> Self {
        Self::new(&Field::TRACKED)
    }

    /// Resolver restricted to the Lat/Long pair
    pub fn lat_long() -> Self {
        Self::new(&[Field::Lat, Field::Long])
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn covers_all_tracked(&self) -> bool {
        Field::TRACKED.iter().all(|f| self.fields.contains(f))
    }

    /// Open conflicts of `record` within this resolver's fields
    pub fn conflicts(&self, record: &CrossingRecord, contexts: &ContextMap) -> Vec<Conflict> {
        open_conflicts(record, contexts, &self.fields)
    }

    /// Resolve every unresolved record.
    ///
    /// On abort, returns `Error::ResolutionAborted` and leaves all records
    /// unchanged.
    pub fn resolve_duplicates(
        &self,
        records: &mut [CrossingRecord],
        contexts: &ContextMap,
        policy: &mut dyn ResolutionPolicy,
    ) -> Result<ResolveSummary> {
        let mut plan: Vec<(usize, Option<Decision>)> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            if record.state == GroupState::Resolved {
                continue;
            }

            let conflicts = self.conflicts(record, contexts);
            if conflicts.is_empty() {
                plan.push((index, None));
                continue;
            }

            let group = ConflictGroup {
                index,
                record,
                instances: instances_of(record, contexts),
                conflicts,
            };

            let aborted = || Error::ResolutionAborted {
                crossing: record.code().to_string(),
            };
            let resolution = policy.resolve(&group).ok_or_else(aborted)?;
            let decision = self.decide(&group, resolution).ok_or_else(aborted)?;
            plan.push((index, Some(decision)));
        }

        let mut summary = ResolveSummary::default();
        for (index, decision) in plan {
            let record = &mut records[index];
            let decided = decision.is_some();
            if let Some(decision) = decision {
                for (field, value) in decision.values {
                    record.fields.set(field, value);
                    record.settled_fields.insert(field);
                }
                if let Some(canonical) = decision.canonical {
                    record.canonical_instance = Some(canonical);
                }
            }

            let settled = open_conflicts(record, contexts, &Field::TRACKED).is_empty();
            match (decided, settled) {
                (true, _) => summary.decided += 1,
                (false, true) => summary.unanimous += 1,
                (false, false) => summary.still_conflicted += 1,
            }
            record.state = if settled {
                GroupState::Resolved
            } else {
                GroupState::Conflicted
            };
        }

        tracing::debug!(
            "resolved {} unanimous and {} decided group(s) over {:?}",
            summary.unanimous,
            summary.decided,
            self.fields
        );
        Ok(summary)
    }

    /// Turn a resolution into concrete values; `None` if it names an
    /// instance outside the group
    fn decide(&self, group: &ConflictGroup<'_>, resolution: Resolution) -> Option<Decision> {
        let source = |instance: InstanceRef| {
            group
                .instances
                .iter()
                .find(|c| c.instance == instance)
                .copied()
        };

        match resolution {
            Resolution::TakeInstance(instance) => {
                let chosen = source(instance)?;
                let values = group
                    .conflicts
                    .iter()
                    .map(|c| (c.field, chosen.fields.get(c.field).to_string()))
                    .collect();
                Some(Decision {
                    values,
                    canonical: self.covers_all_tracked().then_some(instance),
                })
            }
            Resolution::PerField(picks) => {
                let mut values = Vec::with_capacity(group.conflicts.len());
                for conflict in &group.conflicts {
                    let value = match picks.iter().find(|(f, _)| *f == conflict.field) {
                        Some((field, instance)) => source(*instance)?.fields.get(*field),
                        None => group.record.fields.get(conflict.field),
                    };
                    values.push((conflict.field, value.to_string()));
                }
                Some(Decision {
                    values,
                    canonical: None,
                })
            }
        }
    }
}

fn instances_of<'a>(record: &CrossingRecord, contexts: &'a ContextMap) -> Vec<&'a InstanceContext> {
    record
        .all_instances
        .iter()
        .filter_map(|instance| contexts.get(instance))
        .collect()
}

fn open_conflicts(record: &CrossingRecord, contexts: &ContextMap, fields: &[Field]) -> Vec<Conflict> {
    let instances = instances_of(record, contexts);
    if instances.len() < 2 {
        return Vec::new();
    }

    fields
        .iter()
        .filter(|&&field| !record.settled_fields.contains(&field) && disagrees(&instances, field))
        .map(|&field| Conflict {
            crossing_key: record.key(),
            field,
            values: instances
                .iter()
                .map(|c| (c.instance, c.fields.get(field).to_string()))
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldSet;

    fn context(id: u64, space: &str, code: &str, owner: &str, lat: &str) -> InstanceContext {
        InstanceContext {
            instance: InstanceRef(id),
            space_name: space.to_string(),
            fields: FieldSet {
                owner: owner.to_string(),
                lat: lat.to_string(),
                ..FieldSet::with_code(code)
            },
        }
    }

    fn setup(contexts: Vec<InstanceContext>) -> (Vec<CrossingRecord>, ContextMap) {
        let map: ContextMap = contexts.into_iter().map(|c| (c.instance, c)).collect();
        let records = group_instances(map.values());
        (records, map)
    }

    #[test]
    fn test_group_instances_by_key() {
        let (records, _) = setup(vec![
            context(1, "A", "X1", "Co A", ""),
            context(2, "A", "X2", "Co A", ""),
            context(3, "B", "x1", "Co A", ""),
        ]);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].all_instances, vec![InstanceRef(1), InstanceRef(3)]);
        assert_eq!(records[0].state, GroupState::Unanimous);
        assert_eq!(records[1].all_instances, vec![InstanceRef(2)]);
    }

    #[test]
    fn test_keys_unique_after_resolution() {
        let (mut records, map) = setup(vec![
            context(1, "A", "X1", "Co A", ""),
            context(2, "B", " x1", "Co B", ""),
            context(3, "B", "X2", "Co B", ""),
            context(4, "C", "X2 ", "Co B", ""),
        ]);

        DuplicateResolver::main()
            .resolve_duplicates(&mut records, &map, &mut FirstDiscovered)
            .unwrap();

        let keys: BTreeSet<String> = records.iter().map(|r| r.key()).collect();
        assert_eq!(keys.len(), records.len());
    }

    #[test]
    fn test_first_discovered_wins() {
        let (mut records, map) = setup(vec![
            context(1, "A", "X1", "Co A", ""),
            context(2, "B", "X1", "Co B", ""),
        ]);
        assert_eq!(records[0].state, GroupState::Conflicted);

        let summary = DuplicateResolver::main()
            .resolve_duplicates(&mut records, &map, &mut FirstDiscovered)
            .unwrap();

        assert_eq!(summary.decided, 1);
        assert_eq!(records[0].fields.owner, "Co A");
        assert_eq!(records[0].state, GroupState::Resolved);
        assert_eq!(records[0].canonical_instance, Some(InstanceRef(1)));
    }

    #[test]
    fn test_take_instance_sets_canonical() {
        let (mut records, map) = setup(vec![
            context(1, "A", "X1", "Co A", ""),
            context(2, "B", "X1", "Co B", ""),
        ]);

        let mut policy = |_: &ConflictGroup<'_>| Some(Resolution::TakeInstance(InstanceRef(2)));
        DuplicateResolver::main()
            .resolve_duplicates(&mut records, &map, &mut policy)
            .unwrap();

        assert_eq!(records[0].fields.owner, "Co B");
        assert_eq!(records[0].canonical_instance, Some(InstanceRef(2)));
    }

    #[test]
    fn test_per_field_resolution() {
        let (mut records, map) = setup(vec![
            context(1, "A", "X1", "Co A", "45.0"),
            context(2, "B", "X1", "Co B", "46.0"),
        ]);

        let mut policy = |group: &ConflictGroup<'_>| {
            assert_eq!(group.conflicts.len(), 2);
            Some(Resolution::PerField(vec![(Field::Lat, InstanceRef(2))]))
        };
        DuplicateResolver::main()
            .resolve_duplicates(&mut records, &map, &mut policy)
            .unwrap();

        assert_eq!(records[0].fields.owner, "Co A");
        assert_eq!(records[0].fields.lat, "46.0");
        assert_eq!(records[0].canonical_instance, Some(InstanceRef(1)));
        assert_eq!(records[0].state, GroupState::Resolved);
    }

    #[test]
    fn test_abort_leaves_records_unchanged() {
        let (mut records, map) = setup(vec![
            context(1, "A", "X1", "Co A", ""),
            context(2, "B", "X1", "Co A", ""),
            context(3, "A", "X2", "Co A", ""),
            context(4, "B", "X2", "Co B", ""),
        ]);
        let before = records.clone();

        let mut cancel = |_: &ConflictGroup<'_>| -> Option<Resolution> { None };
        let err = DuplicateResolver::main()
            .resolve_duplicates(&mut records, &map, &mut cancel)
            .unwrap_err();

        assert!(matches!(err, Error::ResolutionAborted { ref crossing } if crossing == "X2"));
        assert_eq!(records, before);
        assert_eq!(records[1].state, GroupState::Conflicted);
    }

    #[test]
    fn test_unknown_instance_aborts() {
        let (mut records, map) = setup(vec![
            context(1, "A", "X1", "Co A", ""),
            context(2, "B", "X1", "Co B", ""),
        ]);

        let mut policy = |_: &ConflictGroup<'_>| Some(Resolution::TakeInstance(InstanceRef(99)));
        let result = DuplicateResolver::main().resolve_duplicates(&mut records, &map, &mut policy);

        assert!(result.is_err());
        assert_eq!(records[0].state, GroupState::Conflicted);
    }

    #[test]
    fn test_lat_long_resolver_only_sees_coordinates() {
        let (mut records, map) = setup(vec![
            context(1, "A", "X1", "Co A", "45.0"),
            context(2, "B", "X1", "Co B", "46.0"),
        ]);

        let mut seen = Vec::new();
        let mut policy = |group: &ConflictGroup<'_>| {
            seen.extend(group.conflicts.iter().map(|c| c.field));
            Some(Resolution::TakeInstance(InstanceRef(2)))
        };
        let summary = DuplicateResolver::lat_long()
            .resolve_duplicates(&mut records, &map, &mut policy)
            .unwrap();

        assert_eq!(seen, vec![Field::Lat]);
        assert_eq!(summary.decided, 1);
        assert_eq!(summary.still_conflicted, 0);
        assert_eq!(records[0].fields.lat, "46.0");
        assert_eq!(records[0].fields.owner, "Co A");
        assert_eq!(records[0].state, GroupState::Conflicted);
        assert_eq!(records[0].canonical_instance, Some(InstanceRef(1)));

        // The main pass no longer asks about the settled coordinate
        let mut owner_only = |group: &ConflictGroup<'_>| {
            assert_eq!(group.conflicts.len(), 1);
            assert_eq!(group.conflicts[0].field, Field::Owner);
            Some(Resolution::TakeInstance(InstanceRef(1)))
        };
        DuplicateResolver::main()
            .resolve_duplicates(&mut records, &map, &mut owner_only)
            .unwrap();

        assert_eq!(records[0].fields.lat, "46.0");
        assert_eq!(records[0].state, GroupState::Resolved);
    }

    #[test]
    fn test_owner_only_conflict_counted_once_by_lat_long_pass() {
        let (mut records, map) = setup(vec![
            context(1, "A", "X1", "Co A", "45.0"),
            context(2, "B", "X1", "Co B", "45.0"),
        ]);

        let summary = DuplicateResolver::lat_long()
            .resolve_duplicates(&mut records, &map, &mut FirstDiscovered)
            .unwrap();

        assert_eq!(
            summary,
            ResolveSummary {
                unanimous: 0,
                decided: 0,
                still_conflicted: 1,
            }
        );
        assert_eq!(records[0].state, GroupState::Conflicted);
    }

    #[test]
    fn test_distinct_values_groups_instances() {
        let conflict = Conflict {
            crossing_key: "X1".to_string(),
            field: Field::Owner,
            values: vec![
                (InstanceRef(1), "Co A".to_string()),
                (InstanceRef(2), "Co B".to_string()),
                (InstanceRef(3), "Co A".to_string()),
            ],
        };

        let distinct = conflict.distinct_values();
        assert_eq!(distinct.len(), 2);
        assert_eq!(distinct[0], ("Co A", vec![InstanceRef(1), InstanceRef(3)]));
        assert_eq!(distinct[1], ("Co B", vec![InstanceRef(2)]));
    }
}
