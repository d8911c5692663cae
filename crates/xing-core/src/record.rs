//! Core record types for crossings and their placed instances

use crate::identity::crossing_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque handle to a placed entity, issued by the document store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceRef(pub u64);

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A field of a crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Crossing,
    Owner,
    Description,
    Location,
    DwgRef,
    Lat,
    Long,
}

impl Field {
    /// Fields compared between duplicate instances (everything but the code)
    pub const TRACKED: [Field; 6] = [
        Field::Owner,
        Field::Description,
        Field::Location,
        Field::DwgRef,
        Field::Lat,
        Field::Long,
    ];

    /// Display name, also used as the table/CSV heading
    pub fn name(&self) -> &'static str {
        match self {
            Field::Crossing => "CROSSING",
            Field::Owner => "OWNER",
            Field::Description => "DESCRIPTION",
            Field::Location => "LOCATION",
            Field::DwgRef => "DWG_REF",
            Field::Lat => "LAT",
            Field::Long => "LONG",
        }
    }

    /// Recognize a table or CSV heading, ignoring case, spacing and punctuation
    pub fn from_heading(text: &str) -> Option<Field> {
        let normalized: String = text
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "XING" | "CROSSING" | "ID" => Some(Field::Crossing),
            "OWNER" => Some(Field::Owner),
            "DESCRIPTION" | "DESC" => Some(Field::Description),
            "LOCATION" => Some(Field::Location),
            "DWGREF" | "DWG" | "REFERENCE" => Some(Field::DwgRef),
            "LAT" | "LATITUDE" => Some(Field::Lat),
            "LONG" | "LONGITUDE" | "LON" | "LNG" => Some(Field::Long),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The field values carried by a crossing or by one of its instances
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSet {
    pub crossing: String,
    pub owner: String,
    pub description: String,
    pub location: String,
    pub dwg_ref: String,
    pub lat: String,
    pub long: String,
}

impl FieldSet {
    /// Create a field set with only the crossing code filled in
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            crossing: code.into(),
            ..Self::default()
        }
    }

    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Crossing => &self.crossing,
            Field::Owner => &self.owner,
            Field::Description => &self.description,
            Field::Location => &self.location,
            Field::DwgRef => &self.dwg_ref,
            Field::Lat => &self.lat,
            Field::Long => &self.long,
        }
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        match field {
            Field::Crossing => self.crossing = value,
            Field::Owner => self.owner = value,
            Field::Description => self.description = value,
            Field::Location => self.location = value,
            Field::DwgRef => self.dwg_ref = value,
            Field::Lat => self.lat = value,
            Field::Long => self.long = value,
        }
    }

    /// Comparison key of the crossing code
    pub fn key(&self) -> String {
        crossing_key(&self.crossing)
    }
}

/// Resolution state of a crossing's instance group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupState {
    /// All instances agree on every compared field
    Unanimous,
    /// At least one compared field disagrees between instances
    Conflicted,
    /// Canonical values are fixed
    Resolved,
}

/// One physical representation of a crossing, as found in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceContext {
    pub instance: InstanceRef,
    /// Name of the region (sheet/space) the instance lives in
    pub space_name: String,
    /// As-found values, before reconciliation
    pub fields: FieldSet,
}

/// One logical crossing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingRecord {
    /// Current canonical values
    pub fields: FieldSet,
    /// Every instance of this crossing, in discovery order
    pub all_instances: Vec<InstanceRef>,
    /// Instance whose values were chosen as authoritative
    pub canonical_instance: Option<InstanceRef>,
    pub state: GroupState,
    /// Conflicted fields whose value has already been decided
    #[serde(default)]
    pub settled_fields: BTreeSet<Field>,
}

impl CrossingRecord {
    /// A record that is not yet placed in the document
    pub fn unplaced(fields: FieldSet) -> Self {
        Self {
            fields,
            all_instances: Vec::new(),
            canonical_instance: None,
            state: GroupState::Resolved,
            settled_fields: BTreeSet::new(),
        }
    }

    pub fn code(&self) -> &str {
        &self.fields.crossing
    }

    pub fn key(&self) -> String {
        self.fields.key()
    }

    /// Record a newly placed instance; the first one becomes canonical
    pub fn attach(&mut self, instance: InstanceRef) {
        self.all_instances.push(instance);
        if self.canonical_instance.is_none() {
            self.canonical_instance = Some(instance);
        }
    }
}
