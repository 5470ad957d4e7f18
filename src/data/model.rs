use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DisaggError, Result};

/// Row index of every chunk.
pub type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// Measurement – what a column holds, e.g. `power/active`
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhysicalQuantity {
    Power,
    Energy,
    Voltage,
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcType {
    Active,
    Apparent,
    Reactive,
}

/// A physical quantity paired with its AC type. Column names in meter files
/// use the `quantity/ac_type` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Measurement {
    pub quantity: PhysicalQuantity,
    pub ac_type: AcType,
}

impl Measurement {
    pub const ACTIVE_POWER: Measurement = Measurement {
        quantity: PhysicalQuantity::Power,
        ac_type: AcType::Active,
    };
    pub const APPARENT_POWER: Measurement = Measurement {
        quantity: PhysicalQuantity::Power,
        ac_type: AcType::Apparent,
    };
}

impl fmt::Display for PhysicalQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhysicalQuantity::Power => "power",
            PhysicalQuantity::Energy => "energy",
            PhysicalQuantity::Voltage => "voltage",
            PhysicalQuantity::Current => "current",
        };
        f.write_str(s)
    }
}

impl fmt::Display for AcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AcType::Active => "active",
            AcType::Apparent => "apparent",
            AcType::Reactive => "reactive",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.quantity, self.ac_type)
    }
}

impl FromStr for Measurement {
    type Err = DisaggError;

    fn from_str(s: &str) -> Result<Self> {
        let (q, a) = s
            .split_once('/')
            .ok_or_else(|| DisaggError::invalid_column(s, "expected 'quantity/ac_type'"))?;
        let quantity = match q.trim().to_ascii_lowercase().as_str() {
            "power" => PhysicalQuantity::Power,
            "energy" => PhysicalQuantity::Energy,
            "voltage" => PhysicalQuantity::Voltage,
            "current" => PhysicalQuantity::Current,
            other => {
                return Err(DisaggError::invalid_column(
                    s,
                    format!("unknown physical quantity '{other}'"),
                ))
            }
        };
        let ac_type = match a.trim().to_ascii_lowercase().as_str() {
            "active" => AcType::Active,
            "apparent" => AcType::Apparent,
            "reactive" => AcType::Reactive,
            other => {
                return Err(DisaggError::invalid_column(
                    s,
                    format!("unknown AC type '{other}'"),
                ))
            }
        };
        Ok(Measurement { quantity, ac_type })
    }
}

// ---------------------------------------------------------------------------
// ApplianceId – `kind_instance`, e.g. `fridge_1`
// ---------------------------------------------------------------------------

/// Identifies one appliance within a building. Disaggregated chunks name
/// their columns with the textual form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplianceId {
    pub kind: String,
    pub instance: u32,
}

impl ApplianceId {
    pub fn new(kind: impl Into<String>, instance: u32) -> Self {
        ApplianceId {
            kind: kind.into(),
            instance,
        }
    }
}

impl fmt::Display for ApplianceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.instance)
    }
}

impl FromStr for ApplianceId {
    type Err = DisaggError;

    /// The instance is whatever follows the last underscore, so kinds may
    /// themselves contain underscores (`washing_machine_1`). Kinds end up in
    /// output file names and may not contain path separators or start with
    /// a dot.
    fn from_str(s: &str) -> Result<Self> {
        let (kind, instance) = s
            .rsplit_once('_')
            .ok_or_else(|| DisaggError::invalid_column(s, "expected 'kind_instance'"))?;
        if kind.is_empty() {
            return Err(DisaggError::invalid_column(s, "empty appliance kind"));
        }
        let path_like = kind.contains(['/', '\\']) || kind.contains(char::is_control);
        if path_like || kind.starts_with('.') {
            return Err(DisaggError::invalid_column(
                s,
                "appliance kind must not contain path separators or start with '.'",
            ));
        }
        let instance = instance.parse::<u32>().map_err(|_| {
            DisaggError::invalid_column(s, format!("'{instance}' is not an instance number"))
        })?;
        Ok(ApplianceId::new(kind, instance))
    }
}

// ---------------------------------------------------------------------------
// Chunk – a bounded, time-indexed table
// ---------------------------------------------------------------------------

/// One named column of a [`Chunk`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// Same length as the chunk index. `NaN` marks a missing reading.
    pub values: Vec<f64>,
}

/// A contiguous slice of a meter's data stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub index: Vec<Timestamp>,
    pub columns: Vec<Column>,
}

impl Chunk {
    pub fn new(index: Vec<Timestamp>) -> Self {
        Chunk {
            index,
            columns: Vec::new(),
        }
    }

    /// Builder form of [`Chunk::push_column`].
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        self.push_column(name, values)?;
        Ok(self)
    }

    /// Append a column. It must match the index length and not reuse a name.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.index.len() {
            return Err(DisaggError::invalid_column(
                name,
                format!("expected {} values, got {}", self.index.len(), values.len()),
            ));
        }
        if self.column(&name).is_some() {
            return Err(DisaggError::invalid_column(name, "duplicate column"));
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// A chunk with no rows or no columns carries no readings.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.index.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.index.last().copied()
    }

    /// Sum of every finite reading across all columns.
    pub fn total(&self) -> f64 {
        self.columns
            .iter()
            .flat_map(|c| c.values.iter())
            .filter(|v| v.is_finite())
            .sum()
    }

    /// The column to treat as "power": active, then apparent, then whatever
    /// comes first.
    pub fn power_column(&self) -> Option<&Column> {
        let active = Measurement::ACTIVE_POWER.to_string();
        let apparent = Measurement::APPARENT_POWER.to_string();
        self.column(&active)
            .or_else(|| self.column(&apparent))
            .or_else(|| self.columns.first())
    }

    /// Copy of a single column under the same index.
    pub fn select_column(&self, name: &str) -> Result<Chunk> {
        let col = self
            .column(name)
            .ok_or_else(|| DisaggError::invalid_column(name, "no such column"))?;
        Chunk::new(self.index.clone()).with_column(col.name.clone(), col.values.clone())
    }

    /// Row-wise sum of two chunks sharing the same index. Columns are matched
    /// by name; a column present in only one side is carried over unchanged.
    pub fn add_aligned(&self, other: &Chunk) -> Result<Chunk> {
        if self.index != other.index {
            return Err(DisaggError::IndexMismatch {
                left: self.len(),
                right: other.len(),
            });
        }

        let mut sums: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut order: Vec<&str> = Vec::new();
        for col in self.columns.iter().chain(other.columns.iter()) {
            match sums.get_mut(col.name.as_str()) {
                Some(acc) => {
                    for (a, v) in acc.iter_mut().zip(&col.values) {
                        *a += *v;
                    }
                }
                None => {
                    order.push(&col.name);
                    sums.insert(&col.name, col.values.clone());
                }
            }
        }

        let mut out = Chunk::new(self.index.clone());
        for name in order {
            if let Some(values) = sums.remove(name) {
                out.push_column(name, values)?;
            }
        }
        Ok(out)
    }
}
