use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{DisaggError, Result};

use super::model::{ApplianceId, Chunk};

// ---------------------------------------------------------------------------
// ChunkSource – anything that yields chunks lazily
// ---------------------------------------------------------------------------

/// Lazily yields successive chunks of one data stream.
///
/// Every call to [`chunks`](ChunkSource::chunks) restarts the stream from the
/// beginning. Failing to open the underlying data is reported as the first
/// item rather than up front.
pub trait ChunkSource {
    fn chunks(&self) -> Box<dyn Iterator<Item = Result<Chunk>> + '_>;
}

/// Chunks held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    chunks: Vec<Chunk>,
}

impl InMemorySource {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        InMemorySource { chunks }
    }
}

impl ChunkSource for InMemorySource {
    fn chunks(&self) -> Box<dyn Iterator<Item = Result<Chunk>> + '_> {
        Box::new(self.chunks.iter().cloned().map(Ok::<Chunk, DisaggError>))
    }
}

// ---------------------------------------------------------------------------
// ElecMeter
// ---------------------------------------------------------------------------

/// What a meter measures: the whole site, or one appliance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeterRole {
    Site,
    Appliance(ApplianceId),
}

impl fmt::Display for MeterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterRole::Site => write!(f, "site"),
            MeterRole::Appliance(id) => write!(f, "{id}"),
        }
    }
}

/// A single meter and the data it recorded.
#[derive(Clone)]
pub struct ElecMeter {
    pub building: u32,
    pub instance: u32,
    pub role: MeterRole,
    source: Arc<dyn ChunkSource + Send + Sync>,
}

impl ElecMeter {
    pub fn new(
        building: u32,
        instance: u32,
        role: MeterRole,
        source: Arc<dyn ChunkSource + Send + Sync>,
    ) -> Self {
        ElecMeter {
            building,
            instance,
            role,
            source,
        }
    }

    pub fn site(building: u32, instance: u32, source: Arc<dyn ChunkSource + Send + Sync>) -> Self {
        Self::new(building, instance, MeterRole::Site, source)
    }

    pub fn appliance(
        building: u32,
        instance: u32,
        appliance: ApplianceId,
        source: Arc<dyn ChunkSource + Send + Sync>,
    ) -> Self {
        Self::new(building, instance, MeterRole::Appliance(appliance), source)
    }

    pub fn is_site_meter(&self) -> bool {
        self.role == MeterRole::Site
    }

    pub fn appliance_id(&self) -> Option<&ApplianceId> {
        match &self.role {
            MeterRole::Appliance(id) => Some(id),
            MeterRole::Site => None,
        }
    }
}

impl fmt::Debug for ElecMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElecMeter")
            .field("building", &self.building)
            .field("instance", &self.instance)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl ChunkSource for ElecMeter {
    fn chunks(&self) -> Box<dyn Iterator<Item = Result<Chunk>> + '_> {
        self.source.chunks()
    }
}

// ---------------------------------------------------------------------------
// MeterGroup
// ---------------------------------------------------------------------------

/// A collection of meters. As a [`ChunkSource`] it behaves like multi-phase
/// mains: the i-th chunk of every meter is summed into one.
#[derive(Debug, Clone, Default)]
pub struct MeterGroup {
    meters: Vec<ElecMeter>,
}

impl MeterGroup {
    pub fn new(meters: Vec<ElecMeter>) -> Self {
        MeterGroup { meters }
    }

    pub fn push(&mut self, meter: ElecMeter) {
        self.meters.push(meter);
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElecMeter> {
        self.meters.iter()
    }

    pub fn site_meters(&self) -> MeterGroup {
        self.filtered(|m| m.is_site_meter())
    }

    pub fn appliance_meters(&self) -> MeterGroup {
        self.filtered(|m| !m.is_site_meter())
    }

    /// Appliance meters whose kind is in `kinds`. An empty set selects none.
    pub fn select_appliances(&self, kinds: &BTreeSet<String>) -> MeterGroup {
        self.filtered(|m| m.appliance_id().is_some_and(|id| kinds.contains(&id.kind)))
    }

    fn filtered(&self, keep: impl Fn(&ElecMeter) -> bool) -> MeterGroup {
        MeterGroup::new(self.meters.iter().filter(|m| keep(m)).cloned().collect())
    }
}

impl ChunkSource for MeterGroup {
    fn chunks(&self) -> Box<dyn Iterator<Item = Result<Chunk>> + '_> {
        let streams = self.meters.iter().map(|m| m.chunks()).collect();
        Box::new(PhaseSum {
            streams,
            done: false,
        })
    }
}

/// Zips the per-meter streams and sums each row of chunks.
struct PhaseSum<'a> {
    streams: Vec<Box<dyn Iterator<Item = Result<Chunk>> + 'a>>,
    done: bool,
}

impl PhaseSum<'_> {
    fn next_sum(&mut self) -> Option<Result<Chunk>> {
        let mut acc: Option<Chunk> = None;
        let mut exhausted: Vec<usize> = Vec::new();

        for (i, stream) in self.streams.iter_mut().enumerate() {
            match stream.next() {
                None => exhausted.push(i),
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(chunk)) => {
                    acc = Some(match acc {
                        None => chunk,
                        Some(prev) => match prev.add_aligned(&chunk) {
                            Ok(sum) => sum,
                            Err(e) => return Some(Err(e)),
                        },
                    });
                }
            }
        }

        match (acc, exhausted.first()) {
            (None, _) => None,
            (Some(chunk), None) => Some(Ok(chunk)),
            (Some(_), Some(&meter)) => Some(Err(DisaggError::MeterGroupMisaligned { meter })),
        }
    }
}

impl Iterator for PhaseSum<'_> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_sum();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}
