//! Integration tests for the Disaggregator role and its provided orchestration.

use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use nilm_disagg::{
    ApplianceId, Chunk, ChunkSource, DataStore, DisaggError, Disaggregator, ElecMeter,
    InMemorySource, MeanShare, MemoryStore, MeterGroup, Result, TrainingTarget,
};

fn chunk(start: i64, values: &[f64]) -> Chunk {
    let index = (0..values.len())
        .map(|i| Utc.timestamp_opt(start + 6 * i as i64, 0).unwrap())
        .collect();
    Chunk::new(index)
        .with_column("power/active", values.to_vec())
        .unwrap()
}

fn mains(chunks: Vec<Chunk>) -> InMemorySource {
    InMemorySource::new(chunks)
}

/// Overrides nothing beyond its name.
struct Bare;

impl Disaggregator for Bare {
    fn name(&self) -> &str {
        "bare"
    }
}

/// Overrides only the two primitives and records every call.
#[derive(Default)]
struct Recorder {
    seen: RefCell<Vec<Chunk>>,
    energy: f64,
    /// Chunks whose first reading is this value disaggregate to nothing.
    empty_marker: Option<f64>,
}

impl Disaggregator for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn train_on_chunk(&mut self, chunk: &Chunk, _target: &TrainingTarget) -> Result<()> {
        self.energy += chunk.total();
        Ok(())
    }

    fn disaggregate_chunk(&self, mains: &Chunk) -> Result<Chunk> {
        self.seen.borrow_mut().push(mains.clone());
        let first = mains.columns[0].values[0];
        if Some(first) == self.empty_marker {
            return Ok(Chunk::new(mains.index.clone()));
        }
        Chunk::new(mains.index.clone()).with_column("fridge_1", mains.columns[0].values.clone())
    }
}

/// Counts puts and fails on demand.
struct FailingStore {
    puts: usize,
    fail_on: usize,
}

impl DataStore for FailingStore {
    fn put(&mut self, key: &str, _chunk: &Chunk, _meta: &nilm_disagg::ChunkMetadata) -> Result<()> {
        self.puts += 1;
        if self.puts == self.fail_on {
            return Err(DisaggError::InvalidChunk(format!("refusing {key}")));
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}

#[test]
fn test_base_role_signals_unimplemented_everywhere() {
    let mut d = Bare;
    let c = chunk(0, &[1.0]);
    let group = MeterGroup::new(vec![ElecMeter::site(
        1,
        1,
        Arc::new(mains(vec![c.clone()])),
    )]);
    let mut store = MemoryStore::new();

    assert!(d.train(&group).unwrap_err().is_unimplemented());
    assert!(d
        .train_on_chunk(&c, &TrainingTarget::Site)
        .unwrap_err()
        .is_unimplemented());
    assert!(d.disaggregate_chunk(&c).unwrap_err().is_unimplemented());
    assert!(d
        .disaggregate(&mains(vec![c.clone()]), &mut store)
        .unwrap_err()
        .is_unimplemented());
    assert!(d.import_model(Path::new("model.json")).unwrap_err().is_unimplemented());
    assert!(d.export_model(Path::new("model.json")).unwrap_err().is_unimplemented());
    assert!(store.is_empty());
}

#[test]
fn test_disaggregate_visits_chunks_in_order() {
    let d = Recorder::default();
    let chunks = vec![chunk(0, &[1.0]), chunk(60, &[2.0]), chunk(120, &[3.0])];
    let mut store = MemoryStore::new();

    d.disaggregate(&mains(chunks.clone()), &mut store).unwrap();

    assert_eq!(*d.seen.borrow(), chunks);
    let written: Vec<f64> = store
        .entries()
        .iter()
        .map(|(key, c, _)| {
            assert_eq!(key, "/elec/fridge_1");
            c.column("power/active").unwrap().values[0]
        })
        .collect();
    assert_eq!(written, vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_empty_estimate_is_not_written() {
    let d = Recorder {
        empty_marker: Some(2.0),
        ..Recorder::default()
    };
    let mut store = MemoryStore::new();

    d.disaggregate(
        &mains(vec![chunk(0, &[1.0]), chunk(60, &[2.0]), chunk(120, &[3.0])]),
        &mut store,
    )
    .unwrap();

    assert_eq!(d.seen.borrow().len(), 3);
    assert_eq!(store.len(), 2);
    let firsts: Vec<f64> = store
        .chunks("/elec/fridge_1")
        .iter()
        .map(|c| c.column("power/active").unwrap().values[0])
        .collect();
    assert_eq!(firsts, vec![1.0, 3.0]);
}

#[test]
fn test_disaggregate_stops_at_first_store_error() {
    let d = Recorder::default();
    let mut store = FailingStore { puts: 0, fail_on: 2 };

    let err = d
        .disaggregate(
            &mains(vec![chunk(0, &[1.0]), chunk(60, &[2.0]), chunk(120, &[3.0])]),
            &mut store,
        )
        .unwrap_err();

    assert!(matches!(err, DisaggError::InvalidChunk(_)));
    assert_eq!(d.seen.borrow().len(), 2);
    assert_eq!(store.puts, 2);
}

#[test]
fn test_source_error_propagates() {
    struct Broken;
    impl ChunkSource for Broken {
        fn chunks(&self) -> Box<dyn Iterator<Item = Result<Chunk>> + '_> {
            Box::new(std::iter::once(Err(DisaggError::InvalidChunk("corrupt".into()))))
        }
    }

    let d = Recorder::default();
    let mut store = MemoryStore::new();
    assert!(matches!(
        d.disaggregate(&Broken, &mut store),
        Err(DisaggError::InvalidChunk(_))
    ));
    assert!(d.seen.borrow().is_empty());
}

#[test]
fn test_train_on_chunk_accumulates_energy() {
    let mut d = Recorder::default();
    for values in [[4.0, 6.0], [15.0, 5.0], [10.0, 20.0]] {
        d.train_on_chunk(&chunk(0, &values), &TrainingTarget::Site).unwrap();
    }
    assert_eq!(d.energy, 60.0);
}

#[test]
fn test_train_walks_every_meter() {
    let mut d = Recorder::default();
    let group = MeterGroup::new(vec![
        ElecMeter::site(1, 1, Arc::new(mains(vec![chunk(0, &[10.0])]))),
        ElecMeter::appliance(
            1,
            2,
            ApplianceId::new("fridge", 1),
            Arc::new(mains(vec![chunk(0, &[20.0]), chunk(6, &[30.0])])),
        ),
    ]);
    d.train(&group).unwrap();
    assert_eq!(d.energy, 60.0);
}

#[test]
fn test_untrained_variant_writes_nothing() {
    let d = MeanShare::new();
    let mut store = MemoryStore::new();
    assert!(matches!(
        d.disaggregate(&mains(vec![chunk(0, &[100.0])]), &mut store),
        Err(DisaggError::NotTrained)
    ));
    assert!(store.is_empty());
}

#[test]
fn test_mean_share_end_to_end_with_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.json");

    let group = MeterGroup::new(vec![
        ElecMeter::site(1, 1, Arc::new(mains(vec![chunk(0, &[500.0, 500.0])]))),
        ElecMeter::appliance(
            1,
            2,
            ApplianceId::new("fridge", 1),
            Arc::new(mains(vec![chunk(0, &[100.0, 100.0])])),
        ),
        ElecMeter::appliance(
            1,
            3,
            ApplianceId::new("kettle", 1),
            Arc::new(mains(vec![chunk(0, &[0.0, 600.0])])),
        ),
    ]);

    let mut trained = MeanShare::new();
    trained.train(&group).unwrap();
    trained.export_model(&model_path).unwrap();

    let mut loaded = MeanShare::new();
    loaded.import_model(&model_path).unwrap();

    let stream = mains(vec![chunk(0, &[400.0, 800.0]), chunk(12, &[0.0])]);
    let mut a = MemoryStore::new();
    let mut b = MemoryStore::new();
    trained.disaggregate(&stream, &mut a).unwrap();
    loaded.disaggregate(&stream, &mut b).unwrap();

    assert_eq!(a.entries(), b.entries());
    assert_eq!(a.keys(), vec!["/elec/fridge_1", "/elec/kettle_1"]);
    let fridge = a.chunks("/elec/fridge_1");
    assert_eq!(fridge.len(), 2);
    assert_eq!(fridge[0].column("power/active").unwrap().values, vec![100.0, 200.0]);
    assert_eq!(a.metadata("/elec/kettle_1").unwrap().rows, 3);
}

#[test]
fn test_multi_phase_mains_are_summed() {
    let d = Recorder::default();
    let phases = MeterGroup::new(vec![
        ElecMeter::site(1, 1, Arc::new(mains(vec![chunk(0, &[1.0, 2.0])]))),
        ElecMeter::site(1, 2, Arc::new(mains(vec![chunk(0, &[10.0, 20.0])]))),
    ]);
    let mut store = MemoryStore::new();
    d.disaggregate(&phases, &mut store).unwrap();
    assert_eq!(
        store.chunks("/elec/fridge_1")[0]
            .column("power/active")
            .unwrap()
            .values,
        vec![11.0, 22.0]
    );
}
