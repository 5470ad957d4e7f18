use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, TimestampSecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

/// Seconds between readings.
const SAMPLE_PERIOD: i64 = 6;
/// One day of readings.
const N_SAMPLES: usize = 14_400;
/// 2011-04-18T00:00:00Z
const START: i64 = 1_303_084_800;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Compressor cycling: `on` samples at ~`watts`, then `off` samples idle.
fn fridge(rng: &mut SimpleRng) -> Vec<f64> {
    let (on, off) = (200, 400);
    (0..N_SAMPLES)
        .map(|i| {
            if i % (on + off) < on {
                rng.gauss(90.0, 3.0).max(0.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Short high-power bursts at random times.
fn kettle(rng: &mut SimpleRng) -> Vec<f64> {
    let mut out = vec![0.0; N_SAMPLES];
    let mut i = 0;
    while i < N_SAMPLES {
        i += 300 + (rng.next_f64() * 2000.0) as usize;
        let len = 20 + (rng.next_f64() * 20.0) as usize;
        for v in out.iter_mut().skip(i).take(len) {
            *v = rng.gauss(2400.0, 30.0);
        }
        i += len;
    }
    out
}

/// Always-on load with sensor noise.
fn base_load(rng: &mut SimpleRng) -> Vec<f64> {
    (0..N_SAMPLES).map(|_| rng.gauss(150.0, 10.0).max(0.0)).collect()
}

fn write_meter(path: &Path, timestamps: &[i64], power: &[f64]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Second, Some("UTC".into())),
            false,
        ),
        Field::new("power/active", DataType::Float64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(TimestampSecondArray::from(timestamps.to_vec()).with_timezone("UTC")),
            Arc::new(Float64Array::from(power.to_vec())),
        ],
    )
    .context("Failed to create RecordBatch")?;

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("Failed to create writer")?;
    writer.write(&batch).context("Failed to write batch")?;
    writer.close().context("Failed to close writer")?;
    Ok(())
}

fn main() -> Result<()> {
    let mut rng = SimpleRng::new(42);
    let out_dir = Path::new("sample_data");
    std::fs::create_dir_all(out_dir).context("Failed to create sample_data/")?;

    let timestamps: Vec<i64> = (0..N_SAMPLES as i64)
        .map(|i| START + i * SAMPLE_PERIOD)
        .collect();

    let appliances = [("fridge_1", fridge(&mut rng)), ("kettle_1", kettle(&mut rng))];
    let base = base_load(&mut rng);

    let mut mains = base;
    for (name, power) in &appliances {
        for (m, p) in mains.iter_mut().zip(power) {
            *m += p;
        }
        write_meter(&out_dir.join(format!("{name}.parquet")), &timestamps, power)?;
    }
    write_meter(&out_dir.join("mains.parquet"), &timestamps, &mains)?;

    println!(
        "Wrote {} appliances and mains ({} readings each, every {SAMPLE_PERIOD}s) to {}",
        appliances.len(),
        N_SAMPLES,
        out_dir.display()
    );
    Ok(())
}
