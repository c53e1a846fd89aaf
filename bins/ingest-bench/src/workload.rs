use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use clap::Args;

use ingest_api::{
    ConsumeError, ConsumeFn, Consumer, EmbeddingRecord, IngestError, Producer, ScalarEncoding,
    SubmitEmbeddingRecord, Vector, decode_vector, encode_vector,
};
use ingest_engine::{EngineError, IngestConfig, IngestEngine};
use storage_memory::MemoryStorageFactory;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Ingest(#[from] IngestError),

    #[error("{0}")]
    Args(String),

    #[error("interrupted after {delivered}/{expected} records")]
    Interrupted { delivered: usize, expected: usize },
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct BenchArgs {
    /// Path to ingest.toml (defaults apply if the file is absent)
    #[arg(long, default_value = "ingest.toml", env = "INGEST_CONFIG")]
    pub config: String,

    /// Topic to write to (created if the config does not list it)
    #[arg(long, default_value = "embeddings")]
    pub topic: String,

    /// Number of records to submit
    #[arg(long, default_value_t = 10_000)]
    pub records: usize,

    /// Vector dimension
    #[arg(long, default_value_t = 384)]
    pub dim: usize,

    /// FLOAT32 or INT32
    #[arg(long, default_value = "FLOAT32")]
    pub encoding: String,

    /// Fail every K-th callback invocation to exercise redelivery (0 = never)
    #[arg(long, default_value_t = 0)]
    pub fail_every: usize,

    /// Seed for the synthetic vectors
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

pub fn load_config(path: &str) -> Result<IngestConfig, BenchError> {
    if !Path::new(path).exists() {
        tracing::info!(config = %path, "config file not found, using defaults");
        return Ok(IngestConfig::default());
    }
    Ok(IngestConfig::load(path)?)
}

// ═══════════════════════════════════════════════════════════════
//  Synthetic data
// ═══════════════════════════════════════════════════════════════

/// Xorshift vectors in [-1, 1), scaled to ±1000 for INT32.
fn synthetic_vector(dim: usize, state: &mut u64, encoding: ScalarEncoding) -> Vector {
    let mut next = || {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        (*state as f64 / u64::MAX as f64) as f32 * 2.0 - 1.0
    };
    match encoding {
        ScalarEncoding::Float32 => Vector::Float32((0..dim).map(|_| next()).collect()),
        ScalarEncoding::Int32 => Vector::Int32((0..dim).map(|_| (next() * 1000.0) as i32).collect()),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Consumer
// ═══════════════════════════════════════════════════════════════

/// Counts delivered records and checks each embedding survives the codec.
#[derive(Default)]
struct CountingConsumer {
    fail_every: usize,
    invocations: AtomicUsize,
    failures: AtomicUsize,
    delivered: AtomicUsize,
    payload_bytes: AtomicU64,
}

impl ConsumeFn for CountingConsumer {
    fn consume(&self, records: &[EmbeddingRecord]) -> Result<(), ConsumeError> {
        let n = self.invocations.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(ConsumeError::new(format!("injected failure on invocation {n}")));
        }

        let mut bytes = 0u64;
        for record in records {
            let (Some(embedding), Some(encoding)) = (&record.embedding, record.encoding) else {
                continue;
            };
            let encoded = encode_vector(embedding, encoding)?;
            if decode_vector(&encoded, encoding)? != *embedding {
                return Err(ConsumeError::new(format!(
                    "record {} did not survive {encoding} round trip",
                    record.seq_id
                )));
            }
            bytes += encoded.len() as u64;
        }
        self.payload_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.delivered.fetch_add(records.len(), Ordering::Relaxed);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Run
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Report {
    pub records: usize,
    pub delivered: usize,
    pub invocations: usize,
    pub failures: usize,
    pub payload_bytes: u64,
    pub elapsed: Duration,
}

pub async fn run(config: &IngestConfig, args: &BenchArgs) -> Result<Report, BenchError> {
    let encoding: ScalarEncoding = args.encoding.parse()?;
    if args.dim == 0 {
        return Err(BenchError::Args("--dim must be > 0".into()));
    }
    if args.fail_every == 1 {
        return Err(BenchError::Args("--fail-every 1 would fail every invocation".into()));
    }

    let engine = IngestEngine::bootstrap(config, Arc::new(MemoryStorageFactory))?;
    if !engine.topics().contains(&args.topic) {
        engine.create_topic(&args.topic).await?;
    }

    let consumer = Arc::new(CountingConsumer {
        fail_every: args.fail_every,
        ..Default::default()
    });
    let start = engine.min_seqid();
    let id = engine
        .subscribe(&args.topic, consumer.clone(), Some(start), None, None)
        .await?;

    let started = Instant::now();
    let mut state = args.seed.max(1);
    for i in 0..args.records {
        let record = SubmitEmbeddingRecord::new(format!("bench-{i}"))
            .with_embedding(synthetic_vector(args.dim, &mut state, encoding));
        engine.submit_embedding(&args.topic, record).await?;
    }
    tracing::info!(
        topic = %args.topic,
        records = args.records,
        submit_ms = started.elapsed().as_millis() as u64,
        "submitted records"
    );

    let mut progress = tokio::time::interval(Duration::from_millis(500));
    loop {
        let delivered = consumer.delivered.load(Ordering::Relaxed);
        if delivered >= args.records {
            break;
        }
        tokio::select! {
            _ = progress.tick() => {
                tracing::debug!(delivered, expected = args.records, "waiting for delivery");
            }
            _ = tokio::signal::ctrl_c() => {
                engine.shutdown().await;
                return Err(BenchError::Interrupted { delivered, expected: args.records });
            }
        }
    }
    let elapsed = started.elapsed();

    engine.unsubscribe(id).await?;
    engine.shutdown().await;

    Ok(Report {
        records: args.records,
        delivered: consumer.delivered.load(Ordering::Relaxed),
        invocations: consumer.invocations.load(Ordering::Relaxed),
        failures: consumer.failures.load(Ordering::Relaxed),
        payload_bytes: consumer.payload_bytes.load(Ordering::Relaxed),
        elapsed,
    })
}
