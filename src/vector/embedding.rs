//! Embedding providers.
//!
//! The engine treats the model as a black box `text -> Vec<f32>`. Providers
//! are constructed explicitly and injected, so tests can substitute a fake.
//! Every provider the engine calls is wrapped in a [`TimedEmbedder`], which
//! owns input validation and the per-call timeout.

use crate::error::{EngineError, EngineResult};
use crate::vector::{VECTOR_DIMENSION_384, VectorDimension, ensure_finite};
use crossbeam_channel::{RecvTimeoutError, SendTimeoutError, Sender};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default bound on a single embedding call.
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(10);

/// Trait for turning text into a fixed-length vector.
///
/// Implementations must be thread-safe; the engine may call `embed` from
/// worker threads.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Dimension of the vectors this provider produces.
    fn dimension(&self) -> VectorDimension;

    /// Human-readable model identifier, persisted in store metadata.
    fn model_name(&self) -> String;
}

/// FastEmbed implementation, AllMiniLML6V2 unless configured otherwise.
pub struct FastEmbedProvider {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: VectorDimension,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("model", &"<TextEmbedding>")
            .finish()
    }
}

impl FastEmbedProvider {
    /// Load (downloading on first use) the named model into `cache_dir`.
    ///
    /// # Errors
    /// `Config` for an unknown model name, `EmbeddingUnavailable` if the
    /// model cannot be initialized.
    pub fn new(model_name: &str, cache_dir: &Path, show_progress: bool) -> EngineResult<Self> {
        let model = parse_embedding_model(model_name)?;

        let has_cached_models = cache_dir.exists()
            && cache_dir
                .read_dir()
                .is_ok_and(|mut entries| entries.any(|_| true));
        if has_cached_models {
            tracing::info!("Loading embedding model {model_name} from cache");
        } else {
            tracing::info!("Downloading embedding model {model_name} (first time only)");
        }

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(show_progress),
        )
        .map_err(|e| {
            EngineError::unavailable(format!(
                "failed to initialize embedding model {model_name}: {e}"
            ))
        })?;

        // Probe once so the dimension reflects what the model really emits
        let probe = text_model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| EngineError::unavailable(format!("model probe failed: {e}")))?;
        let width = probe
            .into_iter()
            .next()
            .map_or(VECTOR_DIMENSION_384, |v| v.len());
        let dimension = VectorDimension::new(width)?;

        Ok(Self {
            model: Mutex::new(text_model),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let embeddings = self
            .model
            .lock()
            .map_err(|_| EngineError::MutexPoisoned)?
            .embed(vec![text], None)
            .map_err(|e| EngineError::unavailable(format!("failed to generate embedding: {e}")))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::unavailable("model returned no embedding"))
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}

/// Map a configured model name onto a fastembed model.
pub fn parse_embedding_model(name: &str) -> EngineResult<EmbeddingModel> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "ParaphraseMLMiniLML12V2" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => Err(EngineError::Config {
            reason: format!(
                "unknown embedding model '{other}'. Supported: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, ParaphraseMLMiniLML12V2, MultilingualE5Small"
            ),
        }),
    }
}

/// Text embedded for a record: its title and description.
#[must_use]
pub fn record_text(title: &str, description: &str) -> String {
    format!("{}\n{}", title.trim(), description.trim())
        .trim()
        .to_string()
}

/// Requests that may wait behind the one in flight before senders block.
const EMBED_QUEUE_DEPTH: usize = 8;

struct EmbedJob {
    text: String,
    deadline: Instant,
    reply: Sender<EngineResult<Vec<f32>>>,
}

/// Wraps a provider with validation and a bounded wait.
///
/// Calls are served by one long-lived worker thread fed through a bounded
/// queue. A caller that gets no answer before its deadline receives
/// `EmbeddingUnavailable`; a hung provider therefore ties up that single
/// worker and never more threads. Jobs whose deadline passed while queued
/// are skipped. No retries are attempted.
pub struct TimedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    jobs: Sender<EmbedJob>,
    timeout: Duration,
}

impl TimedEmbedder {
    /// Start the worker for `inner`. It exits once the embedder is dropped.
    pub fn new(inner: Arc<dyn EmbeddingProvider>, timeout: Duration) -> EngineResult<Self> {
        let (jobs, queue) = crossbeam_channel::bounded::<EmbedJob>(EMBED_QUEUE_DEPTH);
        let provider = Arc::clone(&inner);
        std::thread::Builder::new()
            .name("civicsim-embed".to_string())
            .spawn(move || {
                for job in queue {
                    if Instant::now() >= job.deadline {
                        continue;
                    }
                    // Receiver may be gone after a timeout
                    let _ = job.reply.send(provider.embed(&job.text));
                }
            })
            .map_err(|e| EngineError::unavailable(format!("failed to spawn embed worker: {e}")))?;

        Ok(Self {
            inner,
            jobs,
            timeout,
        })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timed_out(&self) -> EngineError {
        tracing::warn!(
            "Embedding call exceeded {}ms, giving up",
            self.timeout.as_millis()
        );
        EngineError::unavailable(format!("timed out after {}ms", self.timeout.as_millis()))
    }
}

impl EmbeddingProvider for TimedEmbedder {
    fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::invalid("text", "cannot embed empty text"));
        }

        let deadline = Instant::now() + self.timeout;
        let (reply, result) = crossbeam_channel::bounded(1);
        let job = EmbedJob {
            text: text.to_string(),
            deadline,
            reply,
        };
        match self.jobs.send_deadline(job, deadline) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => return Err(self.timed_out()),
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(EngineError::unavailable("embed worker has stopped"));
            }
        }

        let vector = match result.recv_deadline(deadline) {
            Ok(Ok(vector)) => vector,
            Ok(Err(err @ EngineError::EmbeddingUnavailable { .. })) => return Err(err),
            Ok(Err(err)) => return Err(EngineError::unavailable(err.to_string())),
            Err(RecvTimeoutError::Timeout) => return Err(self.timed_out()),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(EngineError::unavailable(
                    "embed worker exited without a result",
                ));
            }
        };

        if vector.is_empty() {
            return Err(EngineError::unavailable("provider returned an empty vector"));
        }
        ensure_finite(&vector)
            .map_err(|e| EngineError::unavailable(format!("provider returned {e}")))?;
        Ok(vector)
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn model_name(&self) -> String {
        self.inner.model_name()
    }
}

/// Mock embedding provider for testing.
///
/// Produces deterministic unit vectors keyed on a few civic terms.
#[cfg(test)]
pub struct MockEmbeddingProvider {
    dimension: VectorDimension,
}

#[cfg(test)]
impl MockEmbeddingProvider {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dim).expect("non-zero test dimension"),
        }
    }
}

#[cfg(test)]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.1; dim];
        let text = text.to_lowercase();

        if text.contains("pothole") && dim > 1 {
            embedding[0] = 0.9;
            embedding[1] = 0.8;
        }
        if text.contains("light") && dim > 3 {
            embedding[2] = 0.85;
            embedding[3] = 0.75;
        }
        if text.contains("water") && dim > 5 {
            embedding[4] = 0.8;
            embedding[5] = 0.7;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        for val in &mut embedding {
            *val /= magnitude;
        }
        Ok(embedding)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> String {
        "mock".to_string()
    }
}
