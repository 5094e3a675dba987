//! # `store` – Durable Run State
//!
//! Everything a run leaves on disk lives under
//! `<data_dir>/runs/<run_id>/`:
//!
//! ```text
//! meta.json                     run id, config digest, metrics
//! config.json                   the full config as given
//! texts/<sha256>.txt            content-addressed text store
//! events.jsonl                  append-only typed events
//! stats.jsonl                   append-only iteration summaries
//! checkpoints/itNNNNNN.json     whole-state snapshots
//! checkpoints/latest.json       always the freshest complete snapshot
//! ```
//!
//! Checkpoints are written to a temp file, fsync'd and renamed into
//! place; `latest.json` is updated the same way *after* the numbered
//! snapshot.  Stats and events for an iteration are appended before its
//! checkpoint lands, so a reader that sees `latest.json` at iteration N
//! is guaranteed to see events/stats for 1..N.  Event/stats appends are
//! best-effort (no fsync) — losing a tail line costs observability, not
//! resumability.
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::anchors::AnchorManager;
use crate::config::Config;
use crate::elites::{Anchor, Elite};
use crate::embedding::EmbeddingService;
use crate::population::{MapElitesArchive, Population, PopulationStore, pool::CrowdedPool};
use crate::random::StreamSeeds;
use crate::rating::RatingSystem;
use crate::recorder::Event;
use crate::store::schema::{
    AnchorDoc, CheckpointDoc, EventRecord, MemberDoc, MetaDoc, PopulationDoc, StatsRecord,
};

pub mod schema;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store (de)serialisation failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("text '{id}' is not in the text store")]
    MissingText { id: String },
    #[error("run directory is not a valid run: {0}")]
    NotARun(String),
    #[error("no checkpoint found at {0}")]
    NoCheckpoint(PathBuf),
}

/// Content address of a text: SHA-256 over the UTF-8 bytes, hex-encoded.
pub fn text_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// The result of loading a checkpoint back into live state.
#[derive(Debug)]
pub struct LoadedRun {
    pub next_iteration: usize,
    pub population: Population,
    pub anchors: Option<AnchorManager>,
    pub seeds: StreamSeeds,
}

#[derive(Debug)]
pub struct RunStore {
    run_dir: PathBuf,
    run_id: String,
}

impl RunStore {
    /// Creates a fresh run directory and seeds the text store.
    pub fn create(
        data_dir: &Path,
        cfg: &Config,
        seed_text: &str,
        run_id: Option<String>,
    ) -> Result<Self, StoreError> {
        let config_json = serde_json::to_string_pretty(cfg)?;
        let config_digest = text_id(&config_json);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let run_id = run_id.unwrap_or_else(|| format!("run-{now}-{}", &config_digest[..8]));

        let run_dir = data_dir.join("runs").join(&run_id);
        fs::create_dir_all(run_dir.join("texts"))?;
        fs::create_dir_all(run_dir.join("checkpoints"))?;
        fs::write(run_dir.join("config.json"), &config_json)?;

        let meta = MetaDoc {
            run_id: run_id.clone(),
            created_at_unix: now,
            config_digest,
            metrics: cfg.metrics.names.clone(),
        };
        fs::write(run_dir.join("meta.json"), serde_json::to_string_pretty(&meta)?)?;

        let store = Self { run_dir, run_id };
        store.put_text(seed_text)?;
        Ok(store)
    }

    /// Opens an existing run directory.
    pub fn open(run_dir: &Path) -> Result<Self, StoreError> {
        let meta_path = run_dir.join("meta.json");
        if !meta_path.is_file() {
            return Err(StoreError::NotARun(format!(
                "{} has no meta.json",
                run_dir.display()
            )));
        }
        let meta: MetaDoc = serde_json::from_str(&fs::read_to_string(meta_path)?)?;
        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            run_id: meta.run_id,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn texts_dir(&self) -> PathBuf {
        self.run_dir.join("texts")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.run_dir.join("checkpoints")
    }

    pub fn events_path(&self) -> PathBuf {
        self.run_dir.join("events.jsonl")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.run_dir.join("stats.jsonl")
    }

    pub fn latest_checkpoint_path(&self) -> PathBuf {
        self.checkpoints_dir().join("latest.json")
    }

    /// Idempotent content-addressed write; returns the text id.
    pub fn put_text(&self, text: &str) -> Result<String, StoreError> {
        let id = text_id(text);
        let path = self.texts_dir().join(format!("{id}.txt"));
        if !path.is_file() {
            fs::write(path, text)?;
        }
        Ok(id)
    }

    pub fn get_text(&self, id: &str) -> Result<String, StoreError> {
        let path = self.texts_dir().join(format!("{id}.txt"));
        fs::read_to_string(path).map_err(|_| StoreError::MissingText { id: id.to_string() })
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<(), StoreError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    pub fn append_event(&self, iteration: usize, event: &Event) -> Result<(), StoreError> {
        let record = EventRecord {
            iteration,
            event: event.clone(),
        };
        self.append_line(&self.events_path(), &serde_json::to_string(&record)?)
    }

    pub fn append_stats(&self, record: &StatsRecord) -> Result<(), StoreError> {
        self.append_line(&self.stats_path(), &serde_json::to_string(record)?)
    }

    /// Writes the numbered snapshot then refreshes `latest.json`, both
    /// via fsync'd temp-file renames.
    pub fn write_checkpoint(&self, doc: &CheckpointDoc) -> Result<PathBuf, StoreError> {
        let payload = serde_json::to_string_pretty(doc)?;
        let numbered = self
            .checkpoints_dir()
            .join(format!("it{:06}.json", doc.next_iteration));
        self.write_atomic(&numbered, &payload)?;
        self.write_atomic(&self.latest_checkpoint_path(), &payload)?;
        debug!(path = %numbered.display(), "checkpoint written");
        Ok(numbered)
    }

    fn write_atomic(&self, target: &Path, payload: &str) -> Result<(), StoreError> {
        let tmp = target.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(payload.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, target)?;
        Ok(())
    }

    pub fn read_checkpoint(&self, path: &Path) -> Result<CheckpointDoc, StoreError> {
        if !path.is_file() {
            return Err(StoreError::NoCheckpoint(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Reads every stats line currently on disk.
    pub fn read_stats(&self) -> Result<Vec<StatsRecord>, StoreError> {
        let path = self.stats_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for line in fs::read_to_string(path)?.lines() {
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(line)?);
        }
        Ok(out)
    }

    fn member_from_doc(
        &self,
        doc: &MemberDoc,
        rating: &RatingSystem,
        embeddings: &EmbeddingService,
    ) -> Result<Elite, StoreError> {
        let text = self.get_text(&doc.text_id)?;
        // Embeddings are rebuilt through the current service; stored
        // vectors are advisory for external readers only.
        let embedding = embeddings.embed(&text).as_ref().clone();
        Ok(Elite {
            text,
            embedding,
            ratings: rating.from_named(&doc.ratings),
            age: doc.age,
        })
    }

    /// Rebuilds live state from a checkpoint (the latest one unless an
    /// explicit path is given).  The factories supply empty stores and
    /// an empty anchor manager wired to the current config.
    pub fn load_checkpoint(
        &self,
        checkpoint_path: Option<&Path>,
        rating: &RatingSystem,
        embeddings: &EmbeddingService,
        pool_factory: &mut dyn FnMut() -> CrowdedPool,
        archive_factory: &mut dyn FnMut(usize) -> MapElitesArchive,
        anchor_factory: &mut dyn FnMut() -> AnchorManager,
    ) -> Result<LoadedRun, StoreError> {
        let path = checkpoint_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.latest_checkpoint_path());
        let doc = self.read_checkpoint(&path)?;

        let population = match &doc.population {
            PopulationDoc::Pool { members } => {
                let mut pool = pool_factory();
                for member in members {
                    let elite = self.member_from_doc(member, rating, embeddings)?;
                    pool.add(elite);
                }
                Population::Pool(pool)
            }
            PopulationDoc::Archive { islands } => {
                let mut rebuilt = Vec::with_capacity(islands.len());
                for (island_index, island) in islands.iter().enumerate() {
                    let mut archive = archive_factory(island_index);
                    for member in &island.elites {
                        let elite = self.member_from_doc(member, rating, embeddings)?;
                        archive.add(elite);
                    }
                    rebuilt.push(archive);
                }
                Population::Islands(rebuilt)
            }
        };

        let anchors = if doc.anchors.is_empty() {
            None
        } else {
            let mut manager = anchor_factory();
            // Seed anchors first so sampling priority survives resume.
            let mut restored: HashSet<String> = HashSet::new();
            for anchor_doc in doc.anchors.iter().filter(|a| a.seed) {
                self.restore_anchor(&mut manager, anchor_doc, rating, embeddings, &mut restored)?;
            }
            for anchor_doc in doc.anchors.iter().filter(|a| !a.seed) {
                self.restore_anchor(&mut manager, anchor_doc, rating, embeddings, &mut restored)?;
            }
            Some(manager)
        };

        Ok(LoadedRun {
            next_iteration: doc.next_iteration,
            population,
            anchors,
            seeds: doc.rng,
        })
    }

    fn restore_anchor(
        &self,
        manager: &mut AnchorManager,
        doc: &AnchorDoc,
        rating: &RatingSystem,
        embeddings: &EmbeddingService,
        restored: &mut HashSet<String>,
    ) -> Result<(), StoreError> {
        let text = self.get_text(&doc.text_id)?;
        if !restored.insert(text.clone()) {
            return Ok(());
        }
        let embedding = embeddings.embed(&text).as_ref().clone();
        manager.restore(
            Anchor {
                text,
                embedding,
                ratings: rating.from_named(&doc.ratings),
                age: doc.age,
            },
            doc.seed,
        );
        Ok(())
    }
}
