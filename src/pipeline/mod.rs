//! Polling batch worker: turns pending image records into confirmed,
//! durably-linked vector index entries.
//!
//! Each cycle pulls the oldest pending records, fans the embedding calls
//! out on a bounded pool, batches the resulting points into one upsert per
//! modality, and then reconciles: a record is marked done only when at
//! least one vector was produced *and* its deterministic point id came back
//! in a confirmed upsert. Vectors without confirmation leave the record
//! pending for a later cycle, so the index and the store can never disagree
//! silently.

use anyhow::Result;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{Config, IndexerConfig};
use crate::db::{Database, ImageRecord};
use crate::embedder::EmbedderClient;
use crate::finalizer::AlbumFinalizer;
use crate::index::points::{deterministic_point_id, l2_normalize};
use crate::index::{IndexClient, Point, PointPayload, PAYLOAD_VERSION};

pub struct Indexer {
    db: Database,
    embedder: EmbedderClient,
    index: IndexClient,
    cfg: Config,
    pool: rayon::ThreadPool,
}

/// What one record produced during the fan-out phase.
#[derive(Debug)]
struct RecordOutcome {
    image_id: String,
    album_id: String,
    point_id: String,
    visual: Option<Vec<f32>>,
    face: Option<Vec<f32>>,
    payload: PointPayload,
    error: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Disposition {
    Done { has_people: bool },
    Failed(String),
    LeavePending,
}

impl Indexer {
    pub fn new(
        db: Database,
        embedder: EmbedderClient,
        index: IndexClient,
        cfg: Config,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.indexer.parallelism.max(1))
            .build()?;
        Ok(Self {
            db,
            embedder,
            index,
            cfg,
            pool,
        })
    }

    /// Main loop. Returns once `cancel` is set; the batch in flight at that
    /// moment finishes first.
    pub fn run(&self, cancel: &AtomicBool) {
        let opts = &self.cfg.indexer;
        info!(
            batch_size = opts.batch_size,
            interval_secs = opts.interval_secs,
            visual = opts.enable_visual,
            face = opts.enable_face,
            parallelism = opts.parallelism,
            "indexer started"
        );

        while !cancel.load(Ordering::SeqCst) {
            match self.process_batch(cancel) {
                Ok(0) => self.idle_sleep(cancel),
                Ok(count) => debug!(count, "batch complete"),
                Err(e) => {
                    // a bad iteration must never take the worker down
                    error!(error = %e, "indexer loop error");
                    self.idle_sleep(cancel);
                }
            }
        }

        info!("indexer stopped");
    }

    /// One poll/process cycle. Returns the number of records pulled.
    pub fn process_batch(&self, cancel: &AtomicBool) -> Result<usize> {
        let opts = &self.cfg.indexer;
        let batch = self.db.pull_pending(opts.batch_size)?;
        if batch.is_empty() {
            return Ok(0);
        }
        info!(count = batch.len(), "pulled pending images");

        let embedder = &self.embedder;
        let outcomes: Vec<RecordOutcome> = self.pool.install(|| {
            batch
                .par_iter()
                .map(|rec| process_record(embedder, opts, rec))
                .collect()
        });

        // one batched upsert per modality instead of one round trip per image
        let mut visual_points = Vec::new();
        let mut face_points = Vec::new();
        for outcome in &outcomes {
            let payload = serde_json::to_value(&outcome.payload)?;
            if let Some(vector) = &outcome.visual {
                visual_points.push(Point {
                    id: outcome.point_id.clone(),
                    vector: vector.clone(),
                    payload: payload.clone(),
                });
            }
            if let Some(vector) = &outcome.face {
                face_points.push(Point {
                    id: outcome.point_id.clone(),
                    vector: vector.clone(),
                    payload,
                });
            }
        }

        let mut confirmed: HashSet<String> = HashSet::new();
        if !visual_points.is_empty() {
            match self.index.upsert(&self.cfg.index.visual_collection, &visual_points) {
                Ok(ids) => {
                    info!(count = ids.len(), "upserted visual points");
                    confirmed.extend(ids);
                }
                Err(e) => error!(error = %e, "visual upsert failed, records stay pending"),
            }
        }
        if !face_points.is_empty() {
            match self.index.upsert(&self.cfg.index.face_collection, &face_points) {
                Ok(ids) => {
                    info!(count = ids.len(), "upserted face points");
                    confirmed.extend(ids);
                }
                Err(e) => error!(error = %e, "face upsert failed, records stay pending"),
            }
        }

        // reconcile record status against what the index actually confirmed
        let mut done = 0;
        let mut failed = 0;
        let mut left_pending = 0;
        let mut touched_albums: BTreeSet<String> = BTreeSet::new();

        for (outcome, disposition) in outcomes.iter().zip(reconcile(&outcomes, &confirmed)) {
            match disposition {
                Disposition::Done { has_people } => {
                    if has_people {
                        self.db.set_has_people(&outcome.image_id, true)?;
                    }
                    self.db.mark_done(&outcome.image_id)?;
                    touched_albums.insert(outcome.album_id.clone());
                    done += 1;
                }
                Disposition::Failed(message) => {
                    self.db.mark_error(&outcome.image_id, &message)?;
                    failed += 1;
                }
                Disposition::LeavePending => {
                    warn!(
                        image = %outcome.image_id,
                        "vectors produced but upsert unconfirmed, leaving pending"
                    );
                    left_pending += 1;
                }
            }
        }
        info!(done, failed, left_pending, "batch reconciled");

        // drained albums get their dominance recomputed right away
        for album_id in touched_albums {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            match self.db.count_pending_in_album(&album_id) {
                Ok(0) => {
                    info!(album = %album_id, "all images done, finalizing album");
                    let finalizer = AlbumFinalizer::new(&self.db, &self.index, &self.cfg);
                    if let Err(e) = finalizer.finalize(&album_id, cancel) {
                        error!(album = %album_id, error = %e, "album finalize failed");
                    }
                }
                Ok(_) => {}
                Err(e) => error!(album = %album_id, error = %e, "pending count failed"),
            }
        }

        Ok(batch.len())
    }

    /// Interruptible sleep between empty polls.
    fn idle_sleep(&self, cancel: &AtomicBool) {
        let deadline =
            std::time::Instant::now() + Duration::from_secs(self.cfg.indexer.interval_secs);
        while std::time::Instant::now() < deadline {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(Duration::from_millis(250));
        }
    }
}

/// Embed one record. Never panics or aborts the batch: failures land in the
/// outcome's `error` field.
fn process_record(
    embedder: &EmbedderClient,
    opts: &IndexerConfig,
    rec: &ImageRecord,
) -> RecordOutcome {
    let mut outcome = RecordOutcome {
        image_id: rec.id.clone(),
        album_id: rec.album_id.clone(),
        point_id: deterministic_point_id(&rec.id),
        visual: None,
        face: None,
        payload: payload_for(rec),
        error: None,
    };

    let path = Path::new(&rec.absolute_path);
    if !path.exists() {
        outcome.error = Some("file not found".to_string());
        return outcome;
    }

    // read once; both modalities retry from this buffer
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            outcome.error = Some(format!("read failed: {e}"));
            return outcome;
        }
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());

    if opts.enable_visual {
        match embedder.embed_image(&bytes, &file_name) {
            Ok(mut vector) if !vector.is_empty() => {
                l2_normalize(&mut vector);
                outcome.visual = Some(vector);
            }
            Ok(_) => {}
            Err(e) => {
                outcome.error = Some(format!("visual embedding failed: {e}"));
                return outcome;
            }
        }
    }

    if opts.enable_face {
        match embedder.embed_face(&bytes, &file_name) {
            Ok(embedding) => {
                let no_faces = embedding.faces_found == Some(0);
                if !embedding.vector.is_empty() && !no_faces {
                    let mut vector = embedding.vector;
                    l2_normalize(&mut vector);
                    outcome.face = Some(vector);
                }
            }
            Err(e) => {
                outcome.error = Some(format!("face embedding failed: {e}"));
                return outcome;
            }
        }
    }

    outcome
}

fn payload_for(rec: &ImageRecord) -> PointPayload {
    PointPayload {
        payload_version: PAYLOAD_VERSION,
        image_id: rec.id.clone(),
        album_id: rec.album_id.clone(),
        subject_id: rec.subject_id.clone(),
        absolute_path: rec.absolute_path.clone(),
        taken_at: rec.taken_at.clone(),
        media_type: rec.media_type.as_str().to_string(),
    }
}

/// Decide each record's fate from what was produced and what the index
/// confirmed. This is the correctness pivot of the whole pipeline.
fn reconcile(outcomes: &[RecordOutcome], confirmed: &HashSet<String>) -> Vec<Disposition> {
    outcomes
        .iter()
        .map(|outcome| {
            if let Some(message) = &outcome.error {
                return Disposition::Failed(message.clone());
            }
            if outcome.visual.is_none() && outcome.face.is_none() {
                return Disposition::Failed("no vectors produced".to_string());
            }
            if confirmed.contains(&outcome.point_id) {
                Disposition::Done {
                    has_people: outcome.face.is_some(),
                }
            } else {
                Disposition::LeavePending
            }
        })
        .collect()
}
