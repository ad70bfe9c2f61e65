//! Batched writes into the SQLite database.
//!
//! Entity records buffer per table in an [`InsertionQueue`] and flush as
//! bulk inserts inside one transaction, in dependency order, so parents are
//! always written before the children referencing their pre-assigned ids.
//! The queue flushes once the buffered row count passes the configured
//! threshold and unconditionally after the last coordinate of a run.

use crate::builder::LocusGraph;
use crate::model::{Coordinate, Feature, Genome, Protein, SuperLocus, Transcript, TranscriptPiece};
use anyhow::{bail, Context};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS genome (
    id INTEGER PRIMARY KEY,
    species TEXT NOT NULL,
    accession TEXT NOT NULL,
    version TEXT NOT NULL,
    acquired_from TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS coordinate (
    id INTEGER PRIMARY KEY,
    genome_id INTEGER NOT NULL REFERENCES genome (id),
    seqid TEXT NOT NULL,
    length INTEGER NOT NULL,
    sequence TEXT NOT NULL,
    sha1 TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS super_locus (
    id INTEGER PRIMARY KEY,
    coordinate_id INTEGER NOT NULL REFERENCES coordinate (id),
    type TEXT NOT NULL,
    given_name TEXT,
    is_plus_strand INTEGER NOT NULL,
    start INTEGER NOT NULL,
    \"end\" INTEGER NOT NULL,
    fully_erroneous INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS transcript (
    id INTEGER PRIMARY KEY,
    super_locus_id INTEGER NOT NULL REFERENCES super_locus (id),
    type TEXT NOT NULL,
    given_name TEXT,
    longest INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS transcript_piece (
    id INTEGER PRIMARY KEY,
    transcript_id INTEGER NOT NULL REFERENCES transcript (id),
    given_name TEXT,
    position INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS protein (
    id INTEGER PRIMARY KEY,
    super_locus_id INTEGER NOT NULL REFERENCES super_locus (id),
    given_name TEXT
);
CREATE TABLE IF NOT EXISTS feature (
    id INTEGER PRIMARY KEY,
    coordinate_id INTEGER NOT NULL REFERENCES coordinate (id),
    type TEXT NOT NULL,
    given_name TEXT,
    is_plus_strand INTEGER NOT NULL,
    start INTEGER NOT NULL,
    \"end\" INTEGER NOT NULL,
    start_is_biological_start INTEGER NOT NULL,
    end_is_biological_end INTEGER NOT NULL,
    phase INTEGER,
    score REAL,
    source TEXT
);
CREATE TABLE IF NOT EXISTS association_transcript_piece_to_feature (
    transcript_piece_id INTEGER NOT NULL REFERENCES transcript_piece (id),
    feature_id INTEGER NOT NULL REFERENCES feature (id)
);
CREATE TABLE IF NOT EXISTS association_protein_to_feature (
    protein_id INTEGER NOT NULL REFERENCES protein (id),
    feature_id INTEGER NOT NULL REFERENCES feature (id)
);
CREATE TABLE IF NOT EXISTS association_transcript_to_protein (
    transcript_id INTEGER NOT NULL REFERENCES transcript (id),
    protein_id INTEGER NOT NULL REFERENCES protein (id)
);
";

/// The destination database: connection, schema bootstrap, and the
/// `.partial` safety net.
#[derive(Debug)]
pub struct AnnotationDb {
    conn: Connection,
    path: PathBuf,
}

impl AnnotationDb {
    /// Creates (or replaces, when `replace` is set) the database at `path`
    /// and bootstraps the schema. Refusing to overwrite an existing
    /// database without the replace flag is an error, not a process exit.
    pub fn create<T: AsRef<Path>>(path: T, replace: bool) -> anyhow::Result<AnnotationDb> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            if replace {
                std::fs::remove_file(&path).with_context(|| {
                    format!("failed to remove existing database at {}", path.display())
                })?;
                info!("removed existing database at {}", path.display());
            } else {
                bail!(
                    "database already existing at {} and --replace-db not set",
                    path.display()
                );
            }
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(AnnotationDb { conn, path })
    }

    pub fn insert_genome(&self, genome: &Genome) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO genome (id, species, accession, version, acquired_from) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                genome.id,
                genome.species,
                genome.accession,
                genome.version,
                genome.acquired_from
            ],
        )?;
        Ok(())
    }

    pub fn insert_coordinates(&mut self, coordinates: &[Coordinate]) -> anyhow::Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO coordinate (id, genome_id, seqid, length, sequence, sha1) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for coordinate in coordinates {
                stmt.execute(params![
                    coordinate.id,
                    coordinate.genome_id,
                    coordinate.seqid,
                    coordinate.length,
                    coordinate.sequence,
                    coordinate.sha1
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Runs `ANALYZE` for hopefully more performant queries downstream.
    pub fn analyze(&self) -> anyhow::Result<()> {
        info!("running ANALYZE on the database");
        self.conn.execute_batch("ANALYZE;")?;
        Ok(())
    }

    /// Renames the database file with a `.partial` suffix so a crashed run
    /// cannot be mistaken for a completed one. Consumes the handle; the
    /// connection is closed first.
    pub fn mark_partial(self) -> anyhow::Result<PathBuf> {
        if let Err((_conn, e)) = self.conn.close() {
            warn!("error closing database before renaming: {}", e);
        }
        let mut partial_path = self.path.clone().into_os_string();
        partial_path.push(".partial");
        let partial_path = PathBuf::from(partial_path);
        std::fs::rename(&self.path, &partial_path).with_context(|| {
            format!(
                "failed to rename {} to {}",
                self.path.display(),
                partial_path.display()
            )
        })?;
        Ok(partial_path)
    }
}

/// Per-table buffers, flushed in dependency order: super_locus, transcript,
/// transcript_piece, protein, feature, then the three association tables.
#[derive(Default)]
pub struct InsertionQueue {
    super_loci: Vec<SuperLocus>,
    transcripts: Vec<Transcript>,
    transcript_pieces: Vec<TranscriptPiece>,
    proteins: Vec<Protein>,
    features: Vec<Feature>,
    /// (feature_id, transcript_piece_id)
    feature_pieces: Vec<(u64, u64)>,
    /// (feature_id, protein_id)
    feature_proteins: Vec<(u64, u64)>,
    /// (transcript_id, protein_id)
    transcript_proteins: Vec<(u64, u64)>,
}

impl InsertionQueue {
    pub fn new() -> InsertionQueue {
        InsertionQueue::default()
    }

    /// Total number of buffered rows across all tables.
    pub fn total_size(&self) -> usize {
        self.super_loci.len()
            + self.transcripts.len()
            + self.transcript_pieces.len()
            + self.proteins.len()
            + self.features.len()
            + self.feature_pieces.len()
            + self.feature_proteins.len()
            + self.transcript_proteins.len()
    }

    /// Buffers a fully resolved locus: every record and every association
    /// row, parents first.
    pub fn enqueue_locus(&mut self, locus: LocusGraph) {
        self.super_loci.push(locus.super_locus);
        for transcript in locus.transcripts {
            let transcript_id = transcript.transcript.id;
            let piece_id = transcript.piece.id;
            self.transcripts.push(transcript.transcript);
            self.transcript_pieces.push(transcript.piece);
            self.feature_pieces.push((transcript.region.id, piece_id));
            self.features.push(transcript.region);

            if let Some(protein) = transcript.protein {
                self.transcript_proteins.push((transcript_id, protein.id));
                if let Some(cds) = transcript.cds {
                    self.feature_proteins.push((cds.feature.id, protein.id));
                    self.feature_pieces.push((cds.feature.id, piece_id));
                    self.features.push(cds.feature);
                }
                self.proteins.push(protein);
            }
            for intron in transcript.introns {
                self.feature_pieces.push((intron.id, piece_id));
                self.features.push(intron);
            }
            for error in transcript.errors {
                self.feature_pieces.push((error.id, piece_id));
                self.features.push(error);
            }
        }
    }

    /// Writes everything buffered so far inside one transaction and clears
    /// the buffers. Returns the number of rows written.
    pub fn flush(&mut self, db: &mut AnnotationDb) -> anyhow::Result<usize> {
        let total = self.total_size();
        if total == 0 {
            return Ok(0);
        }
        let tx = db.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO super_locus \
                 (id, coordinate_id, type, given_name, is_plus_strand, start, \"end\", \
                  fully_erroneous) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for sl in &self.super_loci {
                stmt.execute(params![
                    sl.id,
                    sl.coordinate_id,
                    sl.kind.as_str(),
                    sl.given_name,
                    sl.direction.is_plus(),
                    sl.start,
                    sl.end,
                    sl.fully_erroneous
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO transcript (id, super_locus_id, type, given_name, longest) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for t in &self.transcripts {
                stmt.execute(params![
                    t.id,
                    t.super_locus_id,
                    t.kind.as_str(),
                    t.given_name,
                    t.longest
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO transcript_piece (id, transcript_id, given_name, position) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for piece in &self.transcript_pieces {
                stmt.execute(params![
                    piece.id,
                    piece.transcript_id,
                    piece.given_name,
                    piece.position
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO protein (id, super_locus_id, given_name) VALUES (?1, ?2, ?3)",
            )?;
            for protein in &self.proteins {
                stmt.execute(params![protein.id, protein.super_locus_id, protein.given_name])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO feature \
                 (id, coordinate_id, type, given_name, is_plus_strand, start, \"end\", \
                  start_is_biological_start, end_is_biological_end, phase, score, source) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for f in &self.features {
                stmt.execute(params![
                    f.id,
                    f.coordinate_id,
                    f.kind.as_str(),
                    f.given_name,
                    f.direction.is_plus(),
                    f.start,
                    f.end,
                    f.start_is_biological_start,
                    f.end_is_biological_end,
                    f.phase,
                    f.score,
                    f.source
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO association_transcript_piece_to_feature \
                 (transcript_piece_id, feature_id) VALUES (?1, ?2)",
            )?;
            for (feature_id, piece_id) in &self.feature_pieces {
                stmt.execute(params![piece_id, feature_id])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO association_protein_to_feature (protein_id, feature_id) \
                 VALUES (?1, ?2)",
            )?;
            for (feature_id, protein_id) in &self.feature_proteins {
                stmt.execute(params![protein_id, feature_id])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO association_transcript_to_protein (transcript_id, protein_id) \
                 VALUES (?1, ?2)",
            )?;
            for (transcript_id, protein_id) in &self.transcript_proteins {
                stmt.execute(params![transcript_id, protein_id])?;
            }
        }
        tx.commit()?;

        self.super_loci.clear();
        self.transcripts.clear();
        self.transcript_pieces.clear();
        self.proteins.clear();
        self.features.clear();
        self.feature_pieces.clear();
        self.feature_proteins.clear();
        self.transcript_proteins.clear();

        info!("flushed {} rows to the database", total);
        Ok(total)
    }
}
