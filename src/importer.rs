//! Import orchestration: FASTA + GFF3 → validated, strand-normalized
//! SQLite database.
//!
//! The pipeline is single-threaded and synchronous: sequences load first,
//! then the GFF stream is organized per coordinate, each coordinate's loci
//! are built and resolved strand by strand, and the queue flushes at
//! coordinate boundaries. Error resolution never reasons across coordinate
//! boundaries, which keeps coordinates a safe unit for future
//! parallelization.

use crate::builder::{build_locus, LocusGraph};
use crate::config::ImportConfig;
use crate::interval::Direction;
use crate::model::{Coordinate, Genome, IdAllocator};
use crate::organizer::{group_entries, organize_locus};
use crate::reader::{fasta, gff};
use crate::resolver::ErrorResolver;
use crate::writer::{AnnotationDb, InsertionQueue};
use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info};

/// Genome-level metadata recorded with an import.
#[derive(Debug, Clone, Default)]
pub struct GenomeArgs {
    pub species: String,
    pub accession: String,
    pub version: String,
    pub acquired_from: String,
}

/// Drives one import run against one destination database.
pub struct ImportController {
    db: AnnotationDb,
    queue: InsertionQueue,
    ids: IdAllocator,
    config: ImportConfig,
    coordinates: HashMap<String, Coordinate>,
}

impl ImportController {
    /// Opens (or replaces) the destination database and prepares an empty
    /// run: fresh id allocator, fresh queue.
    pub fn new<T: AsRef<Path>>(
        db_path: T,
        config: ImportConfig,
        replace_db: bool,
    ) -> anyhow::Result<ImportController> {
        let db = AnnotationDb::create(db_path, replace_db)?;
        Ok(ImportController {
            db,
            queue: InsertionQueue::new(),
            ids: IdAllocator::new(),
            config,
            coordinates: HashMap::new(),
        })
    }

    /// Imports one genome: sequences, then annotations, then a post-load
    /// `ANALYZE`. On any failure after the sequences have loaded, the
    /// partially written database is renamed with a `.partial` suffix
    /// before the error is re-raised, so a crashed run cannot be mistaken
    /// for a completed one. Consumes the controller; one run per database.
    pub fn add_genome<T: AsRef<Path>>(
        mut self,
        fasta_path: T,
        gff_path: T,
        genome_args: GenomeArgs,
    ) -> anyhow::Result<()> {
        if genome_args.species.is_empty() {
            info!("starting to add an unnamed genome");
        } else {
            info!("starting to add genome: {}", genome_args.species);
        }
        info!("FASTA path: {}", fasta_path.as_ref().display());
        info!("GFF path: {}", gff_path.as_ref().display());

        self.add_sequences(&fasta_path, genome_args)?;

        let outcome = self
            .add_gff(&gff_path)
            .and_then(|()| self.db.analyze());
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                let partial = self.db.mark_partial()?;
                error!(
                    "aborting due to error, attempt so far saved at {} for debugging purposes",
                    partial.display()
                );
                Err(e)
            }
        }
    }

    fn add_sequences<T: AsRef<Path>>(
        &mut self,
        fasta_path: T,
        genome_args: GenomeArgs,
    ) -> anyhow::Result<()> {
        let genome = Genome {
            id: self.ids.next_genome(),
            species: genome_args.species,
            accession: genome_args.accession,
            version: genome_args.version,
            acquired_from: genome_args.acquired_from,
        };
        self.db.insert_genome(&genome)?;

        let coordinates = fasta::load_coordinates(fasta_path, genome.id, &mut self.ids)?;
        self.db.insert_coordinates(&coordinates)?;
        self.coordinates = coordinates
            .into_iter()
            .map(|c| (c.seqid.clone(), c))
            .collect();
        Ok(())
    }

    fn add_gff<T: AsRef<Path>>(&mut self, gff_path: T) -> anyhow::Result<()> {
        info!("starting to parse the GFF file");
        let entries = gff::read_gff_entries(&gff_path)?;
        let batches = group_entries(entries);
        let n_batches = batches.len();

        for (batch_idx, batch) in batches.into_iter().enumerate() {
            let coordinate = self.coordinates.get(&batch.seqid).ok_or_else(|| {
                anyhow!(
                    "GFF seqid {} has no matching sequence in the FASTA input",
                    batch.seqid
                )
            })?;

            let mut groups: Vec<LocusGraph> = Vec::with_capacity(batch.groups.len());
            for group in batch.groups {
                let organized = organize_locus(group).with_context(|| {
                    format!("failed to organize a gene group on {}", batch.seqid)
                })?;
                groups.push(build_locus(organized, coordinate, &mut self.ids)?);
            }
            let n_loci = groups.len();

            // each strand resolves independently; neighbor logic assumes
            // one strand in transcription order
            let (mut plus, mut minus): (Vec<_>, Vec<_>) = groups
                .into_iter()
                .partition(|g| g.super_locus.direction.is_plus());
            ErrorResolver::new(coordinate, Direction::Plus, &self.config)
                .resolve(&mut plus, &mut self.ids);
            ErrorResolver::new(coordinate, Direction::Minus, &self.config)
                .resolve(&mut minus, &mut self.ids);

            for locus in plus.into_iter().chain(minus) {
                self.queue.enqueue_locus(locus);
            }

            let is_final_coord = batch_idx == n_batches - 1;
            if is_final_coord || self.queue.total_size() > self.config.flush_row_threshold {
                self.queue.flush(&mut self.db)?;
            }
            info!(
                "finished importing features from {} super loci from coordinate with \
                 seqid {} ({}/{})",
                n_loci,
                batch.seqid,
                batch_idx + 1,
                n_batches
            );
        }
        Ok(())
    }
}
