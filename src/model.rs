//! Entity records of the normalized annotation model.
//!
//! These are plain value types mirroring the database tables one to one.
//! They are built fully in memory — ids included — before anything touches
//! storage, so a whole locus bundle (super locus, transcripts, pieces,
//! proteins, features, associations) can cross-reference itself by
//! pre-assigned primary keys. Once flushed by the writer, records are never
//! updated.

use crate::interval::{span_length, Direction};
use crate::types::{FeatureKind, SuperLocusKind, TranscriptKind};

/// Hands out primary keys, one monotonically increasing counter per entity
/// type, scoped to a single import run.
///
/// The allocator is owned by the import controller and passed down the
/// builder call chain explicitly; there is no global state, so one allocator
/// per coordinate would be enough to parallelize coordinates later.
#[derive(Debug, Default)]
pub struct IdAllocator {
    genome: u64,
    coordinate: u64,
    super_locus: u64,
    transcript: u64,
    transcript_piece: u64,
    protein: u64,
    feature: u64,
}

impl IdAllocator {
    pub fn new() -> IdAllocator {
        IdAllocator::default()
    }

    fn bump(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }

    pub fn next_genome(&mut self) -> u64 {
        Self::bump(&mut self.genome)
    }

    pub fn next_coordinate(&mut self) -> u64 {
        Self::bump(&mut self.coordinate)
    }

    pub fn next_super_locus(&mut self) -> u64 {
        Self::bump(&mut self.super_locus)
    }

    pub fn next_transcript(&mut self) -> u64 {
        Self::bump(&mut self.transcript)
    }

    pub fn next_transcript_piece(&mut self) -> u64 {
        Self::bump(&mut self.transcript_piece)
    }

    pub fn next_protein(&mut self) -> u64 {
        Self::bump(&mut self.protein)
    }

    pub fn next_feature(&mut self) -> u64 {
        Self::bump(&mut self.feature)
    }
}

/// One imported genome. The process root of the ownership tree.
#[derive(Debug, Clone)]
pub struct Genome {
    pub id: u64,
    pub species: String,
    pub accession: String,
    pub version: String,
    pub acquired_from: String,
}

/// One reference sequence (chromosome, scaffold, ...) of a genome, together
/// with its uppercased sequence and a SHA-1 content hash. Immutable once
/// created.
#[derive(Debug, Clone)]
pub struct Coordinate {
    pub id: u64,
    pub genome_id: u64,
    pub seqid: String,
    pub length: u64,
    pub sequence: String,
    pub sha1: String,
}

/// One gene-level locus group.
#[derive(Debug, Clone)]
pub struct SuperLocus {
    pub id: u64,
    pub coordinate_id: u64,
    pub kind: SuperLocusKind,
    pub given_name: Option<String>,
    pub direction: Direction,
    pub start: u64,
    pub end: u64,
    /// Set by the builder when the locus is irrecoverably inconsistent
    /// (mixed-strand exons); the resolver then masks the whole extent.
    pub fully_erroneous: bool,
}

/// One transcript of a super locus.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub id: u64,
    pub super_locus_id: u64,
    pub kind: TranscriptKind,
    pub given_name: Option<String>,
    /// Exactly one coding transcript per locus carries this flag (none when
    /// the locus has no coding transcript).
    pub longest: bool,
}

/// One contiguous segment of a transcript. Always exactly one per
/// transcript here; the plural form is reserved for trans-splicing, which
/// is detected and rejected rather than modeled.
#[derive(Debug, Clone)]
pub struct TranscriptPiece {
    pub id: u64,
    pub transcript_id: u64,
    pub given_name: Option<String>,
    pub position: u32,
}

/// One protein product of a coding transcript.
#[derive(Debug, Clone)]
pub struct Protein {
    pub id: u64,
    pub super_locus_id: u64,
    pub given_name: Option<String>,
}

/// An atomic genomic interval: a transcript region, CDS region, derived
/// intron, or one of the error kinds. Coordinates follow the
/// biological-direction convention of [`crate::interval`].
#[derive(Debug, Clone)]
pub struct Feature {
    pub id: u64,
    pub coordinate_id: u64,
    pub kind: FeatureKind,
    pub given_name: Option<String>,
    pub direction: Direction,
    pub start: u64,
    pub end: u64,
    /// `true` while the boundary is as observed in the input; the resolver
    /// sets it `false` (once, never back) to record that the boundary is
    /// synthetic or unconfirmed.
    pub start_is_biological_start: bool,
    pub end_is_biological_end: bool,
    /// Reading-frame offset of the first base; `Some` only for CDS regions.
    pub phase: Option<u8>,
    pub score: Option<f32>,
    pub source: Option<String>,
}

impl Feature {
    /// The feature's length in bases, on either strand.
    pub fn length(&self) -> u64 {
        span_length(self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_allocator_is_per_type_and_monotonic() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next_feature(), 1);
        assert_eq!(ids.next_feature(), 2);
        // counters are independent per entity type
        assert_eq!(ids.next_transcript(), 1);
        assert_eq!(ids.next_super_locus(), 1);
        assert_eq!(ids.next_feature(), 3);
    }

    #[test]
    fn test_feature_length_either_strand() {
        let mut f = Feature {
            id: 1,
            coordinate_id: 1,
            kind: FeatureKind::Intron,
            given_name: None,
            direction: Direction::Plus,
            start: 10,
            end: 35,
            start_is_biological_start: true,
            end_is_biological_end: true,
            phase: None,
            score: None,
            source: None,
        };
        assert_eq!(f.length(), 25);
        f.direction = Direction::Minus;
        f.start = 35;
        f.end = 10;
        assert_eq!(f.length(), 25);
    }
}
