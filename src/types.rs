//! Closed vocabularies for GFF entry classification and stored feature kinds.
//!
//! The GFF type column is an open string in the wild; here it is folded into
//! closed enums matched exhaustively, so recognizing a new type is a
//! compile-time-checked change rather than a string scattered through the
//! pipeline. Anything outside the recognized and ignorable sets aborts the
//! run (see [`crate::reader::gff`]).

use anyhow::bail;

/// Gene-level entry types. One of these opens a new locus group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperLocusKind {
    Gene,
    CodingGene,
    NonCodingGene,
    Pseudogene,
    Operon,
}

impl SuperLocusKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SuperLocusKind::Gene => "gene",
            SuperLocusKind::CodingGene => "coding_gene",
            SuperLocusKind::NonCodingGene => "non_coding_gene",
            SuperLocusKind::Pseudogene => "pseudogene",
            SuperLocusKind::Operon => "operon",
        }
    }
}

impl std::fmt::Display for SuperLocusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transcript-level entry types. One of these opens a transcript bucket
/// within the current locus group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    MRna,
    TRna,
    RRna,
    MiRna,
    SnoRna,
    SnRna,
    SrpRna,
    LncRna,
    PreMiRna,
    RnaseMrpRna,
    Transcript,
    PrimaryTranscript,
    PseudogenicTranscript,
}

impl TranscriptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscriptKind::MRna => "mRNA",
            TranscriptKind::TRna => "tRNA",
            TranscriptKind::RRna => "rRNA",
            TranscriptKind::MiRna => "miRNA",
            TranscriptKind::SnoRna => "snoRNA",
            TranscriptKind::SnRna => "snRNA",
            TranscriptKind::SrpRna => "SRP_RNA",
            TranscriptKind::LncRna => "lnc_RNA",
            TranscriptKind::PreMiRna => "pre_miRNA",
            TranscriptKind::RnaseMrpRna => "RNase_MRP_RNA",
            TranscriptKind::Transcript => "transcript",
            TranscriptKind::PrimaryTranscript => "primary_transcript",
            TranscriptKind::PseudogenicTranscript => "pseudogenic_transcript",
        }
    }
}

impl std::fmt::Display for TranscriptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recognized-but-uninteresting GFF types. These are skipped by the reader:
/// assembly bookkeeping records, ncRNA genes handled elsewhere, and — on
/// purpose — literal UTR, codon and intron records, which are untrusted and
/// always re-derived.
const IGNORABLE_TYPES: &[&str] = &[
    "region",
    "biological_region",
    "chromosome",
    "supercontig",
    "scaffold",
    "match",
    "cDNA_match",
    "ncRNA_gene",
    "ncRNA",
    "scRNA",
    "unconfirmed_transcript",
    "C_gene_segment",
    "V_gene_segment",
    "D_gene_segment",
    "J_gene_segment",
    "vaultRNA_primary_transcript",
    "five_prime_UTR",
    "three_prime_UTR",
    "five_prime_utr",
    "three_prime_utr",
    "start_codon",
    "stop_codon",
    "intron",
    "transcription_start_site",
    "transcription_end_site",
    "tss",
    "tts",
];

/// Classification of one GFF entry's type column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    SuperLocus(SuperLocusKind),
    Transcript(TranscriptKind),
    Exon,
    Cds,
    /// Recognized but skipped by the reader.
    Ignorable,
}

impl EntryKind {
    /// Maps a GFF type string onto the closed vocabulary. Returns [`None`]
    /// for unknown types; the caller decides that this is fatal.
    pub fn classify(ty: &str) -> Option<EntryKind> {
        let kind = match ty {
            "gene" => EntryKind::SuperLocus(SuperLocusKind::Gene),
            "coding_gene" => EntryKind::SuperLocus(SuperLocusKind::CodingGene),
            "non_coding_gene" => EntryKind::SuperLocus(SuperLocusKind::NonCodingGene),
            "pseudogene" => EntryKind::SuperLocus(SuperLocusKind::Pseudogene),
            "operon" => EntryKind::SuperLocus(SuperLocusKind::Operon),
            "mRNA" => EntryKind::Transcript(TranscriptKind::MRna),
            "tRNA" => EntryKind::Transcript(TranscriptKind::TRna),
            "rRNA" => EntryKind::Transcript(TranscriptKind::RRna),
            "miRNA" => EntryKind::Transcript(TranscriptKind::MiRna),
            "snoRNA" => EntryKind::Transcript(TranscriptKind::SnoRna),
            "snRNA" => EntryKind::Transcript(TranscriptKind::SnRna),
            "SRP_RNA" => EntryKind::Transcript(TranscriptKind::SrpRna),
            "lnc_RNA" => EntryKind::Transcript(TranscriptKind::LncRna),
            "pre_miRNA" => EntryKind::Transcript(TranscriptKind::PreMiRna),
            "RNase_MRP_RNA" => EntryKind::Transcript(TranscriptKind::RnaseMrpRna),
            "transcript" => EntryKind::Transcript(TranscriptKind::Transcript),
            "primary_transcript" => EntryKind::Transcript(TranscriptKind::PrimaryTranscript),
            "pseudogenic_transcript" => {
                EntryKind::Transcript(TranscriptKind::PseudogenicTranscript)
            }
            "exon" => EntryKind::Exon,
            "CDS" => EntryKind::Cds,
            other => {
                if IGNORABLE_TYPES.contains(&other) {
                    EntryKind::Ignorable
                } else {
                    return None;
                }
            }
        };
        Some(kind)
    }
}

/// The type of a stored [`Feature`](crate::model::Feature): one of the three
/// biological region kinds, or one of the error kinds the resolver
/// synthesizes to mask a structural inconsistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// The full transcribed extent of one transcript.
    TranscriptRegion,
    /// The translated extent of one coding transcript.
    CdsRegion,
    /// A derived intron (transcript extent minus exons).
    Intron,
    MissingUtr5p,
    MissingUtr3p,
    MissingStartCodon,
    MissingStopCodon,
    WrongPhase5p,
    MismatchedPhase3p,
    OverlappingExons,
    TooShortIntron,
    TruncatedIntron,
    SuperLociOverlapError,
    MismatchingStrands,
}

impl FeatureKind {
    /// `true` for the synthetic error kinds, `false` for the three
    /// biological region kinds.
    pub fn is_error(self) -> bool {
        !matches!(
            self,
            FeatureKind::TranscriptRegion | FeatureKind::CdsRegion | FeatureKind::Intron
        )
    }

    /// The string stored in the database `type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureKind::TranscriptRegion => "transcript_region",
            FeatureKind::CdsRegion => "cds_region",
            FeatureKind::Intron => "intron",
            FeatureKind::MissingUtr5p => "missing_utr_5p",
            FeatureKind::MissingUtr3p => "missing_utr_3p",
            FeatureKind::MissingStartCodon => "missing_start_codon",
            FeatureKind::MissingStopCodon => "missing_stop_codon",
            FeatureKind::WrongPhase5p => "wrong_starting_phase",
            FeatureKind::MismatchedPhase3p => "mismatched_ending_phase",
            FeatureKind::OverlappingExons => "overlapping_exons",
            FeatureKind::TooShortIntron => "too_short_intron",
            FeatureKind::TruncatedIntron => "truncated_intron",
            FeatureKind::SuperLociOverlapError => "super_loci_overlap_error",
            FeatureKind::MismatchingStrands => "mismatching_strands",
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FeatureKind {
    type Err = anyhow::Error;

    /// Parses a database `type` column value back into a [`FeatureKind`].
    /// Used by the exporter when walking an imported database.
    fn from_str(s: &str) -> anyhow::Result<FeatureKind> {
        let kind = match s {
            "transcript_region" => FeatureKind::TranscriptRegion,
            "cds_region" => FeatureKind::CdsRegion,
            "intron" => FeatureKind::Intron,
            "missing_utr_5p" => FeatureKind::MissingUtr5p,
            "missing_utr_3p" => FeatureKind::MissingUtr3p,
            "missing_start_codon" => FeatureKind::MissingStartCodon,
            "missing_stop_codon" => FeatureKind::MissingStopCodon,
            "wrong_starting_phase" => FeatureKind::WrongPhase5p,
            "mismatched_ending_phase" => FeatureKind::MismatchedPhase3p,
            "overlapping_exons" => FeatureKind::OverlappingExons,
            "too_short_intron" => FeatureKind::TooShortIntron,
            "truncated_intron" => FeatureKind::TruncatedIntron,
            "super_loci_overlap_error" => FeatureKind::SuperLociOverlapError,
            "mismatching_strands" => FeatureKind::MismatchingStrands,
            other => bail!("unrecognized feature type in database: {}", other),
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_classify_recognized() {
        assert_eq!(
            EntryKind::classify("gene"),
            Some(EntryKind::SuperLocus(SuperLocusKind::Gene))
        );
        assert_eq!(
            EntryKind::classify("mRNA"),
            Some(EntryKind::Transcript(TranscriptKind::MRna))
        );
        assert_eq!(EntryKind::classify("exon"), Some(EntryKind::Exon));
        assert_eq!(EntryKind::classify("CDS"), Some(EntryKind::Cds));
    }

    #[test]
    fn test_classify_ignorable() {
        // literal UTR / codon / intron records are untrusted and re-derived
        for ty in ["five_prime_UTR", "start_codon", "intron", "region", "tss"] {
            assert_eq!(EntryKind::classify(ty), Some(EntryKind::Ignorable));
        }
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(EntryKind::classify("flying_spaghetti"), None);
        // classification is case sensitive, as GFF3 types are
        assert_eq!(EntryKind::classify("cds"), None);
    }

    #[test]
    fn test_feature_kind_round_trip() {
        for kind in [
            FeatureKind::TranscriptRegion,
            FeatureKind::CdsRegion,
            FeatureKind::Intron,
            FeatureKind::MissingUtr5p,
            FeatureKind::MismatchingStrands,
            FeatureKind::SuperLociOverlapError,
        ] {
            assert_eq!(FeatureKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(FeatureKind::from_str("no_such_kind").is_err());
    }

    #[test]
    fn test_error_kinds() {
        assert!(!FeatureKind::TranscriptRegion.is_error());
        assert!(!FeatureKind::CdsRegion.is_error());
        assert!(!FeatureKind::Intron.is_error());
        assert!(FeatureKind::TooShortIntron.is_error());
        assert!(FeatureKind::MissingUtr5p.is_error());
    }
}
