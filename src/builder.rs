//! Lowers one organized locus into the in-memory entity graph.
//!
//! This is where raw GFF geometry becomes the normalized model: one super
//! locus, one transcript + piece + transcript-region feature per bucket,
//! and for coding buckets a protein, a CDS-region feature and the derived
//! introns. Everything is built with pre-assigned ids and handed to the
//! resolver before any of it is written.

use crate::interval::{as_span, IntervalSet};
use crate::model::{
    Coordinate, Feature, IdAllocator, Protein, SuperLocus, Transcript, TranscriptPiece,
};
use crate::organizer::{OrganizedLocus, TranscriptBucket};
use crate::reader::gff::GffEntry;
use crate::types::{EntryKind, FeatureKind};
use anyhow::bail;
use rust_lapper::{Interval, Lapper};
use tracing::warn;

/// A CDS-region feature plus the 3′ phase recorded in the input, which is
/// only needed for the resolver's ending-phase check and is not persisted.
#[derive(Debug, Clone)]
pub struct CdsRegion {
    pub feature: Feature,
    pub phase_3p: u8,
}

/// One transcript of a locus, fully lowered.
#[derive(Debug)]
pub struct TranscriptGraph {
    pub transcript: Transcript,
    pub piece: TranscriptPiece,
    /// The transcript-region feature spanning the full transcribed extent.
    pub region: Feature,
    pub protein: Option<Protein>,
    pub cds: Option<CdsRegion>,
    /// Derived introns, ordered 5′→3′. May contain reversed placeholder
    /// intervals marking exon overlaps until the resolver replaces them
    /// with explicit errors.
    pub introns: Vec<Feature>,
    /// Error features; empty until the resolver runs.
    pub errors: Vec<Feature>,
}

impl TranscriptGraph {
    pub fn is_coding(&self) -> bool {
        self.cds.is_some()
    }
}

/// One built locus: the unit the resolver consumes and the writer flushes.
#[derive(Debug)]
pub struct LocusGraph {
    pub super_locus: SuperLocus,
    pub transcripts: Vec<TranscriptGraph>,
    /// Set by the resolver after it has processed this locus; a second
    /// resolver pass over an already-resolved locus is a no-op.
    pub resolved: bool,
}

/// Builds the entity graph for one organized locus.
pub fn build_locus(
    locus: OrganizedLocus,
    coord: &Coordinate,
    ids: &mut IdAllocator,
) -> anyhow::Result<LocusGraph> {
    let sl_entry = &locus.super_locus;
    let EntryKind::SuperLocus(sl_kind) = sl_entry.kind else {
        bail!("organized locus does not start with a gene-level entry");
    };
    let sl_direction = sl_entry.direction;
    let (sl_start, sl_end) = sl_direction.normalize(sl_entry.start, sl_entry.end);

    let mut super_locus = SuperLocus {
        id: ids.next_super_locus(),
        coordinate_id: coord.id,
        kind: sl_kind,
        given_name: sl_entry.given_id().map(str::to_string),
        direction: sl_direction,
        start: sl_start,
        end: sl_end,
        fully_erroneous: false,
    };

    let mut transcripts = Vec::with_capacity(locus.transcripts.len());
    for bucket in locus.transcripts {
        let graph = build_transcript(bucket, &mut super_locus, coord, ids)?;
        transcripts.push(graph);
    }

    select_longest(&mut transcripts);

    Ok(LocusGraph {
        super_locus,
        transcripts,
        resolved: false,
    })
}

fn build_transcript(
    bucket: TranscriptBucket,
    super_locus: &mut SuperLocus,
    coord: &Coordinate,
    ids: &mut IdAllocator,
) -> anyhow::Result<TranscriptGraph> {
    let t_entry = &bucket.transcript;
    let EntryKind::Transcript(t_kind) = t_entry.kind else {
        bail!("transcript bucket does not hold a transcript-level entry");
    };
    let t_direction = t_entry.direction;
    let t_given_name = t_entry.given_id().map(str::to_string);

    let transcript = Transcript {
        id: ids.next_transcript(),
        super_locus_id: super_locus.id,
        kind: t_kind,
        given_name: t_given_name.clone(),
        longest: false,
    };
    let piece = TranscriptPiece {
        id: ids.next_transcript_piece(),
        transcript_id: transcript.id,
        given_name: t_given_name.clone(),
        position: 0,
    };

    let (region_start, region_end) = t_direction.normalize(t_entry.start, t_entry.end);
    let region = Feature {
        id: ids.next_feature(),
        coordinate_id: coord.id,
        kind: FeatureKind::TranscriptRegion,
        given_name: t_given_name,
        direction: t_direction,
        start: region_start,
        end: region_end,
        start_is_biological_start: true,
        end_is_biological_end: true,
        phase: None,
        score: t_entry.score,
        source: Some(t_entry.source.clone()),
    };

    let mut graph = TranscriptGraph {
        transcript,
        piece,
        region,
        protein: None,
        cds: None,
        introns: Vec::new(),
        errors: Vec::new(),
    };

    if bucket.cds.is_empty() {
        return Ok(graph);
    }

    // a CDS on the wrong strand within one transcript has no clean
    // resolution: fatal, per the error tiers
    for cds_entry in &bucket.cds {
        if cds_entry.direction != t_direction {
            bail!(
                "CDS strand disagrees with transcript strand for {:?} at {}:{}-{}",
                graph.transcript.given_name,
                cds_entry.seqid,
                cds_entry.start,
                cds_entry.end
            );
        }
    }
    if bucket.exons.is_empty() {
        bail!(
            "coding transcript {:?} has no exon entries",
            graph.transcript.given_name
        );
    }

    let protein = Protein {
        id: ids.next_protein(),
        super_locus_id: super_locus.id,
        given_name: protein_id_from_cds_list(&bucket.cds),
    };

    let (phase_5p, phase_3p) = if t_direction.is_plus() {
        (
            bucket.cds.first().and_then(|e| e.phase).unwrap_or(0),
            bucket.cds.last().and_then(|e| e.phase).unwrap_or(0),
        )
    } else {
        (
            bucket.cds.last().and_then(|e| e.phase).unwrap_or(0),
            bucket.cds.first().and_then(|e| e.phase).unwrap_or(0),
        )
    };

    // the first/last CDS entries normally define the translated extent, but
    // partial gene models can end in hanging introns: an exon boundary that
    // coincides with the CDS boundary without reaching the transcript
    // boundary. Extending the CDS to the transcript boundary over-masks via
    // a later error feature instead of misclassifying a partial exon as UTR.
    let mut gff_cds_start = bucket.cds.first().map(|e| e.start).unwrap_or(t_entry.start);
    let mut gff_cds_end = bucket.cds.last().map(|e| e.end).unwrap_or(t_entry.end);
    let gff_exon_start = bucket.exons.first().map(|e| e.start).unwrap_or(0);
    let gff_exon_end = bucket.exons.last().map(|e| e.end).unwrap_or(0);
    if gff_exon_start == gff_cds_start && gff_cds_start != t_entry.start {
        gff_cds_start = t_entry.start;
    }
    if gff_exon_end == gff_cds_end && gff_cds_end != t_entry.end {
        gff_cds_end = t_entry.end;
    }

    let (cds_start, cds_end) = t_direction.normalize(gff_cds_start, gff_cds_end);
    let cds_feature = Feature {
        id: ids.next_feature(),
        coordinate_id: coord.id,
        kind: FeatureKind::CdsRegion,
        given_name: None,
        direction: t_direction,
        start: cds_start,
        end: cds_end,
        start_is_biological_start: true,
        end_is_biological_end: true,
        phase: Some(phase_5p),
        score: t_entry.score,
        source: Some(t_entry.source.clone()),
    };

    graph.introns = derive_introns(&bucket, &graph.region, super_locus, coord, ids, t_entry)?;
    graph.protein = Some(protein);
    graph.cds = Some(CdsRegion {
        feature: cds_feature,
        phase_3p,
    });

    Ok(graph)
}

/// Derives introns by chopping every exon out of the transcript extent; the
/// residual intervals are the introns. Exon collisions produce reversed
/// placeholder introns spanning the overlap, which the resolver later turns
/// into explicit overlapping-exons errors.
///
/// An exon on the wrong strand makes the whole locus irrecoverable: the
/// locus is flagged fully erroneous and intron derivation is abandoned.
fn derive_introns(
    bucket: &TranscriptBucket,
    region: &Feature,
    super_locus: &mut SuperLocus,
    coord: &Coordinate,
    ids: &mut IdAllocator,
    t_entry: &GffEntry,
) -> anyhow::Result<Vec<Feature>> {
    let t_direction = region.direction;
    let mut introns: Vec<Feature> = Vec::new();

    let (region_low, region_high) = as_span(region.start, region.end);
    let mut residual = IntervalSet::new(region_low, region_high);

    let exon_spans: Vec<Interval<u64, usize>> = bucket
        .exons
        .iter()
        .enumerate()
        .map(|(i, e)| Interval {
            start: e.start - 1,
            stop: e.end,
            val: i,
        })
        .collect();
    let exon_lapper = Lapper::new(exon_spans);

    for (i, exon) in bucket.exons.iter().enumerate() {
        if exon.direction != t_direction {
            super_locus.fully_erroneous = true;
            return Ok(Vec::new());
        }
        let (exon_low, exon_high) = (exon.start - 1, exon.end);
        residual.chop(exon_low, exon_high);

        // collisions with previously seen exons collapse into one merged
        // placeholder spanning the shared region, reversed against strand
        let earlier: Vec<&Interval<u64, usize>> = exon_lapper
            .find(exon_low, exon_high)
            .filter(|hit| hit.val < i)
            .collect();
        if !earlier.is_empty() {
            let overlapper_low = earlier.iter().map(|hit| hit.start).min().unwrap_or(exon_low);
            let overlapper_high = earlier.iter().map(|hit| hit.stop).max().unwrap_or(exon_high);
            if earlier.len() != 1 {
                warn!(
                    "handling overlaps of >1 exon (masking as if unioned), but this is a \
                     weird enough sort of error that you should really check what is going \
                     on (around {} {}-{})",
                    coord.seqid, overlapper_low, overlapper_high
                );
            }
            let overlap_low = overlapper_low.max(exon_low);
            let overlap_high = overlapper_high.min(exon_high);
            let (ph_start, ph_end) = if t_direction.is_plus() {
                (overlap_high, overlap_low)
            } else {
                (overlap_low, overlap_high)
            };
            introns.push(Feature {
                id: ids.next_feature(),
                coordinate_id: coord.id,
                kind: FeatureKind::Intron,
                given_name: None,
                direction: t_direction,
                start: ph_start,
                end: ph_end,
                start_is_biological_start: true,
                end_is_biological_end: true,
                phase: None,
                score: t_entry.score,
                source: Some(t_entry.source.clone()),
            });
        }
    }

    for &(low, high) in residual.spans() {
        let (start, end) = if t_direction.is_plus() {
            (low, high)
        } else {
            (high, low)
        };
        introns.push(Feature {
            id: ids.next_feature(),
            coordinate_id: coord.id,
            kind: FeatureKind::Intron,
            given_name: None,
            direction: t_direction,
            start,
            end,
            start_is_biological_start: true,
            end_is_biological_end: true,
            phase: None,
            score: t_entry.score,
            source: Some(t_entry.source.clone()),
        });
    }

    introns.sort_by_key(|f| f.start);
    if !t_direction.is_plus() {
        introns.reverse();
    }
    Ok(introns)
}

/// Resolves the protein id from a transcript's CDS entries: the
/// `protein_id` attribute where present, otherwise the entry's parent
/// reference. An indeterminate result (none, or several distinct ids) is
/// logged and the first id seen wins.
fn protein_id_from_cds_list(cds_entries: &[GffEntry]) -> Option<String> {
    let mut candidates: Vec<&str> = Vec::new();
    for entry in cds_entries {
        let pid = entry
            .attribute("protein_id")
            .or_else(|| entry.parents().first().copied());
        if let Some(pid) = pid {
            if !candidates.contains(&pid) {
                candidates.push(pid);
            }
        }
    }
    if candidates.len() != 1 {
        warn!(
            "no protein_id or more than one protein_id for one transcript: {:?}",
            candidates
        );
    }
    candidates.first().map(|s| s.to_string())
}

/// Flags the longest coding transcript of the locus: maximal CDS span
/// length minus the length of introns overlapping the CDS span, ties broken
/// by encounter order. Non-coding transcripts never participate.
fn select_longest(transcripts: &mut [TranscriptGraph]) {
    let mut max_exon_len: Option<u64> = None;
    let mut longest_idx: Option<usize> = None;
    for (i, t) in transcripts.iter().enumerate() {
        let Some(cds) = &t.cds else { continue };
        let (cds_low, cds_high) = as_span(cds.feature.start, cds.feature.end);
        let intron_lengths: u64 = t
            .introns
            .iter()
            .filter(|intron| {
                let (low, high) = as_span(intron.start, intron.end);
                high.min(cds_high) > low.max(cds_low)
            })
            .map(|intron| intron.length())
            .sum();
        let exon_len = cds.feature.length().saturating_sub(intron_lengths);
        if max_exon_len.map(|m| exon_len > m).unwrap_or(true) {
            max_exon_len = Some(exon_len);
            longest_idx = Some(i);
        }
    }
    if let Some(i) = longest_idx {
        transcripts[i].transcript.longest = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Direction;
    use crate::organizer::organize_locus;
    use crate::types::EntryKind;
    use std::collections::HashMap;

    fn entry(
        ty: &str,
        start: u64,
        end: u64,
        direction: Direction,
        attrs: &[(&str, &str)],
    ) -> GffEntry {
        GffEntry {
            seqid: "chr1".to_string(),
            source: "test".to_string(),
            kind: EntryKind::classify(ty).unwrap(),
            start,
            end,
            score: None,
            direction,
            phase: None,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn coord() -> Coordinate {
        Coordinate {
            id: 1,
            genome_id: 1,
            seqid: "chr1".to_string(),
            length: 1000,
            sequence: String::new(),
            sha1: String::new(),
        }
    }

    fn build(entries: Vec<GffEntry>) -> LocusGraph {
        let organized = organize_locus(entries).unwrap();
        let mut ids = IdAllocator::new();
        build_locus(organized, &coord(), &mut ids).unwrap()
    }

    #[test]
    fn test_plus_strand_intron_derivation() {
        // transcript 101..=300, exons 101..=160 and 201..=300
        let locus = build(vec![
            entry("gene", 101, 300, Direction::Plus, &[("ID", "g1")]),
            entry("mRNA", 101, 300, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 101, 160, Direction::Plus, &[("Parent", "t1")]),
            entry("exon", 201, 300, Direction::Plus, &[("Parent", "t1")]),
            entry("CDS", 121, 260, Direction::Plus, &[("Parent", "t1"), ("protein_id", "p1")]),
        ]);

        assert_eq!(locus.super_locus.start, 100);
        assert_eq!(locus.super_locus.end, 300);

        let t = &locus.transcripts[0];
        assert_eq!(t.region.start, 100);
        assert_eq!(t.region.end, 300);
        assert!(t.is_coding());
        let cds = t.cds.as_ref().unwrap();
        assert_eq!(cds.feature.start, 120);
        assert_eq!(cds.feature.end, 260);

        // exactly the residual between the exons, in normalized coordinates
        assert_eq!(t.introns.len(), 1);
        assert_eq!(t.introns[0].start, 160);
        assert_eq!(t.introns[0].end, 200);
        assert_eq!(t.introns[0].kind, FeatureKind::Intron);
        assert_eq!(t.protein.as_ref().unwrap().given_name.as_deref(), Some("p1"));
    }

    #[test]
    fn test_intron_set_equals_extent_minus_exons() {
        // three exons, two gaps
        let locus = build(vec![
            entry("gene", 1, 500, Direction::Plus, &[("ID", "g1")]),
            entry("mRNA", 1, 500, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 1, 100, Direction::Plus, &[("Parent", "t1")]),
            entry("exon", 151, 300, Direction::Plus, &[("Parent", "t1")]),
            entry("exon", 401, 500, Direction::Plus, &[("Parent", "t1")]),
            entry("CDS", 51, 450, Direction::Plus, &[("Parent", "t1"), ("protein_id", "p1")]),
        ]);
        let t = &locus.transcripts[0];
        let spans: Vec<(u64, u64)> = t.introns.iter().map(|f| (f.start, f.end)).collect();
        assert_eq!(spans, vec![(100, 150), (300, 400)]);
    }

    #[test]
    fn test_minus_strand_introns_are_five_to_three() {
        let locus = build(vec![
            entry("gene", 101, 300, Direction::Minus, &[("ID", "g1")]),
            entry("mRNA", 101, 300, Direction::Minus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 101, 160, Direction::Minus, &[("Parent", "t1")]),
            entry("exon", 181, 220, Direction::Minus, &[("Parent", "t1")]),
            entry("exon", 261, 300, Direction::Minus, &[("Parent", "t1")]),
            entry("CDS", 121, 280, Direction::Minus, &[("Parent", "t1"), ("protein_id", "p1")]),
        ]);

        let t = &locus.transcripts[0];
        assert_eq!(t.region.start, 300);
        assert_eq!(t.region.end, 100);

        // two introns, ordered 5'->3' on the minus strand, each start > end
        assert_eq!(t.introns.len(), 2);
        assert_eq!((t.introns[0].start, t.introns[0].end), (260, 220));
        assert_eq!((t.introns[1].start, t.introns[1].end), (180, 160));
        for intron in &t.introns {
            assert!(intron.start > intron.end);
        }
    }

    #[test]
    fn test_hanging_intron_correction() {
        // first exon boundary coincides with the CDS start but not the
        // transcript start: the CDS is extended out to the transcript start
        let locus = build(vec![
            entry("gene", 1, 400, Direction::Plus, &[("ID", "g1")]),
            entry("mRNA", 1, 400, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 101, 200, Direction::Plus, &[("Parent", "t1")]),
            entry("exon", 301, 400, Direction::Plus, &[("Parent", "t1")]),
            entry("CDS", 101, 350, Direction::Plus, &[("Parent", "t1"), ("protein_id", "p1")]),
        ]);
        let cds = locus.transcripts[0].cds.as_ref().unwrap();
        assert_eq!(cds.feature.start, 0);
        assert_eq!(cds.feature.end, 350);
    }

    #[test]
    fn test_mixed_strand_exon_flags_locus_fully_erroneous() {
        let locus = build(vec![
            entry("gene", 1, 300, Direction::Plus, &[("ID", "g1")]),
            entry("mRNA", 1, 300, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 1, 100, Direction::Plus, &[("Parent", "t1")]),
            entry("exon", 201, 300, Direction::Minus, &[("Parent", "t1")]),
            entry("CDS", 1, 300, Direction::Plus, &[("Parent", "t1"), ("protein_id", "p1")]),
        ]);
        assert!(locus.super_locus.fully_erroneous);
        // intron derivation was abandoned
        assert!(locus.transcripts[0].introns.is_empty());
    }

    #[test]
    fn test_mixed_strand_cds_is_fatal() {
        let organized = organize_locus(vec![
            entry("gene", 1, 300, Direction::Plus, &[("ID", "g1")]),
            entry("mRNA", 1, 300, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 1, 300, Direction::Plus, &[("Parent", "t1")]),
            entry("CDS", 1, 300, Direction::Minus, &[("Parent", "t1")]),
        ])
        .unwrap();
        let mut ids = IdAllocator::new();
        let err = build_locus(organized, &coord(), &mut ids).unwrap_err();
        assert!(err.to_string().contains("CDS strand disagrees"));
    }

    #[test]
    fn test_overlapping_exons_produce_reversed_placeholder() {
        let locus = build(vec![
            entry("gene", 1, 300, Direction::Plus, &[("ID", "g1")]),
            entry("mRNA", 1, 300, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 1, 120, Direction::Plus, &[("Parent", "t1")]),
            entry("exon", 101, 300, Direction::Plus, &[("Parent", "t1")]),
            entry("CDS", 1, 300, Direction::Plus, &[("Parent", "t1"), ("protein_id", "p1")]),
        ]);
        let t = &locus.transcripts[0];
        // one placeholder spanning the overlap 100..120, reversed on plus
        assert_eq!(t.introns.len(), 1);
        assert_eq!((t.introns[0].start, t.introns[0].end), (120, 100));
        assert!(!t.region.direction.is_transcription_order(t.introns[0].start, t.introns[0].end));
    }

    #[test]
    fn test_longest_selection_first_seen_wins_ties() {
        let locus = build(vec![
            entry("gene", 1, 400, Direction::Plus, &[("ID", "g1")]),
            // non-coding first: never longest
            entry("tRNA", 1, 400, Direction::Plus, &[("ID", "t0"), ("Parent", "g1")]),
            entry("exon", 1, 400, Direction::Plus, &[("Parent", "t0")]),
            // two coding transcripts with identical exonic CDS length
            entry("mRNA", 1, 300, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 1, 300, Direction::Plus, &[("Parent", "t1")]),
            entry("CDS", 1, 300, Direction::Plus, &[("Parent", "t1"), ("protein_id", "p1")]),
            entry("mRNA", 101, 400, Direction::Plus, &[("ID", "t2"), ("Parent", "g1")]),
            entry("exon", 101, 400, Direction::Plus, &[("Parent", "t2")]),
            entry("CDS", 101, 400, Direction::Plus, &[("Parent", "t2"), ("protein_id", "p2")]),
        ]);
        let longest: Vec<bool> = locus
            .transcripts
            .iter()
            .map(|t| t.transcript.longest)
            .collect();
        assert_eq!(longest, vec![false, true, false]);
    }

    #[test]
    fn test_longest_subtracts_coding_introns() {
        let locus = build(vec![
            entry("gene", 1, 1000, Direction::Plus, &[("ID", "g1")]),
            // t1: long CDS span but a big intron inside it
            entry("mRNA", 1, 500, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 1, 100, Direction::Plus, &[("Parent", "t1")]),
            entry("exon", 401, 500, Direction::Plus, &[("Parent", "t1")]),
            entry("CDS", 1, 500, Direction::Plus, &[("Parent", "t1"), ("protein_id", "p1")]),
            // t2: shorter CDS span, no intron: more coding sequence overall
            entry("mRNA", 501, 800, Direction::Plus, &[("ID", "t2"), ("Parent", "g1")]),
            entry("exon", 501, 800, Direction::Plus, &[("Parent", "t2")]),
            entry("CDS", 501, 800, Direction::Plus, &[("Parent", "t2"), ("protein_id", "p2")]),
        ]);
        let longest: Vec<bool> = locus
            .transcripts
            .iter()
            .map(|t| t.transcript.longest)
            .collect();
        // t1 scores 500 - 300 = 200, t2 scores 300
        assert_eq!(longest, vec![false, true]);
    }

    #[test]
    fn test_no_coding_transcript_no_longest() {
        let locus = build(vec![
            entry("gene", 1, 100, Direction::Plus, &[("ID", "g1")]),
            entry("tRNA", 1, 100, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 1, 100, Direction::Plus, &[("Parent", "t1")]),
        ]);
        assert!(locus.transcripts.iter().all(|t| !t.transcript.longest));
    }

    #[test]
    fn test_protein_id_falls_back_to_parent() {
        let locus = build(vec![
            entry("gene", 1, 100, Direction::Plus, &[("ID", "g1")]),
            entry("mRNA", 1, 100, Direction::Plus, &[("ID", "t1"), ("Parent", "g1")]),
            entry("exon", 1, 100, Direction::Plus, &[("Parent", "t1")]),
            entry("CDS", 1, 100, Direction::Plus, &[("Parent", "t1")]),
        ]);
        let protein = locus.transcripts[0].protein.as_ref().unwrap();
        assert_eq!(protein.given_name.as_deref(), Some("t1"));
    }
}
