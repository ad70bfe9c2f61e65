//! Structural error detection and masking.
//!
//! The resolver consumes the built loci of one coordinate *and one strand*,
//! ordered 5′→3′ in transcription order, and annotates them with error
//! features. Biological features are never deleted (the one exception being
//! invalid placeholder introns); every inconsistency becomes an additional
//! feature row, so consumers can include or exclude masked spans without
//! re-running validation.
//!
//! One resolver instance serves one import run. Loci carry a `resolved`
//! flag; re-running `resolve` over already-resolved loci is a documented
//! no-op, not an accident.

use crate::builder::{LocusGraph, TranscriptGraph};
use crate::config::ImportConfig;
use crate::interval::{span_length, Direction};
use crate::model::{Coordinate, Feature, IdAllocator, SuperLocus};
use crate::types::FeatureKind;
use tracing::{error, info, warn};

const START_CODON: &str = "ATG";
const STOP_CODONS: [&str; 3] = ["TAA", "TAG", "TGA"];
// reverse-complemented forms, read directly off the stored plus-strand text
const START_CODON_RC: &str = "CAT";
const STOP_CODONS_RC: [&str; 3] = ["TTA", "CTA", "TCA"];

/// Relationship between a locus and its immediately preceding neighbor on
/// the same strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NeighborStatus {
    /// No overlap in any way.
    Normal,
    /// The loci overlap but neither side carries a UTR error at the edge.
    Overlap,
    /// The locus 5′ of the overlap has a missing-3′-UTR error.
    OverlapError5p,
    /// The locus 3′ of the overlap has a missing-5′-UTR error.
    OverlapError3p,
    OverlapErrorBoth,
    /// The locus is fully contained in its predecessor.
    Nested,
    NestedError5p,
    NestedError3p,
    NestedErrorBoth,
}

impl NeighborStatus {
    fn as_str(self) -> &'static str {
        match self {
            NeighborStatus::Normal => "normal",
            NeighborStatus::Overlap => "overlap",
            NeighborStatus::OverlapError5p => "overlap_error_5p",
            NeighborStatus::OverlapError3p => "overlap_error_3p",
            NeighborStatus::OverlapErrorBoth => "overlap_error_both",
            NeighborStatus::Nested => "nested",
            NeighborStatus::NestedError5p => "nested_error_5p",
            NeighborStatus::NestedError3p => "nested_error_3p",
            NeighborStatus::NestedErrorBoth => "nested_error_both",
        }
    }

    fn is_normal(self) -> bool {
        self == NeighborStatus::Normal
    }

    fn is_nested(self) -> bool {
        matches!(
            self,
            NeighborStatus::Nested
                | NeighborStatus::NestedError5p
                | NeighborStatus::NestedError3p
                | NeighborStatus::NestedErrorBoth
        )
    }
}

/// Which side of the anchor entity an error mask extends from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    FiveP,
    ThreeP,
}

/// The entity an overlapping error is anchored on: the mask runs from this
/// entity's facing boundary out to the computed border point, and a Feature
/// anchor gets its facing boundary flag set not-biological.
#[derive(Debug, Clone, Copy)]
enum ErrAnchor {
    /// The current transcript's CDS-region feature.
    Cds,
    /// One of the current transcript's introns, by index.
    Intron(usize),
    /// The preceding super locus (no feature flags to mark).
    PrevLocus,
    /// The current super locus (no feature flags to mark).
    SelfLocus,
}

/// Detects and masks structural inconsistencies for the loci of one
/// coordinate and strand.
pub struct ErrorResolver<'a> {
    coord: &'a Coordinate,
    direction: Direction,
    min_intron_length: u64,
}

impl<'a> ErrorResolver<'a> {
    pub fn new(coord: &'a Coordinate, direction: Direction, config: &ImportConfig) -> Self {
        ErrorResolver {
            coord,
            direction,
            min_intron_length: config.minimum_intron_length,
        }
    }

    /// Runs every check over the given loci, sorting them into
    /// transcription order first. Already-resolved loci are skipped, so a
    /// second invocation changes nothing.
    pub fn resolve(&self, groups: &mut Vec<LocusGraph>, ids: &mut IdAllocator) {
        if groups.is_empty() {
            return;
        }
        if self.direction.is_plus() {
            groups.sort_by_key(|g| g.super_locus.start);
        } else {
            groups.sort_by_key(|g| std::cmp::Reverse(g.super_locus.start));
        }

        for i in 0..groups.len() {
            if groups[i].resolved {
                continue;
            }

            // an irrecoverable locus is masked in full, nothing finer runs
            if groups[i].super_locus.fully_erroneous {
                let (start, end) = (groups[i].super_locus.start, groups[i].super_locus.end);
                if groups[i].transcripts.is_empty() {
                    error!(
                        "fully erroneous locus {:?} has no transcript to attach its mask to",
                        groups[i].super_locus.given_name
                    );
                } else {
                    self.add_error(groups, i, 0, start, end, FeatureKind::MismatchingStrands, ids);
                }
                continue;
            }

            if groups[i].transcripts.is_empty() {
                error!(
                    "{:?} is a gene without any transcripts; this will not be masked",
                    groups[i].super_locus.given_name
                );
            }

            for ti in 0..groups[i].transcripts.len() {
                if groups[i].transcripts[ti].is_coding() {
                    self.check_transcript(groups, i, ti, ids);
                }
            }
        }

        // errors running against transcription order are artifacts of loci
        // resolved out of order due to overlap; they were needed above and
        // can only be dropped now
        self.remove_backwards_errors(groups);

        for group in groups.iter_mut() {
            group.resolved = true;
        }
    }

    fn check_transcript(
        &self,
        groups: &mut [LocusGraph],
        i: usize,
        ti: usize,
        ids: &mut IdAllocator,
    ) {
        let Some((cds_start, cds_end, phase_5p, phase_3p)) =
            groups[i].transcripts[ti].cds.as_ref().map(|cds| {
                (
                    cds.feature.start,
                    cds.feature.end,
                    cds.feature.phase.unwrap_or(0),
                    cds.phase_3p,
                )
            })
        else {
            return;
        };
        let (tf_start, tf_end) = {
            let region = &groups[i].transcripts[ti].region;
            (region.start, region.end)
        };

        // implicit UTR ranges missing entirely
        if cds_start == tf_start {
            self.add_overlapping_error(
                groups,
                i,
                ti,
                ErrAnchor::Cds,
                Side::FiveP,
                FeatureKind::MissingUtr5p,
                false,
                true,
                ids,
            );
        }
        if cds_end == tf_end {
            self.add_overlapping_error(
                groups,
                i,
                ti,
                ErrAnchor::Cds,
                Side::ThreeP,
                FeatureKind::MissingUtr3p,
                false,
                true,
                ids,
            );
        }

        if !has_start_codon(&self.coord.sequence, cds_start, self.direction) {
            self.add_overlapping_error(
                groups,
                i,
                ti,
                ErrAnchor::Cds,
                Side::FiveP,
                FeatureKind::MissingStartCodon,
                false,
                false,
                ids,
            );
        }
        if !has_stop_codon(&self.coord.sequence, cds_end, self.direction) {
            self.add_overlapping_error(
                groups,
                i,
                ti,
                ErrAnchor::Cds,
                Side::ThreeP,
                FeatureKind::MissingStopCodon,
                false,
                false,
                ids,
            );
        }

        if phase_5p != 0 {
            self.add_overlapping_error(
                groups,
                i,
                ti,
                ErrAnchor::Cds,
                Side::FiveP,
                FeatureKind::WrongPhase5p,
                false,
                false,
                ids,
            );
        }

        // the locus may overlap its predecessor while this transcript also
        // carries a UTR error at the shared edge
        if i > 0 {
            let status = self.neighbor_status(groups, i - 1, i);
            if !status.is_normal() {
                match status {
                    NeighborStatus::OverlapError5p | NeighborStatus::OverlapErrorBoth => {
                        self.add_overlapping_error(
                            groups,
                            i,
                            ti,
                            ErrAnchor::PrevLocus,
                            Side::ThreeP,
                            FeatureKind::SuperLociOverlapError,
                            true,
                            false,
                            ids,
                        );
                    }
                    NeighborStatus::OverlapError3p => {
                        self.add_overlapping_error(
                            groups,
                            i,
                            ti,
                            ErrAnchor::SelfLocus,
                            Side::FiveP,
                            FeatureKind::SuperLociOverlapError,
                            true,
                            false,
                            ids,
                        );
                    }
                    NeighborStatus::NestedError5p
                    | NeighborStatus::NestedError3p
                    | NeighborStatus::NestedErrorBoth => {
                        // a single ambiguous boundary cannot unambiguously
                        // partition nested genes; the already-present UTR
                        // errors are necessarily artifacts of the nesting
                        // and get removed instead
                        groups[i].transcripts[ti].errors.retain(|e| {
                            !matches!(
                                e.kind,
                                FeatureKind::MissingUtr5p | FeatureKind::MissingUtr3p
                            )
                        });
                    }
                    _ => {}
                }
                self.log_neighbor_status(
                    &groups[i - 1].super_locus,
                    &groups[i].super_locus,
                    status,
                );
            }
        }

        // the recorded ending phase must match the leftover bases of the
        // final coding exon; only meaningful when introns exist
        if !groups[i].transcripts[ti].introns.is_empty() {
            let three_p_start =
                self.three_p_cds_start(&groups[i].transcripts[ti], cds_start, cds_end);
            let len_3p_exon = span_length(cds_end, three_p_start);
            if u64::from(phase_3p) != len_3p_exon % 3 {
                self.add_overlapping_error(
                    groups,
                    i,
                    ti,
                    ErrAnchor::Cds,
                    Side::ThreeP,
                    FeatureKind::MismatchedPhase3p,
                    false,
                    false,
                    ids,
                );
            }
        }

        // reversed placeholders mark exon overlaps; too-short introns are
        // masked in place
        let n_introns = groups[i].transcripts[ti].introns.len();
        let mut faulty: Vec<usize> = Vec::new();
        for j in 0..n_introns {
            let (istart, iend) = {
                let intron = &groups[i].transcripts[ti].introns[j];
                (intron.start, intron.end)
            };
            if !self.direction.is_transcription_order(istart, iend) {
                let error_start = if j > 0 {
                    groups[i].transcripts[ti].introns[j - 1].end
                } else {
                    tf_start
                };
                let error_end = if j < n_introns - 1 {
                    groups[i].transcripts[ti].introns[j + 1].start
                } else {
                    tf_end
                };
                self.add_error(
                    groups,
                    i,
                    ti,
                    error_start,
                    error_end,
                    FeatureKind::OverlappingExons,
                    ids,
                );
                faulty.push(j);
            } else if span_length(istart, iend) < self.min_intron_length {
                self.add_error(
                    groups,
                    i,
                    ti,
                    istart,
                    iend,
                    FeatureKind::TooShortIntron,
                    ids,
                );
            }
        }
        // the faulty placeholders are not kept; the error is descriptive
        // enough on its own
        for &j in faulty.iter().rev() {
            groups[i].transcripts[ti].introns.remove(j);
        }

        // finally, introns can be partial at a transcript boundary
        for j in 0..groups[i].transcripts[ti].introns.len() {
            let (istart, iend) = {
                let intron = &groups[i].transcripts[ti].introns[j];
                (intron.start, intron.end)
            };
            if istart == tf_start {
                self.add_overlapping_error(
                    groups,
                    i,
                    ti,
                    ErrAnchor::Intron(j),
                    Side::FiveP,
                    FeatureKind::TruncatedIntron,
                    false,
                    false,
                    ids,
                );
            }
            if iend == tf_end {
                self.add_overlapping_error(
                    groups,
                    i,
                    ti,
                    ErrAnchor::Intron(j),
                    Side::ThreeP,
                    FeatureKind::TruncatedIntron,
                    false,
                    false,
                    ids,
                );
            }
        }
    }

    /// Classifies the relationship between `groups[pi]` and the following
    /// `groups[i]`.
    fn neighbor_status(&self, groups: &[LocusGraph], pi: usize, i: usize) -> NeighborStatus {
        let prev = &groups[pi].super_locus;
        let sl = &groups[i].super_locus;

        let overlapping = if self.direction.is_plus() {
            prev.end > sl.start
        } else {
            prev.end < sl.start
        };
        if !overlapping {
            return NeighborStatus::Normal;
        }

        let nested = if self.direction.is_plus() {
            prev.end > sl.end
        } else {
            prev.end < sl.end
        };

        if nested {
            let has_3p = group_has_error(&groups[i], FeatureKind::MissingUtr3p);
            let has_5p = group_has_error(&groups[i], FeatureKind::MissingUtr5p);
            match (has_5p, has_3p) {
                (true, true) => NeighborStatus::NestedErrorBoth,
                (false, true) => NeighborStatus::NestedError3p,
                (true, false) => NeighborStatus::NestedError5p,
                (false, false) => NeighborStatus::Nested,
            }
        } else {
            let mut status = NeighborStatus::Overlap;
            if group_has_error(&groups[pi], FeatureKind::MissingUtr3p) {
                // a 3' UTR error of the previous locus sits 5' of the overlap
                status = NeighborStatus::OverlapError5p;
            }
            if group_has_error(&groups[i], FeatureKind::MissingUtr5p) {
                status = if status == NeighborStatus::Overlap {
                    NeighborStatus::OverlapError3p
                } else {
                    NeighborStatus::OverlapErrorBoth
                };
            }
            status
        }
    }

    /// The start of the 3′-most CDS chunk: the innermost intron end within
    /// the CDS span, or the CDS start when no intron falls inside it.
    fn three_p_cds_start(&self, transcript: &TranscriptGraph, cds_start: u64, cds_end: u64) -> u64 {
        // introns may appear in either orientation here; only their ends
        // strictly inside the CDS span count
        transcript
            .introns
            .iter()
            .map(|x| x.end)
            .filter(|&e| {
                if self.direction.is_plus() {
                    cds_start < e && e < cds_end
                } else {
                    cds_end < e && e < cds_start
                }
            })
            .reduce(|a, b| self.direction.downstream(a, b))
            .unwrap_or(cds_start)
    }

    /// Appends an error feature to the transcript's error list.
    fn add_error(
        &self,
        groups: &mut [LocusGraph],
        i: usize,
        ti: usize,
        start: u64,
        end: u64,
        kind: FeatureKind,
        ids: &mut IdAllocator,
    ) {
        let feature = Feature {
            id: ids.next_feature(),
            coordinate_id: self.coord.id,
            kind,
            given_name: None,
            direction: self.direction,
            start,
            end,
            start_is_biological_start: true,
            end_is_biological_end: true,
            phase: None,
            score: None,
            source: None,
        };
        groups[i].transcripts[ti].errors.push(feature);
        warn!(
            "marked as erroneous: seqid: {}, {}--{}:{:?}, on {} strand, with type: {}",
            self.coord.seqid,
            start,
            end,
            groups[i].super_locus.given_name,
            self.direction,
            kind
        );
    }

    /// Constructs an error feature extending from the anchor entity's
    /// boundary toward the neighboring locus (or the sequence edge),
    /// stopping at the computed border point. Feature anchors get their
    /// facing boundary flag marked not-biological; so does the transcript
    /// region when `mark_region` is set.
    #[allow(clippy::too_many_arguments)]
    fn add_overlapping_error(
        &self,
        groups: &mut [LocusGraph],
        i: usize,
        ti: usize,
        anchor: ErrAnchor,
        side: Side,
        kind: FeatureKind,
        find_next_non_overlapping: bool,
        mark_region: bool,
        ids: &mut IdAllocator,
    ) {
        let mut j = i;
        let anchor_point = match side {
            Side::FiveP => {
                if find_next_non_overlapping {
                    while j > 0 && !self.neighbor_status(groups, j - 1, j).is_normal() {
                        j -= 1;
                    }
                }
                if j > 0 {
                    self.border_mark(&groups[j - 1].super_locus, &groups[j].super_locus)
                } else {
                    self.direction.five_prime_edge(self.coord.length)
                }
            }
            Side::ThreeP => {
                if find_next_non_overlapping {
                    while j < groups.len() - 1
                        && !self.neighbor_status(groups, j, j + 1).is_normal()
                    {
                        j += 1;
                    }
                }
                if j < groups.len() - 1 {
                    self.border_mark(&groups[j].super_locus, &groups[j + 1].super_locus)
                } else {
                    self.direction.three_prime_edge(self.coord.length)
                }
            }
        };

        // read the anchor's facing boundary and mark it non-biological
        let handler_point = match (anchor, side) {
            (ErrAnchor::Cds, Side::FiveP) => {
                let transcript = &mut groups[i].transcripts[ti];
                let Some(cds) = transcript.cds.as_mut() else {
                    return;
                };
                cds.feature.start_is_biological_start = false;
                if mark_region {
                    transcript.region.start_is_biological_start = false;
                }
                cds.feature.start
            }
            (ErrAnchor::Cds, Side::ThreeP) => {
                let transcript = &mut groups[i].transcripts[ti];
                let Some(cds) = transcript.cds.as_mut() else {
                    return;
                };
                cds.feature.end_is_biological_end = false;
                if mark_region {
                    transcript.region.end_is_biological_end = false;
                }
                cds.feature.end
            }
            (ErrAnchor::Intron(idx), Side::FiveP) => {
                let intron = &mut groups[i].transcripts[ti].introns[idx];
                intron.start_is_biological_start = false;
                intron.start
            }
            (ErrAnchor::Intron(idx), Side::ThreeP) => {
                let intron = &mut groups[i].transcripts[ti].introns[idx];
                intron.end_is_biological_end = false;
                intron.end
            }
            (ErrAnchor::PrevLocus, Side::FiveP) => groups[i - 1].super_locus.start,
            (ErrAnchor::PrevLocus, Side::ThreeP) => groups[i - 1].super_locus.end,
            (ErrAnchor::SelfLocus, Side::FiveP) => groups[i].super_locus.start,
            (ErrAnchor::SelfLocus, Side::ThreeP) => groups[i].super_locus.end,
        };

        let (error_5p, error_3p) = match side {
            Side::FiveP => (anchor_point, handler_point),
            Side::ThreeP => (handler_point, anchor_point),
        };

        if !self.zero_len_at_sequence_edge(error_5p, error_3p, side) {
            self.add_error(groups, i, ti, error_5p, error_3p, kind, ids);
        }
    }

    /// Suppresses a masking request whose computed span is zero-length
    /// exactly at the sequence start or end: there is nothing to mask.
    fn zero_len_at_sequence_edge(&self, error_5p: u64, error_3p: u64, side: Side) -> bool {
        if error_5p != error_3p {
            return false;
        }
        let edge = match side {
            Side::FiveP => self.direction.five_prime_edge(self.coord.length),
            Side::ThreeP => self.direction.three_prime_edge(self.coord.length),
        };
        error_5p == edge
    }

    /// The border point between two neighboring loci: the previous locus'
    /// end pushed toward the next by `min(d/2, floor(sqrt(d)) * 10)`, which
    /// splits short gaps evenly and caps the masked share of long ones
    /// sub-linearly.
    fn border_mark(&self, sl: &SuperLocus, sl_next: &SuperLocus) -> u64 {
        if self.direction.is_plus() {
            let dist = sl_next.start.saturating_sub(sl.end);
            sl.end + border_offset(dist)
        } else {
            let dist = sl.end.saturating_sub(sl_next.start);
            sl.end - border_offset(dist)
        }
    }

    fn remove_backwards_errors(&self, groups: &mut [LocusGraph]) {
        for group in groups.iter_mut() {
            let mut n_removed = 0usize;
            for transcript in group.transcripts.iter_mut() {
                let full_len = transcript.errors.len();
                let direction = self.direction;
                transcript
                    .errors
                    .retain(|e| direction.is_transcription_order(e.start, e.end));
                n_removed += full_len - transcript.errors.len();
            }
            if n_removed > 0 {
                info!(
                    "removed {} backwards error(s) from overlapping super loci: seqid: {}, {:?}",
                    n_removed, self.coord.seqid, group.super_locus.given_name
                );
            }
        }
    }

    fn log_neighbor_status(&self, prev: &SuperLocus, sl: &SuperLocus, status: NeighborStatus) {
        if status.is_nested() {
            info!(
                "nested super loci: {:?} inside {:?}, type: {}",
                sl.given_name,
                prev.given_name,
                status.as_str()
            );
        } else {
            info!(
                "overlapping super loci: {:?} and {:?} (not nested), type: {}",
                prev.given_name,
                sl.given_name,
                status.as_str()
            );
        }
    }
}

fn group_has_error(group: &LocusGraph, kind: FeatureKind) -> bool {
    group
        .transcripts
        .iter()
        .flat_map(|t| t.errors.iter())
        .any(|e| e.kind == kind)
}

/// `min(d / 2, floor(sqrt(d)) * 10)`, clamped at 0 for touching or
/// overlapping loci.
fn border_offset(dist: u64) -> u64 {
    if dist == 0 {
        return 0;
    }
    (dist / 2).min(((dist as f64).sqrt().floor() as u64) * 10)
}

/// Whether the literal sequence at the normalized CDS start reads as a
/// start codon, given strand. Out-of-range slices count as missing.
fn has_start_codon(sequence: &str, cds_start: u64, direction: Direction) -> bool {
    let s = cds_start as usize;
    match direction {
        Direction::Plus => sequence.get(s..s + 3) == Some(START_CODON),
        Direction::Minus => s >= 3 && sequence.get(s - 3..s) == Some(START_CODON_RC),
    }
}

/// Whether the literal sequence at the normalized CDS end reads as a stop
/// codon, given strand.
fn has_stop_codon(sequence: &str, cds_end: u64, direction: Direction) -> bool {
    let e = cds_end as usize;
    match direction {
        Direction::Plus => {
            e >= 3
                && sequence
                    .get(e - 3..e)
                    .map(|codon| STOP_CODONS.contains(&codon))
                    .unwrap_or(false)
        }
        Direction::Minus => sequence
            .get(e..e + 3)
            .map(|codon| STOP_CODONS_RC.contains(&codon))
            .unwrap_or(false),
    }
}
