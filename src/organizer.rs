//! Reconstructs the implicit gene → transcript → exon/CDS tree from the
//! flat GFF entry stream.
//!
//! Grouping is purely positional: a gene-level entry opens a new group and
//! closes the previous one, and groups are collected per seqid in file
//! order. Organizing a single group then buckets its children under the
//! most recently opened transcript. No validation happens here beyond
//! referential sanity (exactly one parent per transcript); structural error
//! checking is the resolver's job.

use crate::reader::gff::GffEntry;
use crate::types::EntryKind;
use anyhow::bail;
use tracing::warn;

/// All gene groups that share one sequence id, in file order.
#[derive(Debug)]
pub struct CoordinateBatch {
    pub seqid: String,
    pub groups: Vec<Vec<GffEntry>>,
}

/// Splits the useful entry stream into per-seqid lists of gene groups.
///
/// Entries preceding the first gene-level entry have nothing to belong to
/// and are dropped with a warning (non-fatal).
pub fn group_entries(entries: Vec<GffEntry>) -> Vec<CoordinateBatch> {
    let mut batches: Vec<CoordinateBatch> = Vec::new();
    let mut current_group: Vec<GffEntry> = Vec::new();

    for entry in entries {
        match entry.kind {
            EntryKind::SuperLocus(_) => {
                if !current_group.is_empty() {
                    // a batch exists whenever a group is open
                    batches
                        .last_mut()
                        .expect("open group without a batch")
                        .groups
                        .push(std::mem::take(&mut current_group));
                }
                if batches.last().map(|b| b.seqid != entry.seqid).unwrap_or(true) {
                    batches.push(CoordinateBatch {
                        seqid: entry.seqid.clone(),
                        groups: Vec::new(),
                    });
                }
                current_group.push(entry);
            }
            _ => {
                if current_group.is_empty() {
                    warn!(
                        "ignoring {:?} entry on {} preceding the first gene-level entry",
                        entry.kind, entry.seqid
                    );
                } else {
                    current_group.push(entry);
                }
            }
        }
    }
    if !current_group.is_empty() {
        batches
            .last_mut()
            .expect("open group without a batch")
            .groups
            .push(current_group);
    }
    batches
}

/// One transcript-level entry together with its exon and CDS children,
/// each sorted ascending by raw GFF start (strand-aware ordering happens
/// later, in the builder).
#[derive(Debug)]
pub struct TranscriptBucket {
    pub transcript: GffEntry,
    pub exons: Vec<GffEntry>,
    pub cds: Vec<GffEntry>,
}

/// One gene group with its children organized into transcript buckets.
#[derive(Debug)]
pub struct OrganizedLocus {
    pub super_locus: GffEntry,
    pub transcripts: Vec<TranscriptBucket>,
}

/// Organizes one gene group into transcript buckets.
///
/// A transcript-level entry without exactly one `Parent` reference is
/// rejected: zero parents is malformed input, and more than one means
/// trans-splicing, which is explicitly unimplemented and must fail loudly
/// rather than silently producing a wrong model.
pub fn organize_locus(group: Vec<GffEntry>) -> anyhow::Result<OrganizedLocus> {
    let mut entries = group.into_iter();
    let super_locus = match entries.next() {
        Some(entry) if matches!(entry.kind, EntryKind::SuperLocus(_)) => entry,
        other => bail!(
            "gene group does not start with a gene-level entry: {:?}",
            other.map(|e| e.kind)
        ),
    };

    let mut transcripts: Vec<TranscriptBucket> = Vec::new();
    for entry in entries {
        match entry.kind {
            EntryKind::Transcript(_) => {
                let parents = entry.parents();
                if parents.is_empty() {
                    bail!(
                        "transcript-level entry without Parent found: {:?} at {}:{}-{}",
                        entry.given_id(),
                        entry.seqid,
                        entry.start,
                        entry.end
                    );
                }
                if parents.len() > 1 {
                    bail!(
                        "transcript-level entry {:?} has {} parents; trans-splicing \
                         is not implemented",
                        entry.given_id(),
                        parents.len()
                    );
                }
                transcripts.push(TranscriptBucket {
                    transcript: entry,
                    exons: Vec::new(),
                    cds: Vec::new(),
                });
            }
            EntryKind::Exon | EntryKind::Cds => match transcripts.last_mut() {
                Some(bucket) => {
                    if entry.kind == EntryKind::Exon {
                        bucket.exons.push(entry);
                    } else {
                        bucket.cds.push(entry);
                    }
                }
                None => {
                    warn!(
                        "ignoring {:?} without preceding transcript in {}: {:?}",
                        entry.kind,
                        entry.seqid,
                        super_locus.given_id()
                    );
                }
            },
            other => {
                warn!("found unexpected entry type inside a gene group: {:?}", other);
            }
        }
    }

    for bucket in &mut transcripts {
        bucket.exons.sort_by_key(|e| e.start);
        bucket.cds.sort_by_key(|e| e.start);
    }

    Ok(OrganizedLocus {
        super_locus,
        transcripts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Direction;
    use std::collections::HashMap;

    fn entry(seqid: &str, ty: &str, start: u64, end: u64, attrs: &[(&str, &str)]) -> GffEntry {
        GffEntry {
            seqid: seqid.to_string(),
            source: "test".to_string(),
            kind: EntryKind::classify(ty).unwrap(),
            start,
            end,
            score: None,
            direction: Direction::Plus,
            phase: None,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_group_entries_by_gene_and_seqid() {
        let entries = vec![
            // leading orphan: dropped
            entry("chr1", "exon", 1, 10, &[]),
            entry("chr1", "gene", 1, 100, &[("ID", "g1")]),
            entry("chr1", "mRNA", 1, 100, &[("ID", "t1"), ("Parent", "g1")]),
            entry("chr1", "exon", 1, 100, &[("Parent", "t1")]),
            entry("chr1", "gene", 200, 300, &[("ID", "g2")]),
            entry("chr2", "gene", 1, 50, &[("ID", "g3")]),
        ];
        let batches = group_entries(entries);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].seqid, "chr1");
        assert_eq!(batches[0].groups.len(), 2);
        assert_eq!(batches[0].groups[0].len(), 3);
        assert_eq!(batches[0].groups[1].len(), 1);
        assert_eq!(batches[1].seqid, "chr2");
        assert_eq!(batches[1].groups.len(), 1);
    }

    #[test]
    fn test_organize_locus_buckets_and_sorting() {
        let group = vec![
            entry("chr1", "gene", 1, 300, &[("ID", "g1")]),
            entry("chr1", "mRNA", 1, 300, &[("ID", "t1"), ("Parent", "g1")]),
            // deliberately out of order
            entry("chr1", "exon", 201, 300, &[("Parent", "t1")]),
            entry("chr1", "exon", 1, 100, &[("Parent", "t1")]),
            entry("chr1", "CDS", 250, 300, &[("Parent", "t1")]),
            entry("chr1", "CDS", 50, 100, &[("Parent", "t1")]),
            entry("chr1", "mRNA", 1, 300, &[("ID", "t2"), ("Parent", "g1")]),
            entry("chr1", "exon", 1, 300, &[("Parent", "t2")]),
        ];
        let locus = organize_locus(group).unwrap();
        assert_eq!(locus.super_locus.given_id(), Some("g1"));
        assert_eq!(locus.transcripts.len(), 2);

        let t1 = &locus.transcripts[0];
        assert_eq!(t1.exons.len(), 2);
        assert_eq!(t1.cds.len(), 2);
        assert_eq!(t1.exons[0].start, 1);
        assert_eq!(t1.exons[1].start, 201);
        assert_eq!(t1.cds[0].start, 50);

        let t2 = &locus.transcripts[1];
        assert_eq!(t2.exons.len(), 1);
        assert!(t2.cds.is_empty());
    }

    #[test]
    fn test_orphan_children_are_dropped() {
        let group = vec![
            entry("chr1", "gene", 1, 300, &[("ID", "g1")]),
            // exon before any transcript bucket: dropped with a warning
            entry("chr1", "exon", 1, 100, &[("Parent", "t0")]),
            entry("chr1", "mRNA", 1, 300, &[("ID", "t1"), ("Parent", "g1")]),
            entry("chr1", "exon", 1, 300, &[("Parent", "t1")]),
        ];
        let locus = organize_locus(group).unwrap();
        assert_eq!(locus.transcripts.len(), 1);
        assert_eq!(locus.transcripts[0].exons.len(), 1);
        assert_eq!(locus.transcripts[0].exons[0].start, 1);
    }

    #[test]
    fn test_transcript_without_parent_is_fatal() {
        let group = vec![
            entry("chr1", "gene", 1, 300, &[("ID", "g1")]),
            entry("chr1", "mRNA", 1, 300, &[("ID", "t1")]),
        ];
        let err = organize_locus(group).unwrap_err();
        assert!(err.to_string().contains("without Parent"));
    }

    #[test]
    fn test_multi_parent_transcript_is_fatal() {
        let group = vec![
            entry("chr1", "gene", 1, 300, &[("ID", "g1")]),
            entry(
                "chr1",
                "mRNA",
                1,
                300,
                &[("ID", "t1"), ("Parent", "g1,g2")],
            ),
        ];
        let err = organize_locus(group).unwrap_err();
        assert!(err.to_string().contains("trans-splicing"));
    }
}
