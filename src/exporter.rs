//! Derived-sequence export from an already-imported database.
//!
//! The exporter walks the validated model and emits FASTA of ranges derived
//! from the stored features: pre-mRNA (the raw transcript extent), mature
//! mRNA and exons (transcript minus introns), CDS (coding region minus
//! introns) and the introns themselves. It reuses the same
//! interval-subtraction primitive as the importer but performs no
//! validation; error features are simply ignored.

use crate::interval::{as_span, Direction, IntervalSet};
use crate::reader::fasta::reverse_complement;
use crate::types::FeatureKind;
use anyhow::{bail, Context};
use rusqlite::Connection;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// What to derive from each transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// The unspliced transcript extent.
    PreMrna,
    /// Exonic sequence, spliced together.
    MatureRna,
    /// Coding exonic sequence, spliced together.
    Cds,
    /// Each exon as its own record.
    Exons,
    /// Each intron as its own record.
    Introns,
}

impl FromStr for ExportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<ExportMode> {
        let mode = match s {
            "pre-mRNA" | "pre-mrna" => ExportMode::PreMrna,
            "mRNA" | "mrna" => ExportMode::MatureRna,
            "CDS" | "cds" => ExportMode::Cds,
            "exons" => ExportMode::Exons,
            "introns" => ExportMode::Introns,
            other => bail!(
                "unknown export mode {}; expected one of pre-mRNA, mRNA, CDS, exons, introns",
                other
            ),
        };
        Ok(mode)
    }
}

impl std::fmt::Display for ExportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportMode::PreMrna => write!(f, "pre-mRNA"),
            ExportMode::MatureRna => write!(f, "mRNA"),
            ExportMode::Cds => write!(f, "CDS"),
            ExportMode::Exons => write!(f, "exons"),
            ExportMode::Introns => write!(f, "introns"),
        }
    }
}

#[derive(Debug)]
struct FeatureRange {
    kind: FeatureKind,
    coordinate_id: u64,
    direction: Direction,
    start: u64,
    end: u64,
}

#[derive(Debug)]
struct TranscriptRecord {
    id: u64,
    given_name: Option<String>,
    features: Vec<FeatureRange>,
}

impl TranscriptRecord {
    fn name(&self) -> String {
        self.given_name
            .clone()
            .unwrap_or_else(|| format!("transcript_{}", self.id))
    }

    /// The transcript's orientation, read off its region feature.
    fn direction(&self) -> Option<Direction> {
        self.features
            .iter()
            .find(|f| f.kind == FeatureKind::TranscriptRegion)
            .or(self.features.first())
            .map(|f| f.direction)
    }

    fn coordinate_id(&self) -> Option<u64> {
        self.features.first().map(|f| f.coordinate_id)
    }

    fn ranges_of(&self, kind: FeatureKind) -> Vec<(u64, u64)> {
        self.features
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| (f.start, f.end))
            .collect()
    }
}

/// Reads transcripts and their features back out of an imported database
/// and derives exportable ranges.
pub struct ExportController {
    conn: Connection,
    longest_only: bool,
}

impl ExportController {
    /// Opens an existing annotation database. `longest_only` restricts the
    /// export to each locus' longest transcript.
    pub fn open<T: AsRef<Path>>(db_path: T, longest_only: bool) -> anyhow::Result<ExportController> {
        let path = db_path.as_ref();
        if !path.exists() {
            bail!("no annotation database found at {}", path.display());
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(ExportController { conn, longest_only })
    }

    /// Exports all (or all longest) transcripts in the given mode to a
    /// FASTA file. Returns the number of records written.
    pub fn export_to_file<T: AsRef<Path>>(
        &self,
        mode: ExportMode,
        out_path: T,
    ) -> anyhow::Result<usize> {
        let file = std::fs::File::create(out_path.as_ref()).with_context(|| {
            format!("failed to create output file {}", out_path.as_ref().display())
        })?;
        let mut out = std::io::BufWriter::new(file);
        let n = self.export(mode, &mut out)?;
        info!(
            "wrote {} {} records to {}",
            n,
            mode,
            out_path.as_ref().display()
        );
        Ok(n)
    }

    /// Exports to any writer. One FASTA record per derived sequence.
    pub fn export<W: Write>(&self, mode: ExportMode, out: &mut W) -> anyhow::Result<usize> {
        let sequences = self.load_sequences()?;
        let transcripts = self.load_transcripts()?;

        let mut n_written = 0usize;
        for transcript in &transcripts {
            let Some(direction) = transcript.direction() else {
                continue;
            };
            let Some(coordinate_id) = transcript.coordinate_id() else {
                continue;
            };
            let Some(sequence) = sequences.get(&coordinate_id) else {
                bail!("feature references unknown coordinate {}", coordinate_id);
            };

            let regions = transcript.ranges_of(FeatureKind::TranscriptRegion);
            let introns = transcript.ranges_of(FeatureKind::Intron);
            let cds = transcript.ranges_of(FeatureKind::CdsRegion);
            let name = transcript.name();

            match mode {
                ExportMode::PreMrna => {
                    let seq = splice(sequence, direction, &regions);
                    if !seq.is_empty() {
                        write_fasta_record(out, &name, &seq)?;
                        n_written += 1;
                    }
                }
                ExportMode::MatureRna => {
                    let exons = subtract(&regions, &introns, direction);
                    let seq = splice(sequence, direction, &exons);
                    if !seq.is_empty() {
                        write_fasta_record(out, &name, &seq)?;
                        n_written += 1;
                    }
                }
                ExportMode::Cds => {
                    if cds.is_empty() {
                        continue;
                    }
                    let coding_exons = subtract(&cds, &introns, direction);
                    let seq = splice(sequence, direction, &coding_exons);
                    if !seq.is_empty() {
                        write_fasta_record(out, &name, &seq)?;
                        n_written += 1;
                    }
                }
                ExportMode::Exons => {
                    let exons = subtract(&regions, &introns, direction);
                    for (i, range) in exons.iter().enumerate() {
                        let seq = splice(sequence, direction, std::slice::from_ref(range));
                        write_fasta_record(out, &format!("{}_exon_{}", name, i), &seq)?;
                        n_written += 1;
                    }
                }
                ExportMode::Introns => {
                    for (i, range) in order_ranges(introns.clone(), direction).iter().enumerate() {
                        let seq = splice(sequence, direction, std::slice::from_ref(range));
                        write_fasta_record(out, &format!("{}_intron_{}", name, i), &seq)?;
                        n_written += 1;
                    }
                }
            }
        }
        Ok(n_written)
    }

    fn load_sequences(&self) -> anyhow::Result<HashMap<u64, String>> {
        let mut stmt = self.conn.prepare("SELECT id, sequence FROM coordinate")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
        })?;
        let mut sequences = HashMap::new();
        for row in rows {
            let (id, sequence) = row?;
            sequences.insert(id, sequence);
        }
        Ok(sequences)
    }

    fn load_transcripts(&self) -> anyhow::Result<Vec<TranscriptRecord>> {
        let mut sql = String::from(
            "SELECT t.id, t.given_name, f.type, f.coordinate_id, f.is_plus_strand, \
             f.start, f.\"end\" \
             FROM transcript t \
             JOIN transcript_piece tp ON tp.transcript_id = t.id \
             JOIN association_transcript_piece_to_feature a \
               ON a.transcript_piece_id = tp.id \
             JOIN feature f ON f.id = a.feature_id ",
        );
        if self.longest_only {
            sql.push_str("WHERE t.longest = 1 ");
        }
        sql.push_str("ORDER BY t.id, tp.position, f.id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)? as u64,
                row.get::<_, bool>(4)?,
                row.get::<_, i64>(5)? as u64,
                row.get::<_, i64>(6)? as u64,
            ))
        })?;

        let mut transcripts: Vec<TranscriptRecord> = Vec::new();
        for row in rows {
            let (id, given_name, kind, coordinate_id, is_plus, start, end) = row?;
            let kind = FeatureKind::from_str(&kind)?;
            let direction = if is_plus {
                Direction::Plus
            } else {
                Direction::Minus
            };
            if transcripts.last().map(|t| t.id) != Some(id) {
                transcripts.push(TranscriptRecord {
                    id,
                    given_name,
                    features: Vec::new(),
                });
            }
            if let Some(current) = transcripts.last_mut() {
                current.features.push(FeatureRange {
                    kind,
                    coordinate_id,
                    direction,
                    start,
                    end,
                });
            }
        }
        Ok(transcripts)
    }
}

/// Subtracts every `sub` range from every `from` range and returns the
/// residual ranges in 5′→3′ order, oriented for the given strand.
fn subtract(from: &[(u64, u64)], sub: &[(u64, u64)], direction: Direction) -> Vec<(u64, u64)> {
    let mut residuals = Vec::new();
    for &(start, end) in from {
        let (low, high) = as_span(start, end);
        let mut set = IntervalSet::new(low, high);
        for &(s_start, s_end) in sub {
            let (s_low, s_high) = as_span(s_start, s_end);
            set.chop(s_low, s_high);
        }
        for &(low, high) in set.spans() {
            residuals.push(if direction.is_plus() {
                (low, high)
            } else {
                (high, low)
            });
        }
    }
    order_ranges(residuals, direction)
}

/// Orders ranges 5′→3′ for the given strand.
fn order_ranges(mut ranges: Vec<(u64, u64)>, direction: Direction) -> Vec<(u64, u64)> {
    ranges.sort_by_key(|&(start, end)| as_span(start, end).0);
    if !direction.is_plus() {
        ranges.reverse();
    }
    ranges
}

/// Slices the given ranges (5′→3′ order) out of the coordinate sequence and
/// concatenates them, reverse-complementing on the minus strand.
fn splice(sequence: &str, direction: Direction, ranges: &[(u64, u64)]) -> String {
    let mut out = String::new();
    for &(start, end) in ranges {
        let (low, high) = as_span(start, end);
        let low = (low as usize).min(sequence.len());
        let high = (high as usize).min(sequence.len());
        let chunk = &sequence[low..high];
        if direction.is_plus() {
            out.push_str(chunk);
        } else {
            out.push_str(&reverse_complement(chunk));
        }
    }
    out
}

const FASTA_LINE_WIDTH: usize = 60;

fn write_fasta_record<W: Write>(out: &mut W, name: &str, sequence: &str) -> anyhow::Result<()> {
    writeln!(out, ">{}", name)?;
    let bytes = sequence.as_bytes();
    for chunk in bytes.chunks(FASTA_LINE_WIDTH) {
        out.write_all(chunk)?;
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract_orders_five_to_three() {
        // plus strand: transcript (0, 300) minus introns
        let exons = subtract(&[(0, 300)], &[(100, 150), (200, 250)], Direction::Plus);
        assert_eq!(exons, vec![(0, 100), (150, 200), (250, 300)]);

        // minus strand: same geometry, reversed orientation and order
        let exons = subtract(&[(300, 0)], &[(150, 100), (250, 200)], Direction::Minus);
        assert_eq!(exons, vec![(300, 250), (200, 150), (100, 0)]);
    }

    #[test]
    fn test_splice_minus_strand_reverse_complements() {
        //             0123456789
        let sequence = "AAACGTTTGG";
        assert_eq!(splice(sequence, Direction::Plus, &[(3, 6)]), "CGT");
        // minus range (6, 3) covers the same bases, read 5'->3' on minus
        assert_eq!(splice(sequence, Direction::Minus, &[(6, 3)]), "ACG");
        // two ranges concatenate in the order given
        assert_eq!(
            splice(sequence, Direction::Plus, &[(0, 3), (6, 9)]),
            "AAATTG"
        );
    }

    #[test]
    fn test_write_fasta_record_wraps_lines() {
        let mut out = Vec::new();
        let sequence = "A".repeat(130);
        write_fasta_record(&mut out, "t1", &sequence).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ">t1");
        assert_eq!(lines[1].len(), 60);
        assert_eq!(lines[2].len(), 60);
        assert_eq!(lines[3].len(), 10);
    }

    #[test]
    fn test_export_mode_parsing() {
        assert_eq!(ExportMode::from_str("mRNA").unwrap(), ExportMode::MatureRna);
        assert_eq!(ExportMode::from_str("cds").unwrap(), ExportMode::Cds);
        assert_eq!(
            ExportMode::from_str("pre-mRNA").unwrap(),
            ExportMode::PreMrna
        );
        assert!(ExportMode::from_str("proteins").is_err());
    }
}
