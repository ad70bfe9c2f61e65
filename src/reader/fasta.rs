//! FASTA sequence loading and small sequence utilities.
//!
//! Sequences are loaded whole: the importer needs them in memory anyway for
//! start/stop-codon verification, and they are persisted into the database
//! alongside their metadata.

use crate::model::{Coordinate, IdAllocator};
use anyhow::Context;
use flate2::read::GzDecoder;
use noodles::fasta;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Type alias for a noodles FASTA reader that can read from a `dyn BufRead`.
/// It is used to allow reading from either a compressed or uncompressed
/// FASTA file.
pub type FastaReader = fasta::Reader<Box<dyn BufRead>>;

/// Tests if the stream underlying the [BufReader] `reader` is gzipped or not
/// by examining the first 2 bytes for the magic header. This function
/// *requires*, but does not check, that none of the stream has yet been
/// consumed. It will fill the buffer to examine the first two bytes, but
/// will not consume them.
pub fn is_gzipped<T: BufRead>(reader: &mut T) -> std::io::Result<bool> {
    const GZIP_MAGIC_NUMBER: [u8; 2] = [0x1f, 0x8b];

    let src = reader.fill_buf()?;
    Ok(src.get(..2) == Some(&GZIP_MAGIC_NUMBER))
}

/// Creates a [FastaReader] from the provided path, automatically detecting
/// whether the file is gzip compressed.
pub fn get_fasta_reader<T: AsRef<Path>>(p: T) -> anyhow::Result<FastaReader> {
    let file = File::open(p.as_ref())
        .with_context(|| format!("failed to open FASTA file {}", p.as_ref().display()))?;
    let mut inner_rdr = BufReader::new(file);
    if is_gzipped(&mut inner_rdr)? {
        info!("auto-detected gzipped FASTA file - reading via decompression");
        Ok(fasta::Reader::new(Box::new(BufReader::new(GzDecoder::new(
            inner_rdr,
        )))))
    } else {
        Ok(fasta::Reader::new(Box::new(inner_rdr)))
    }
}

/// Loads every sequence of a FASTA file into [`Coordinate`] records for the
/// given genome. The seqid is the first whitespace-delimited word of the
/// record name; the sequence is uppercased and content-hashed.
pub fn load_coordinates<T: AsRef<Path>>(
    file_path: T,
    genome_id: u64,
    ids: &mut IdAllocator,
) -> anyhow::Result<Vec<Coordinate>> {
    let mut rdr = get_fasta_reader(file_path)?;
    read_coordinates(&mut rdr, genome_id, ids)
}

fn read_coordinates<T: BufRead>(
    rdr: &mut fasta::Reader<T>,
    genome_id: u64,
    ids: &mut IdAllocator,
) -> anyhow::Result<Vec<Coordinate>> {
    let mut coordinates = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let record_name = std::str::from_utf8(record.name())?;
        let seqid = record_name
            .split_once(' ')
            .unwrap_or((record_name, ""))
            .0
            .to_string();

        let sequence = std::str::from_utf8(record.sequence().as_ref())?.to_ascii_uppercase();
        let coordinate = Coordinate {
            id: ids.next_coordinate(),
            genome_id,
            seqid: seqid.clone(),
            length: sequence.len() as u64,
            sha1: sequence_sha1(&sequence),
            sequence,
        };
        info!(
            "loaded coordinate for FASTA sequence with seqid {} ({} bp)",
            seqid, coordinate.length
        );
        coordinates.push(coordinate);
    }
    Ok(coordinates)
}

/// The hex-encoded SHA-1 digest of a sequence, used as the coordinate's
/// content hash.
pub fn sequence_sha1(sequence: &str) -> String {
    let digest = Sha1::digest(sequence.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Reverse-complements a nucleotide sequence. Characters outside ACGT
/// (ambiguity codes, `N`) are passed through unchanged.
pub fn reverse_complement(sequence: &str) -> String {
    sequence
        .bytes()
        .rev()
        .map(|b| match b {
            b'A' => 'T',
            b'C' => 'G',
            b'G' => 'C',
            b'T' => 'A',
            other => other as char,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_coordinates() {
        let fasta_data = b">sq0 test\nacgt\n>sq1\nNNNN\nNNNN\nNN\n";
        let mut rdr = fasta::Reader::new(&fasta_data[..]);
        let mut ids = IdAllocator::new();

        let coords = read_coordinates(&mut rdr, 1, &mut ids).unwrap();
        assert_eq!(coords.len(), 2);
        assert_eq!(coords[0].seqid, "sq0");
        // sequences are uppercased on the way in
        assert_eq!(coords[0].sequence, "ACGT");
        assert_eq!(coords[0].length, 4);
        assert_eq!(coords[1].seqid, "sq1");
        assert_eq!(coords[1].length, 10);
        assert_eq!(coords[0].id, 1);
        assert_eq!(coords[1].id, 2);
    }

    #[test]
    fn test_sequence_sha1() {
        let digest = sequence_sha1("ACGT");
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        // content hash is case sensitive after uppercasing, and stable
        assert_eq!(digest, sequence_sha1("ACGT"));
        assert_ne!(digest, sequence_sha1("ACGA"));
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("ATG"), "CAT");
        assert_eq!(reverse_complement("AACCGGTT"), "AACCGGTT");
        assert_eq!(reverse_complement("ATGNNC"), "GNNCAT");
        assert_eq!(reverse_complement(""), "");
    }
}
