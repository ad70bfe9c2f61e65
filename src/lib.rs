//! annobase imports genome annotations ([GFF3](https://github.com/The-Sequence-Ontology/Specifications/blob/master/gff3.md))
//! together with the underlying genomic sequence (FASTA) into a
//! strand-normalized, internally consistent relational model stored in
//! [SQLite](https://www.sqlite.org/). Every genomic region in the result is
//! either structurally sound or explicitly masked with a typed error
//! feature, so downstream pipelines can tolerate partial, ambiguous, or
//! slightly malformed input without discarding whole genes. A separate
//! export path walks an imported database and emits derived sequences
//! (mRNA, CDS, exons, introns) as FASTA.

pub mod builder;
pub mod config;
pub mod exporter;
pub mod importer;
pub mod interval;
pub mod model;
pub mod organizer;
pub mod reader;
pub mod resolver;
pub mod types;
pub mod writer;

pub use config::ImportConfig;
pub use exporter::{ExportController, ExportMode};
pub use importer::{GenomeArgs, ImportController};
