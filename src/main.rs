use annobase::{ExportController, ExportMode, GenomeArgs, ImportConfig, ImportController};
use clap::{Parser, Subcommand};
use peak_alloc::PeakAlloc;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

#[global_allocator]
static PEAK_ALLOC: PeakAlloc = PeakAlloc;

#[derive(Parser)]
#[command(
    name = "annobase",
    version,
    about = "Import genome annotations into a strand-normalized SQLite database \
             and export derived sequences"
)]
struct Cli {
    /// Write the log to this file in addition to stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a FASTA + GFF3 pair into a new annotation database
    Import {
        /// FASTA file with the genomic sequence (plain or gzipped)
        #[arg(long)]
        fasta: PathBuf,

        /// GFF3 file with the annotation to parse and standardize
        #[arg(long)]
        gff3: PathBuf,

        /// Path of the annotation database to create
        #[arg(long)]
        db_path: PathBuf,

        /// Optional TOML config file with import options
        #[arg(long, default_value = "config/import.toml")]
        config_file: PathBuf,

        /// Replace a database already present at --db-path
        #[arg(long)]
        replace_db: bool,

        /// Name of the species
        #[arg(long)]
        species: String,

        /// Genome accession
        #[arg(long, default_value = "")]
        accession: String,

        /// Genome assembly version
        #[arg(long = "genome-version", default_value = "")]
        genome_version: String,

        /// Where the genome was acquired from
        #[arg(long, default_value = "")]
        acquired_from: String,
    },
    /// Export derived sequences from an imported database as FASTA
    Export {
        /// Path of an imported annotation database
        #[arg(long)]
        db_path: PathBuf,

        /// What to derive: pre-mRNA, mRNA, CDS, exons, or introns
        #[arg(long, default_value = "mRNA")]
        mode: String,

        /// Only export the longest transcript of each locus
        #[arg(long)]
        longest: bool,

        /// Output FASTA path
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(file));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_ref())?;
    let start = Instant::now();

    match cli.command {
        Commands::Import {
            fasta,
            gff3,
            db_path,
            config_file,
            replace_db,
            species,
            accession,
            genome_version,
            acquired_from,
        } => {
            let config = ImportConfig::from_toml_file(&config_file)?;
            let controller = ImportController::new(&db_path, config, replace_db)?;
            controller.add_genome(
                &fasta,
                &gff3,
                GenomeArgs {
                    species,
                    accession,
                    version: genome_version,
                    acquired_from,
                },
            )?;
        }
        Commands::Export {
            db_path,
            mode,
            longest,
            out,
        } => {
            let mode: ExportMode = mode.parse()?;
            let controller = ExportController::open(&db_path, longest)?;
            controller.export_to_file(mode, &out)?;
        }
    }

    info!("done in {:?}", start.elapsed());
    info!("peak memory usage was {:.3} GB", PEAK_ALLOC.peak_usage_as_gb());
    Ok(())
}
