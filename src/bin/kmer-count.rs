use anyhow::{Context, bail};
use byteorder::{LittleEndian as LE, WriteBytesExt};
use clap::Parser;
use kira_kmer_typer::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

/// Count reference k-mers in sequencing samples.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Reference: FASTA (.fa/.fasta) or k-mer table
    #[arg(short, long)]
    reference: PathBuf,

    /// Sample inputs (file or directory), one count vector each
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Output directory for `<sample>.counts`
    #[arg(short, long)]
    output: PathBuf,

    /// K-mer length (<= 63)
    #[arg(short = 'k', long, default_value_t = DEFAULT_K)]
    k: usize,

    /// Workers per gzipped FASTQ input
    #[arg(short = 't', long, default_value_t = 1)]
    threads: usize,

    /// Background FASTA; hits are reported, not subtracted
    #[arg(short = 'b', long)]
    background: Option<PathBuf>,

    /// Give every FASTA k-mer occurrence its own label
    #[arg(long, default_value_t = false)]
    multi_label: bool,

    /// Also index k-mers ending on lowercase reference bases
    #[arg(long, default_value_t = false)]
    keep_soft_masked: bool,

    /// Log progress at info level
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// `[HH:MM:SS] LEVEL: message` on stderr; info with `verbose`, warn otherwise.
fn init_logger(verbose: bool) {
    START_TIME.set(Instant::now()).ok();

    let level = if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format(|buf, record| {
            let elapsed = START_TIME.get().map(Instant::elapsed).unwrap_or_default();
            let secs = elapsed.as_secs();
            writeln!(
                buf,
                "[{:02}:{:02}:{:02}] {}: {}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();
}

/// Little-endian `u32` length followed by one `u16` per label.
fn write_counts(path: &Path, counts: &[u16]) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u32::<LE>(counts.len() as u32)?;
    for &c in counts {
        w.write_u16::<LE>(c)?;
    }
    w.flush()
}

fn sample_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string());
    name.split('.').next().unwrap_or(name.as_str()).to_string()
}

fn run<W: KmerWord>(args: &Args) -> anyhow::Result<()> {
    let mode = if args.multi_label {
        BuildMode::MultiLabel
    } else {
        BuildMode::SingleLabel
    };
    let cfg = CounterConfig::default()
        .with_k(args.k)
        .threads(args.threads)
        .fasta_mode(mode)
        .skip_soft_masked(!args.keep_soft_masked);

    let mut counter = KmerCounter::<W>::new(cfg);
    counter
        .read_target(&args.reference)
        .with_context(|| format!("indexing {}", args.reference.display()))?;
    if let Some(bg) = &args.background {
        counter
            .load_backgrounds(bg)
            .with_context(|| format!("loading backgrounds from {}", bg.display()))?;
    }

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    for input in &args.input {
        let counts = counter.new_sample_counts();
        let stats = CountStats::new();
        counter
            .call(input, &counts, &stats)
            .with_context(|| format!("counting {}", input.display()))?;

        let name = sample_name(input);
        let out = args.output.join(format!("{name}.counts"));
        write_counts(&out, &counts.snapshot())
            .with_context(|| format!("writing {}", out.display()))?;

        let s = stats.summary();
        println!("{name}\t{}\t{}\t{}", s.bases, s.reads, s.background_hits);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    match args.k {
        k if k > 0 && k <= <u64 as KmerWord>::MAX_K => run::<u64>(&args),
        k if k > 0 && k <= <u128 as KmerWord>::MAX_K => run::<u128>(&args),
        k => bail!("k must be 1..={} (got {k})", <u128 as KmerWord>::MAX_K),
    }
}
