use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bio::io::fasta;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use pals::pack::{Packed, Packer};
use pals::pair::new_feature_pair;
use pals::report::GffWriter;
use pals::{Log, Pals};

#[derive(Parser, Debug)]
#[command(name = "pals")]
#[command(version)]
#[command(about = "Pairwise alignment of large sequences", long_about = None)]
struct Args {
    /// Target FASTA file
    #[arg(short, long)]
    target: PathBuf,
    /// Query FASTA file; omit to compare the target with itself
    #[arg(short, long, conflicts_with = "self_compare")]
    query: Option<PathBuf>,
    /// Compare the target with itself
    #[arg(long = "self")]
    self_compare: bool,
    /// Minimum hit length
    #[arg(short = 'l', long, default_value_t = pals::DEFAULT_LENGTH)]
    min_length: usize,
    /// Minimum identity of reported hits, 0..=1
    #[arg(short = 'i', long, default_value_t = pals::DEFAULT_MIN_IDENTITY)]
    min_id: f64,
    /// Ceiling on filter memory, in bytes
    #[arg(short = 'm', long)]
    max_mem: Option<u64>,
    /// Fixed diagonal tube offset (0 selects it from the error budget)
    #[arg(long, default_value_t = 0)]
    tube_offset: usize,
    /// Also search the reverse-complement strand
    #[arg(short = 'b', long)]
    both_strands: bool,
    /// Output GFF file (stdout when omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Report pipeline progress on stderr
    #[arg(short, long)]
    verbose: bool,
}

/// Progress sink for the pipeline, drawn as a spinner.
struct ProgressLogger {
    bar: ProgressBar,
}

impl ProgressLogger {
    fn new() -> ProgressLogger {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {elapsed_precise} {wide_msg}")
                .expect("static template"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        ProgressLogger { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Log for ProgressLogger {
    fn message(&self, msg: &str) {
        self.bar.println(format!("pals: {msg}"));
        self.bar.set_message(msg.to_string());
    }
}

/// Read a FASTA file into a packed sequence.
fn read_packed(path: &Path) -> Result<Packed> {
    let reader = fasta::Reader::from_file(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut packer = Packer::new(path.display().to_string());
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        packer
            .add(record.id(), record.seq())
            .with_context(|| format!("packing {}", path.display()))?;
    }
    Ok(packer.finish())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let target = read_packed(&args.target)?;
    let query = match &args.query {
        Some(path) => Some(read_packed(path)?),
        None => None,
    };
    // --self and --query exclude each other at parse time; a missing
    // query also means self-comparison.
    let self_compare = args.self_compare || query.is_none();
    let query_ref: &Packed = query.as_ref().unwrap_or(&target);

    let logger = args.verbose.then(ProgressLogger::new);

    let mut forward = Pals::new(&target.seq, &query_ref.seq, self_compare);
    if let Some(max_mem) = args.max_mem {
        forward = forward.with_max_mem(max_mem);
    }
    if args.tube_offset > 0 {
        forward = forward.with_tube_offset(args.tube_offset);
    }
    if let Some(log) = &logger {
        forward = forward.with_logger(log);
    }

    forward
        .optimise(args.min_length, args.min_id)
        .context("selecting filter parameters")?;
    forward.build_index().context("building k-mer index")?;

    let (fwd_hits, rev_hits) = if args.both_strands {
        let mut reverse = Pals::new(&target.seq, &query_ref.seq, self_compare);
        if let Some(log) = &logger {
            reverse = reverse.with_logger(log);
        }
        reverse.share(&forward);

        let (f, r) = rayon::join(|| forward.align(false), || reverse.align(true));
        let hits = (
            f.context("aligning forward strand")?,
            r.context("aligning reverse strand")?,
        );
        reverse.cleanup().context("cleaning up sorter state")?;
        hits
    } else {
        (
            forward.align(false).context("aligning forward strand")?,
            Vec::new(),
        )
    };
    forward.cleanup().context("cleaning up sorter state")?;

    let out: Box<dyn Write> = match &args.out {
        Some(path) => {
            Box::new(File::create(path).with_context(|| format!("creating {}", path.display()))?)
        }
        None => Box::new(io::stdout()),
    };
    let mut writer = GffWriter::new(out);
    for hit in &fwd_hits {
        let pair = new_feature_pair(&target, query_ref, hit, false)?;
        writer.write(&pair).context("writing hit")?;
    }
    for hit in &rev_hits {
        let pair = new_feature_pair(&target, query_ref, hit, true)?;
        writer.write(&pair).context("writing hit")?;
    }
    writer.finish().context("flushing output")?;

    if let Some(log) = &logger {
        log.message(&format!(
            "reported {} hits",
            fwd_hits.len() + rev_hits.len()
        ));
        log.finish();
    }
    Ok(())
}
