use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use rand::prelude::*;
use simplelog::*;
use time::macros::format_description;

use simple_ftl::config::{PAGES_PER_BLOCK, PAGE_SIZE, PHYSICAL_BLOCKS};
use simple_ftl::{FileNand, Geometry, MemNand, NandMedia, Ssd};

/// Preconditions a simulated SSD and hammers it with random page overwrites.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Over-provisioning, in percent of the physical pages.
    #[arg(long, default_value_t = 7.0)]
    op: f64,

    #[arg(long, default_value_t = PAGE_SIZE)]
    page_size: usize,

    #[arg(long, default_value_t = PAGES_PER_BLOCK)]
    pages_per_block: usize,

    #[arg(long, default_value_t = PHYSICAL_BLOCKS)]
    blocks: usize,

    /// Full-capacity random write passes after preconditioning.
    #[arg(long, default_value_t = 4)]
    rounds: usize,

    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Keep the NAND blocks as files in this directory instead of memory.
    #[arg(long)]
    nand_dir: Option<PathBuf>,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

fn run<M: NandMedia>(args: &Args, geometry: Geometry, media: M) -> simple_ftl::Result<()> {
    let mut fw = Ssd::new(geometry, media)?;
    fw.reset(fw.capacity())?;

    let page_size = geometry.page_size;
    let max_lba = geometry.logical_pages - 1;
    let mut page = vec![0u8; page_size];

    for lba in 0..=max_lba {
        page.fill(lba as u8);
        fw.write(lba * page_size, &page)?;
    }
    info!("Drive preconditioned");

    let mut rng: SmallRng = SmallRng::seed_from_u64(args.seed);

    for c in 0..args.rounds {
        for _ in 0..=max_lba {
            let lba = rng.gen_range(0..=max_lba);
            rng.fill_bytes(&mut page);
            let written = fw.write(lba * page_size, &page)?;
            if written != page_size {
                warn!("Short write on LBA {}: {} bytes", lba, written);
            }
        }
        info!(
            "Capacity {} randomly written, WA {:.3}",
            c,
            fw.write_amplification().unwrap_or(0.0)
        );
    }

    info!("Final counters:\n{}", fw.stats());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_cfg = ConfigBuilder::new()
        .set_time_format_custom(format_description!("[hour]:[minute]:[second].[subsecond]"))
        .build();

    if let Err(e) = SimpleLogger::init(args.log_level, log_cfg) {
        eprintln!("logger init failed: {}", e);
        return ExitCode::FAILURE;
    }

    let geometry = Geometry::with_overprovisioning(args.page_size, args.pages_per_block, args.blocks, args.op);

    let result = match &args.nand_dir {
        Some(dir) => FileNand::create(dir, geometry)
            .map_err(Into::into)
            .and_then(|media| run(&args, geometry, media)),
        None => run(&args, geometry, MemNand::new(geometry)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
