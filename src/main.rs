//! conv3-emu: run a synthetic job through the convolution engine model

use std::env;
use std::process::ExitCode;

use anyhow::{bail, Context};
use conv3_emu::device::{HostMemory, PortKind};
use conv3_emu::emu::ConvEngine;
use conv3_emu::reference::{self, ConvShape};
use conv3_emu::testing::ConvJob;
use conv3_emu::Config;

const USAGE: &str = "\
Usage: conv3-emu [options]

Options:
  --height H         image rows (default 16)
  --width W          image columns (default 16)
  --in-channels C    input channels (default 3)
  --out-channels K   filters (default 8)
  --verify           compare against the exact reference
  --sample-config    print a sample config file and exit
  --show-config      print the resolved engine config and exit
  -h, --help         show this message";

struct Options {
    shape: ConvShape,
    verify: bool,
    sample_config: bool,
    show_config: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<Option<Options>> {
    let mut opts = Options {
        shape: ConvShape { height: 16, width: 16, in_channels: 3, out_channels: 8 },
        verify: false,
        sample_config: false,
        show_config: false,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| -> anyhow::Result<usize> {
            let text = iter.next().with_context(|| format!("{} needs a value", name))?;
            text.parse().with_context(|| format!("{}: '{}' is not a number", name, text))
        };
        match arg.as_str() {
            "--height" => opts.shape.height = value("--height")?,
            "--width" => opts.shape.width = value("--width")?,
            "--in-channels" => opts.shape.in_channels = value("--in-channels")?,
            "--out-channels" => opts.shape.out_channels = value("--out-channels")?,
            "--verify" => opts.verify = true,
            "--sample-config" => opts.sample_config = true,
            "--show-config" => opts.show_config = true,
            "-h" | "--help" => return Ok(None),
            other => bail!("unknown option '{}'\n\n{}", other, USAGE),
        }
    }

    Ok(Some(opts))
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    let opts = match parse_args(&args)? {
        Some(opts) => opts,
        None => {
            println!("{}", USAGE);
            return Ok(ExitCode::SUCCESS);
        }
    };

    if opts.sample_config {
        print!("{}", Config::sample_config());
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::get().engine_config();
    if opts.show_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let shape = opts.shape;
    if shape.height < 3 || shape.width < 3 || shape.in_channels == 0 || shape.out_channels == 0 {
        bail!("image must be at least 3x3 with one input and one output channel");
    }

    let job = ConvJob::synthetic(shape);
    let mut engine = ConvEngine::new(config).context("building engine")?;
    let mut mem = HostMemory::new();
    let result = job.run_in(&mut engine, &mut mem).context("running job")?;
    let stats = &result.stats;

    println!(
        "Job: {}x{}x{} -> {}x{}x{}",
        shape.height,
        shape.width,
        shape.in_channels,
        shape.out_height(),
        shape.out_width(),
        shape.out_channels
    );
    println!();
    println!("Cycles:          {}", stats.cycles);
    println!("MAC steps:       {}", stats.mac_steps);
    println!("MAC utilization: {:.1}%", stats.mac_utilization() * 100.0);
    println!("Stall cycles:    {}", stats.stall_cycles);
    println!("Filter groups:   {}", stats.groups);
    println!("Rows fetched:    {}", stats.rows_fetched);
    println!("Row evictions:   {}", stats.evictions);
    println!();
    println!("Port          bundle  transfers  bursts  elements  busy cycles");
    for kind in PortKind::ALL {
        let port = stats.port(kind);
        println!(
            "{:<13} {:<7} {:>9} {:>7} {:>9} {:>12}",
            kind.name(),
            engine.config().ports.bundle(kind),
            port.transfers,
            port.bursts,
            port.elements,
            port.busy_cycles
        );
    }

    println!();
    println!(
        "Host memory: {} pages, {} bytes written, {} bytes read",
        mem.allocated_pages(),
        mem.total_bytes_written(),
        mem.total_bytes_read()
    );
    println!("Region        base                read bursts  write bursts");
    for region in mem.regions() {
        println!(
            "{:<13} 0x{:016X}  {:>11} {:>13}",
            region.name, region.base_address, region.dma_reads, region.dma_writes
        );
    }

    if opts.verify {
        let expected = job.reference();
        let diff = reference::max_abs_diff(&result.output, &expected);
        let tolerance = reference::tolerance_lsb(shape.in_channels);
        println!();
        println!("Reference: max deviation {} LSB (tolerance {} LSB)", diff, tolerance);
        if diff > tolerance {
            println!("FAIL");
            return Ok(ExitCode::FAILURE);
        }
        println!("PASS");
    }

    Ok(ExitCode::SUCCESS)
}
