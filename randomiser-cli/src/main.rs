use clap::Parser;
use log::{error, info, LevelFilter};
use std::collections::BTreeMap;
use std::path::PathBuf;

use mm2rng_core::{run, seed, RandomiserSettings, Region};

#[derive(Debug, Parser)]
#[command(name = "mm2-randomizer", version, about = "Mega Man 2 randomizer tool")]
struct Args {
    /// Pristine source ROM. Never modified.
    #[arg(long, required_unless_present = "decode_seed")]
    source: Option<PathBuf>,

    /// Pipeline profile (JSON) listing passes and fix-ups in run order.
    #[arg(long, required_unless_present = "decode_seed")]
    profile: Option<PathBuf>,

    #[arg(long, value_name = "IPS")]
    prepatch: Option<PathBuf>,

    #[arg(long, value_name = "JSON")]
    soundtracks: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Omit (or pass a negative value) to draw a fresh seed.
    #[arg(long, allow_negative_numbers = true)]
    seed: Option<i64>,

    #[arg(long, default_value_t = false)]
    japanese: bool,

    /// Turn on a pass or fix-up the profile leaves off. Repeatable.
    #[arg(long, value_name = "NAME")]
    enable: Vec<String>,

    /// Turn off a pass or fix-up. Repeatable.
    #[arg(long, value_name = "NAME")]
    disable: Vec<String>,

    #[arg(long, default_value_t = false)]
    emit_ips: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Debug-only: print the numeric seed for a seed code and exit.
    #[arg(long, value_name = "CODE", hide = true)]
    decode_seed: Option<String>,
}

fn init_logging(verbose: bool) -> Result<(), fern::InitError> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("Failed to set up logging: {e}");
    }

    if let Some(code) = args.decode_seed.as_deref() {
        match seed::decode(code) {
            Ok(value) => println!("{value}"),
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let mut pass_toggles = BTreeMap::new();
    for name in args.enable {
        pass_toggles.insert(name, true);
    }
    for name in args.disable {
        pass_toggles.insert(name, false);
    }

    // clap enforces both unless --decode-seed was given, which returned above.
    let (Some(source_path), Some(profile_path)) = (args.source, args.profile) else {
        error!("--source and --profile are required");
        std::process::exit(2);
    };

    let settings = RandomiserSettings {
        seed: args.seed,
        region: if args.japanese {
            Region::Japan
        } else {
            Region::Usa
        },
        source_path,
        prepatch_path: args.prepatch,
        profile_path,
        soundtrack_path: args.soundtracks,
        output_dir: args.output_dir,
        pass_toggles,
        emit_ips: args.emit_ips,
        debug: args.debug,
    };

    match run(settings) {
        Ok(report) => {
            info!(
                "seed {} ({}): {} passes, {} edits",
                report.seed,
                report.seed_code,
                report.passes.len(),
                report.edit_count
            );
            println!("{}", report.output_path.display());
        }
        Err(err) => {
            error!("{:?}: {err}", err.kind());
            std::process::exit(1);
        }
    }
}
