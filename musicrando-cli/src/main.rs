use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};

use musicrando_core::{embed, run, RandomiserSettings, DEFAULT_RETRIES};

const FIRST_FREE_BANK: u8 = 0x2b;
const END_FREE_BANK: u8 = 0x3c;

#[derive(Debug, Parser)]
#[command(name = "crystalis-music", version, about = "Crystalis music randomiser")]
struct Args {
    /// Source ROM (384 KiB or already-expanded 640 KiB).
    input: PathBuf,

    seed: Option<u64>,

    /// Where to write the result. Defaults to "<name> Music.<ext>" next to the input.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    retries: usize,

    /// IPS patch applied to the expanded ROM before songs are placed.
    #[arg(long)]
    patch: Option<PathBuf>,

    /// JSON layout overriding the built-in Crystalis tables.
    #[arg(long)]
    layout: Option<PathBuf>,

    /// JSON track library; may be given more than once.
    #[arg(long = "library")]
    libraries: Vec<PathBuf>,

    #[arg(long, default_value_t = false)]
    no_builtin: bool,

    #[arg(long, default_value_t = false)]
    include_diverse: bool,

    #[arg(long, default_value_t = false)]
    include_unsafe: bool,

    /// Print the result as JSON after the log.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let seed = args.seed.unwrap_or_else(|| rand::random::<u32>() as u64);
    info!(seed, "starting");

    let settings = RandomiserSettings {
        seed,
        retries: args.retries,
        include_builtin: !args.no_builtin,
        include_diverse: args.include_diverse,
        include_unsafe: args.include_unsafe,
        libraries: args.libraries,
        patch_path: args.patch,
        layout_path: args.layout,
        free_banks: (FIRST_FREE_BANK..END_FREE_BANK).collect(),
        input_path: args.input,
        output_path: args.output,
    };

    match run(settings) {
        Ok(outcome) => {
            println!("{}", outcome.result.log);
            info!(path = %outcome.output_path.display(), "done");
            if args.json {
                match embed::success_json(&outcome.result) {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        error!("{err}");
                        std::process::exit(1);
                    }
                }
            }
        }
        Err(err) => {
            eprintln!("ERROR: {err}");
            if args.json {
                println!("{}", embed::failure_json(&err.to_string()));
            }
            std::process::exit(1);
        }
    }
}
