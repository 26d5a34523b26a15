use clap::Parser;
use hdr_resize::error::ResizeError;
use hdr_resize::imaging::{Quality, RustBackend};
use hdr_resize::pipeline::{self, ResizeRequest};
use hdr_resize::{config, output};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

fn version_string() -> &'static str {
    let on_tag = env!("HDR_RESIZE_ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("HDR_RESIZE_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "hdr-resize")]
#[command(about = "Resize an HDR photo and its gain map together")]
#[command(long_about = "\
Resize an HDR photo and its gain map together

The primary image is resampled to the requested size; the gain map is
regenerated at half that size so HDR displays keep rendering it correctly.

Size expressions:
  2000x1500   exact size
  2000x       width 2000, height keeps the aspect ratio
  x1500       height 1500, width keeps the aspect ratio

Output container is chosen by extension: .jpg/.jpeg (Ultra HDR) or .heic.")]
#[command(version = version_string())]
struct Cli {
    /// Source HDR image
    #[arg(short, long)]
    input: PathBuf,

    /// Destination path (.jpg, .jpeg or .heic)
    #[arg(short, long)]
    output: PathBuf,

    /// Target size: WxH, Wx or xH
    #[arg(short, long = "size-string")]
    size: String,

    /// Lossy quality, 1-100 [default: 85, or output.quality from --config]
    #[arg(short, long, allow_negative_numbers = true)]
    quality: Option<i64>,

    /// TOML config file with defaults for quality and resample filter
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write the regenerated gain map as a grayscale JPEG
    #[arg(long)]
    gain_map_preview: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("hdr-resize: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ResizeError> {
    let config = config::load_config(cli.config.as_deref())?;
    let quality = Quality::new(cli.quality.unwrap_or(i64::from(config.output.quality)))?;
    let backend = RustBackend::with_filter(config.resample.filter);

    let request = ResizeRequest {
        input: cli.input,
        output: cli.output,
        size: cli.size,
        quality,
        gain_map_preview: cli.gain_map_preview,
    };
    let report = pipeline::resize_image(&backend, &request)?;
    output::print_report(&report);
    Ok(())
}

/// Log to stderr so stdout carries only the summary.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .init();
}
