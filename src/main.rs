//! `scanline-png` command-line tool.
//!
//! - `scanline-png info <FILE>` - print the IHDR fields
//! - `scanline-png decode <FILE> [-o OUT]` - dump raw row-major pixel bytes
//! - `scanline-png create <OUT>` - write a flat-color test image

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use scanline_png::{encoder, Decoder, Limits};
use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scanline-png")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log more (-v for debug, -vv for trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Refuse images wider or taller than this many pixels.
    #[arg(long, global = true, default_value_t = 17_000)]
    max_dimension: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header of a PNG file.
    Info { file: PathBuf },

    /// Decode a PNG file into raw pixel bytes.
    ///
    /// Without --output, only the image size and first pixel are printed.
    Decode {
        file: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a single-color 8-bit RGB PNG.
    Create {
        output: PathBuf,

        #[arg(long, default_value_t = 10)]
        width: u32,

        #[arg(long, default_value_t = 6)]
        height: u32,

        /// Fill color as R,G,B.
        #[arg(long, value_parser = parse_color, default_value = "255,0,0")]
        color: [u8; 3],
    },
}

fn parse_color(value: &str) -> Result<[u8; 3], String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected R,G,B, got {:?}", value));
    }

    let mut color = [0u8; 3];
    for (channel, part) in color.iter_mut().zip(parts) {
        *channel = part.parse().map_err(|e| format!("invalid channel {:?}: {}", part, e))?;
    }

    Ok(color)
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so stdout stays clean for output.
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();
}

fn check_dimensions(width: u32, height: u32, max_dimension: u32) -> anyhow::Result<()> {
    if width == 0 || height == 0 {
        bail!("width and height must be non-zero");
    }
    if width > max_dimension || height > max_dimension {
        bail!("{}x{} exceeds --max-dimension {}", width, height, max_dimension);
    }

    Ok(())
}

fn open_decoder(path: &Path, max_dimension: u32) -> anyhow::Result<Decoder<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let limits = Limits { max_width: max_dimension, max_height: max_dimension };

    Ok(Decoder::new(BufReader::new(file)).with_limits(limits))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Info { file } => {
            let header = open_decoder(&file, cli.max_dimension)?
                .read_header()
                .with_context(|| format!("reading header of {}", file.display()))?;

            println!("width:              {}", header.width);
            println!("height:             {}", header.height);
            println!("bit depth:          {}", header.bit_depth as u8);
            println!("color type:         {:?}", header.color_type);
            println!("compression method: {:?}", header.compression_method);
            println!("filter method:      {:?}", header.filter_method);
            println!("interlace method:   {:?}", header.interlace_method);
            println!("bytes per pixel:    {}", header.bytes_per_pixel());
        },
        Commands::Decode { file, output } => {
            let image = open_decoder(&file, cli.max_dimension)?
                .decode()
                .with_context(|| format!("decoding {}", file.display()))?;

            match output {
                Some(output) => {
                    fs::write(&output, image.pixels())
                        .with_context(|| format!("writing {}", output.display()))?;
                    println!(
                        "wrote {} bytes ({}x{}, {} bytes per pixel) to {}",
                        image.pixels().len(),
                        image.width(),
                        image.height(),
                        image.bytes_per_pixel(),
                        output.display()
                    );
                },
                None => {
                    let (width, height) = (image.width(), image.height());
                    println!("{}x{}, {} bytes", width, height, image.pixels().len());
                    if let Some(pixel) = image.pixel(0, 0) {
                        println!("first pixel: {:?}", pixel);
                    }
                },
            }
        },
        Commands::Create { output, width, height, color } => {
            check_dimensions(width, height, cli.max_dimension)?;

            let output = if output.extension().map_or(true, |ext| ext != "png") {
                let mut name = output.into_os_string();
                name.push(".png");
                PathBuf::from(name)
            } else {
                output
            };

            let pixels = encoder::solid_rgb(width, height, color)?;
            let bytes = encoder::encode_rgb(width, height, &pixels)?;
            fs::write(&output, bytes).with_context(|| format!("writing {}", output.display()))?;
            println!("created {}", output.display());
        },
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colors() {
        assert_eq!(parse_color("255,0,0").unwrap(), [255, 0, 0]);
        assert_eq!(parse_color(" 1, 2 ,3").unwrap(), [1, 2, 3]);
        assert!(parse_color("1,2").is_err());
        assert!(parse_color("1,2,256").is_err());
        assert!(parse_color("a,b,c").is_err());
    }

    #[test]
    fn create_dimensions_are_bounded() {
        assert!(check_dimensions(10, 6, 17_000).is_ok());
        assert!(check_dimensions(17_000, 17_000, 17_000).is_ok());
        assert!(check_dimensions(0, 6, 17_000).is_err());
        assert!(check_dimensions(17_001, 6, 17_000).is_err());

        let err = check_dimensions(4_000_000_000, 4_000_000_000, 17_000).unwrap_err();
        assert!(err.to_string().contains("--max-dimension"));
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
