use clap::{Parser, ValueEnum};
use splat_lib::{convert, convert_async, ConvertOptions, PointOrder, Summary};
use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OrderArg {
    Importance,
    Depth,
}

impl From<OrderArg> for PointOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::Importance => PointOrder::Importance,
            OrderArg::Depth => PointOrder::Depth,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "PLY to Splat Converter",
    version = "1.0",
    about = "Converts Gaussian splat PLY files to the .splat format"
)]
struct Cli {
    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input PLY file."
    )]
    input: PathBuf,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        required = true,
        help = "Path to the output .splat file."
    )]
    output: PathBuf,

    #[arg(
        long = "order",
        value_name = "ORDER",
        value_enum,
        default_value = "importance",
        help = "Point ordering written to the output stream."
    )]
    order: OrderArg,

    #[arg(
        long = "flip-y",
        default_value = "false",
        help = "Negate the Y axis to match the target renderer's handedness."
    )]
    flip_y: bool,

    #[arg(
        long = "flip-z",
        default_value = "false",
        help = "Negate the Z axis to match the target renderer's handedness."
    )]
    flip_z: bool,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Enable asynchronous conversion mode."
    )]
    async_mode: bool,
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::init();
    let cli = Cli::parse();

    let options = ConvertOptions {
        order: cli.order.into(),
        flip_y: cli.flip_y,
        flip_z: cli.flip_z,
    };

    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    println!(
        "Mode: {}\nInput: {} | Output: {} | Order: {:?}",
        mode,
        cli.input.display(),
        cli.output.display(),
        options.order
    );

    let start = Instant::now();

    let summary: Summary = if cli.async_mode {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        rt.block_on(convert_async(&cli.input, &cli.output, &options))
            .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?
    } else {
        convert(&cli.input, &cli.output, &options)
            .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?
    };

    let elapsed = start.elapsed().as_millis();
    println!(
        "Points: {} in, {} written | {:.1} MB -> {:.1} MB | Conversion Time: {} ms",
        summary.input_count,
        summary.output_count,
        summary.input_size_bytes as f64 / 1e6,
        summary.output_size_bytes as f64 / 1e6,
        elapsed
    );
    println!("Successfully wrote to '{}'.", cli.output.display());

    Ok(())
}
