use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use env_logger::Builder;
use log::LevelFilter;

use pcd_exporter::tileset::RefineMode;

mod files;
mod merge;
mod tiler;
mod transform;
mod verify;

#[derive(Parser, Debug)]
#[command(
    name = "pnts-tiler",
    about = "Converts LAS point clouds into Cesium 3D Tiles point tilesets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index LAS files into per-chunk 3D Tiles tilesets
    Index(IndexArgs),
    /// Consolidate the per-chunk tilesets under a folder into one parent tileset
    MergeChildren(MergeArgs),
    /// Walk a folder tree bottom-up, merging chunk tilesets level by level
    MergeTree(MergeArgs),
    /// Run a LAS file through the ingestion pipeline and check its records
    VerifyLas(VerifyArgs),
    /// Check that the LAS companions under a folder concatenate cleanly
    VerifyLasMerge(VerifyArgs),
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Input LAS file, or folder when --folder is given
    #[arg(short, long)]
    input: PathBuf,

    /// EPSG code of the input points
    #[arg(short = 'e', long, default_value_t = 4326)]
    srid: u16,

    /// Assume LAS colors are encoded in eight bits instead of sixteen
    #[arg(short = 'b', long = "8bit")]
    eight_bit: bool,

    /// Vertical offset to apply to points, in meters
    #[arg(short = 'z', long, default_value_t = 0.0)]
    zoffset: f64,

    /// Correct geoid elevations to ellipsoidal heights
    #[arg(short = 'g', long)]
    geoid: bool,

    /// Geoid undulation grid (ESRI ASCII raster), required with --geoid
    #[arg(long)]
    geoid_model: Option<PathBuf>,

    /// Process every LAS file found in the input folder
    #[arg(short = 'f', long)]
    folder: bool,

    /// Look for LAS files in subfolders as well
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Max grid cell size, in meters; roughly the coarsest sample spacing
    #[arg(short = 'x', long, default_value_t = 5.0)]
    grid_max_size: f64,

    /// Min grid cell size, in meters; cells below it keep every point
    #[arg(short = 'n', long, default_value_t = 0.15)]
    grid_min_size: f64,

    /// ADD keeps child tiles incremental, REPLACE makes them self-contained
    #[arg(long, default_value = "ADD", value_parser = parse_refine_mode)]
    refine_mode: RefineMode,

    /// Compress point payloads with the external Draco encoder
    #[arg(long)]
    draco: bool,

    /// Path to the draco_encoder binary
    #[arg(long)]
    draco_encoder_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct IndexArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output folder for the tileset data
    #[arg(short, long)]
    output: PathBuf,

    /// Minimum number of points per node for the merge pass
    #[arg(short = 'm', long, default_value_t = 10_000)]
    points_min_num: u32,

    /// Maximum number of points per node for the split pass
    #[arg(long, default_value_t = 50_000)]
    points_max_num: u32,

    /// Derive geometric errors from the chunk's bounding box edges
    #[arg(
        short = 'd',
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 1
    )]
    use_edge_calculate: bool,

    /// Divisor of the edge-scaled geometric error, tied to the viewer's
    /// maximum screen space error
    #[arg(long, default_value_t = 32.0)]
    geometric_error_scale: f64,
}

#[derive(Args, Debug, Clone)]
struct MergeArgs {
    /// Folder whose chunk tilesets get a common parent
    #[arg(short, long)]
    input: PathBuf,

    /// EPSG code of the input points
    #[arg(short = 'e', long, default_value_t = 4326)]
    srid: u16,

    /// Assume LAS colors are encoded in eight bits instead of sixteen
    #[arg(short = 'b', long = "8bit")]
    eight_bit: bool,

    /// Vertical offset to apply to points, in meters
    #[arg(short = 'z', long, default_value_t = 0.0)]
    zoffset: f64,

    /// Correct geoid elevations to ellipsoidal heights
    #[arg(short = 'g', long)]
    geoid: bool,

    /// Geoid undulation grid (ESRI ASCII raster), required with --geoid
    #[arg(long)]
    geoid_model: Option<PathBuf>,

    /// Max grid cell size for the merged root, in meters
    #[arg(short = 'x', long, default_value_t = 10.0)]
    grid_max_size: f64,

    /// Min grid cell size for the merged root, in meters
    #[arg(short = 'n', long, default_value_t = 5.0)]
    grid_min_size: f64,

    /// ADD keeps child tiles incremental, REPLACE makes them self-contained
    #[arg(long, default_value = "ADD", value_parser = parse_refine_mode)]
    refine_mode: RefineMode,

    /// Compress point payloads with the external Draco encoder
    #[arg(long)]
    draco: bool,

    /// Path to the draco_encoder binary
    #[arg(long)]
    draco_encoder_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    #[command(flatten)]
    common: CommonArgs,
}

fn parse_refine_mode(value: &str) -> Result<RefineMode, String> {
    value.parse()
}

fn validate_common(common: &CommonArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        common.input.exists(),
        "input file/folder not found: {}",
        common.input.display()
    );
    anyhow::ensure!(
        common.grid_min_size <= common.grid_max_size,
        "grid-max-size parameter cannot be lower than grid-min-size parameter"
    );
    if common.draco {
        anyhow::ensure!(
            common.draco_encoder_path.is_some(),
            "--draco requires --draco-encoder-path"
        );
    }
    if common.geoid {
        anyhow::ensure!(
            common.geoid_model.is_some(),
            "--geoid requires --geoid-model"
        );
    }
    Ok(())
}

fn validate_merge(args: &MergeArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.input.is_dir(),
        "input folder not found: {}",
        args.input.display()
    );
    anyhow::ensure!(
        args.grid_min_size <= args.grid_max_size,
        "grid-max-size parameter cannot be lower than grid-min-size parameter"
    );
    if args.draco {
        anyhow::ensure!(
            args.draco_encoder_path.is_some(),
            "--draco requires --draco-encoder-path"
        );
    }
    if args.geoid {
        anyhow::ensure!(
            args.geoid_model.is_some(),
            "--geoid requires --geoid-model"
        );
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Index(args) => {
            validate_common(&args.common)?;
            anyhow::ensure!(
                args.points_max_num >= 8 * args.points_min_num,
                "points-max-num must be at least 8 times points-min-num"
            );
            tiler::run_index(&args)
        }
        Command::MergeChildren(args) => {
            validate_merge(&args)?;
            merge::run_merge_children(&args)
        }
        Command::MergeTree(args) => {
            validate_merge(&args)?;
            merge::run_merge_tree(&args)
        }
        Command::VerifyLas(args) => {
            validate_common(&args.common)?;
            verify::run_verify_las(&args)
        }
        Command::VerifyLasMerge(args) => {
            validate_common(&args.common)?;
            verify::run_verify_las_merge(&args)
        }
    }
}

fn main() -> ExitCode {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
