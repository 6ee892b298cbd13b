use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use tracing_subscriber::EnvFilter;

use motion_convert::MotionArchive;
use motion_convert::container::frames::MotionFrames;
use motion_convert::container::{archive, flat, frames};
use motion_convert::convert::{self, ArchiveOptions, FlatOptions};
use motion_convert::inspect::{ArchiveReport, Detail, FramesReport, save_keys};
use motion_convert::quaternion::QuatOrder;
use motion_convert::registry::{Representation, RobotVariant};

#[derive(Parser, Debug)]
#[command(name = "motion_convert", about = "Convert humanoid motion clips between containers")]
struct Cli {
    /// Log conversion steps to stderr
    #[arg(long, global = true)]
    verbose_log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flatten a simulator archive into a CSV motion file
    NpzToCsv {
        #[arg(long)]
        input_npz: PathBuf,
        #[arg(long, value_enum)]
        robot: RobotVariant,
        /// Defaults to the input path with a .csv extension
        #[arg(long)]
        output_csv: Option<PathBuf>,
        #[arg(long, default_value_t = 50.0)]
        input_fps: f64,
        #[arg(long, default_value_t = 50.0)]
        output_fps: f64,
        /// Root height used when the archive has no body poses
        #[arg(long, default_value_t = 0.85)]
        root_height: f32,
    },
    /// Build a simulator archive from a pickled frame dictionary
    PklToNpz {
        #[arg(long)]
        motion_file: PathBuf,
        /// Defaults to the input path with a .npz extension
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        target_frames: Option<usize>,
        #[arg(long, default_value_t = 30)]
        num_bodies: usize,
        /// Layout of root_rot in the pickle
        #[arg(long, value_enum, default_value_t = QuatOrder::Xyzw)]
        quat_order: QuatOrder,
    },
    /// Reorder archive joints from MuJoCo to simulator order
    MujocoToSim {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, value_enum)]
        robot: RobotVariant,
        /// Defaults to <input stem>_isaac.npz next to the input
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Describe the fields of an archive
    CheckNpz {
        #[arg(short = 'f', long)]
        motion_file: PathBuf,
        /// Only list the field names
        #[arg(short, long)]
        brief: bool,
        /// Write the field names to this file
        #[arg(short, long)]
        save_keys: Option<PathBuf>,
        /// Skip fields that cannot be loaded instead of failing
        #[arg(long)]
        allow_pickle: bool,
        /// Show statistics and previews
        #[arg(short, long)]
        verbose: bool,
    },
    /// Describe the structure of a pickled frame dictionary
    CheckPkl {
        #[arg(long)]
        motion_file: PathBuf,
        #[arg(long)]
        analyze_frames: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Conversions skip fields they cannot load; only required ones are fatal.
fn read_lenient(input: &Path) -> Result<MotionArchive> {
    archive::read_with(input, archive::ReadOptions { allow_pickle: true })
        .with_context(|| format!("loading {}", input.display()))
}

fn npz_to_csv(input: &Path, output: Option<PathBuf>, options: &FlatOptions) -> Result<()> {
    let output = output.unwrap_or_else(|| input.with_extension("csv"));
    let archive = read_lenient(input)?;
    let conversion = convert::archive_to_flat(&archive, options)
        .with_context(|| format!("flattening {}", input.display()))?;
    let motion = conversion.output;
    let order_path = flat::write(&output, &motion).with_context(|| format!("writing {}", output.display()))?;

    println!("Wrote {}", output.display());
    println!("  frames: {}", motion.frame_count());
    println!("  columns: {} (3 position + 4 quaternion + {} joints)", motion.data.ncols(), options.variant.joint_count());
    println!("  joint order: {}", order_path.display());
    if !conversion.warnings.is_empty() {
        println!("  warnings: {}", conversion.warnings.len());
    }
    println!("First rows:");
    for row in motion.data.rows().into_iter().take(3) {
        println!("  {}", row.iter().map(|v| format!("{v:.6}")).join(","));
    }
    Ok(())
}

fn pkl_to_npz(input: &Path, output: Option<PathBuf>, options: &ArchiveOptions) -> Result<()> {
    let output = output.unwrap_or_else(|| input.with_extension("npz"));
    let object = frames::read(input).with_context(|| format!("loading {}", input.display()))?;
    let dict = object.as_dict().with_context(|| format!("reading {}", input.display()))?;
    let motion = MotionFrames::try_from(dict).with_context(|| format!("reading {}", input.display()))?;
    let conversion = convert::frames_to_archive(&motion, options)?;
    archive::write(&output, &conversion.output).with_context(|| format!("writing {}", output.display()))?;

    println!("Wrote {}", output.display());
    println!("  source frames: {}, joints: {}, fps: {}", motion.frame_count(), motion.joint_count(), motion.fps);
    for (name, data) in conversion.output.iter() {
        println!("  {name}: {:?} {}", data.shape(), data.dtype());
    }
    Ok(())
}

fn default_simulator_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}_isaac.npz"))
}

fn mujoco_to_sim(input: &Path, output: Option<PathBuf>, variant: RobotVariant) -> Result<()> {
    let output = output.unwrap_or_else(|| default_simulator_output(input));
    let source = read_lenient(input)?;
    let conversion = convert::mujoco_to_simulator(&source, variant)
        .with_context(|| format!("remapping {}", input.display()))?;
    let remapped = conversion.output;
    archive::write(&output, &remapped.archive).with_context(|| format!("writing {}", output.display()))?;

    let mujoco = variant.joint_names(Representation::Mujoco);
    let simulator = variant.joint_names(Representation::Simulator);
    println!("Wrote {}", output.display());
    println!("Mapping ({} of {} joints):", remapped.mapping.mapped_count(), simulator.len());
    for (i, source) in remapped.mapping.iter().enumerate() {
        match source {
            Some(j) => println!("  simulator {i:2} <- mujoco {j:2}  {}", mujoco[j]),
            None => println!("  simulator {i:2} <- (zero)     {}", simulator[i]),
        }
    }
    Ok(())
}

fn check_npz(
    path: &Path,
    detail: Detail,
    keys_path: Option<PathBuf>,
    allow_pickle: bool,
) -> Result<()> {
    let archive = archive::read_with(path, archive::ReadOptions { allow_pickle })
        .with_context(|| format!("loading {}", path.display()))?;
    print!("{}", ArchiveReport::new(&archive, path).render(detail));
    if let Some(keys_path) = keys_path {
        save_keys(&keys_path, &archive).with_context(|| format!("writing {}", keys_path.display()))?;
        println!("Keys saved to: {}", keys_path.display());
    }
    Ok(())
}

fn check_pkl(path: &Path, analyze_frames: bool) -> Result<()> {
    let object = frames::read(path).with_context(|| format!("loading {}", path.display()))?;
    print!("{}", FramesReport::new(&object, path));
    if analyze_frames {
        if let Ok(dict) = object.as_dict() {
            match FramesReport::frames_analysis(dict) {
                Some(analysis) => print!("{analysis}"),
                None => println!("\nno 'frames' key found"),
            }
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::NpzToCsv {
            input_npz,
            robot,
            output_csv,
            input_fps,
            output_fps,
            root_height,
        } => {
            let mut options = FlatOptions::new(robot);
            options.input_fps = input_fps;
            options.output_fps = output_fps;
            options.root_pose.position.z = root_height;
            npz_to_csv(&input_npz, output_csv, &options)
        }
        Command::PklToNpz {
            motion_file,
            output,
            target_frames,
            num_bodies,
            quat_order,
        } => {
            let options = ArchiveOptions {
                target_frames,
                num_bodies,
                quat_order,
            };
            pkl_to_npz(&motion_file, output, &options)
        }
        Command::MujocoToSim { input, robot, output } => mujoco_to_sim(&input, output, robot),
        Command::CheckNpz {
            motion_file,
            brief,
            save_keys,
            allow_pickle,
            verbose,
        } => {
            let detail = match (brief, verbose) {
                (true, _) => Detail::Brief,
                (false, true) => Detail::Verbose,
                (false, false) => Detail::Normal,
            };
            check_npz(&motion_file, detail, save_keys, allow_pickle)
        }
        Command::CheckPkl {
            motion_file,
            analyze_frames,
        } => check_pkl(&motion_file, analyze_frames),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose_log);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
