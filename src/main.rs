//! `focus_tool`: exercise the focus stack against a simulated sensor.
//!
//! Every run builds a fresh [`MockSensor`] whose synthetic sharpness peaks at
//! `--peak`, drives it through one scenario, and reports what the driver did.
//! Delays are recorded instead of slept, so the summary shows the time the
//! scenario would take on hardware.
//!
//! # Usage
//!
//! ```bash
//! focus_tool calibrate --peak 380 --noise 40 --seed 7
//! focus_tool search --start 300 --window 6
//! focus_tool map 150 --config config/ov5640.toml
//! focus_tool autofocus --polls 12
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use tracing::info;

use ov5640_focus::logging::{self, OutputFormat};
use ov5640_focus::mock::{AfBehavior, MockSensor, RecordingDelay, SyntheticSharpness};
use ov5640_focus::{FocusConfig, FocusDriver, FocusPosition, SlewRate};

type SimDriver = FocusDriver<MockSensor, RecordingDelay>;

#[derive(Parser)]
#[command(name = "focus_tool")]
#[command(about = "Drive the OV5640 focus stack against a simulated sensor", long_about = None)]
struct Cli {
    /// Optional driver config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Lens position of peak sharpness in the simulation
    #[arg(long, global = true, default_value_t = 420)]
    peak: FocusPosition,

    /// Sharpness noise amplitude (0 disables noise)
    #[arg(long, global = true, default_value_t = 0)]
    noise: u32,

    /// Seed for the noise and the generated firmware image
    #[arg(long, global = true, default_value_t = 5640)]
    seed: u64,

    /// Log level override
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the chip, upload firmware and initialise manual focus
    Init {
        /// Size of the generated firmware image in bytes
        #[arg(long, default_value_t = 4096)]
        image_len: usize,
    },

    /// Move the lens to a position
    Set {
        /// Target position (saturated to 0..=1023)
        position: FocusPosition,

        /// Slew-rate code 0..=7
        #[arg(long)]
        slew: Option<u8>,
    },

    /// Step the lens from the default position
    Step {
        /// Logical steps of 10 units (negative moves toward code 0)
        #[arg(allow_hyphen_values = true)]
        steps: i8,
    },

    /// Calibrate near and far limits
    Calibrate,

    /// Refine focus around a starting position
    Search {
        /// Starting position
        #[arg(long, default_value_t = 512)]
        start: FocusPosition,

        /// Half-width of the window in units of 10
        #[arg(long, default_value_t = 5)]
        window: u8,

        /// Calibrate the range first
        #[arg(long)]
        calibrate: bool,
    },

    /// Map an object distance and drive the lens there
    Map {
        /// Distance in millimetres
        distance_mm: u32,
    },

    /// Run co-processor autofocus
    Autofocus {
        /// Status polls before the simulated lock
        #[arg(long, default_value_t = 8)]
        polls: u32,

        /// Start continuous autofocus instead of a single pass
        #[arg(long)]
        continuous: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FocusConfig::load(path)?,
        None => FocusConfig::default(),
    };

    let mut log = config.log.clone();
    if let Some(level) = &cli.log_level {
        log.level = level.clone();
    }
    if cli.json {
        log.format = OutputFormat::Json;
    }
    logging::init(&log)?;

    let sensor = MockSensor::new();
    let mut driver = FocusDriver::new(sensor.clone(), RecordingDelay::default(), &config)
        .context("Failed to build focus driver")?;
    let mut metric = sensor.sharpness_peak(cli.peak).with_noise(cli.seed, cli.noise);

    match cli.command {
        Commands::Init { image_len } => {
            let image = firmware_image(cli.seed, image_len);
            let chip_id = driver.probe_chip_id()?;
            println!("chip id: {chip_id:#06x}");
            driver.init_firmware(&image)?;
            println!("firmware: {} bytes, status {:?}", image.len(), driver.query_status()?);
            driver.init_manual_focus()?;
            println!("manual focus ready at {}", driver.position()?);
        }
        Commands::Set { position, slew } => {
            let stored = match slew {
                Some(code) => driver.set_position_with_slew(position, SlewRate::from_code(code)?)?,
                None => driver.set_position(position)?,
            };
            println!("position: {stored} (read back {})", driver.position()?);
        }
        Commands::Step { steps } => {
            driver.init_manual_focus()?;
            let position = driver.step_by(steps)?;
            println!("stepped {steps} from 512 to {position}");
        }
        Commands::Calibrate => {
            driver.init_manual_focus()?;
            let range = calibrate(&mut driver, &mut metric)?;
            println!("range: {}..={}", range.near_limit, range.far_limit);
        }
        Commands::Search {
            start,
            window,
            calibrate: with_calibration,
        } => {
            driver.init_manual_focus()?;
            if with_calibration {
                calibrate(&mut driver, &mut metric)?;
            }
            driver.set_position(start)?;
            let best = driver.find_optimal_focus(&mut metric, window)?;
            println!("best focus: {best} (searched +/-{} around {start})", u32::from(window) * 10);
        }
        Commands::Map { distance_mm } => {
            let raw = driver.map_distance(distance_mm);
            let position = driver.focus_at_distance(distance_mm)?;
            println!(
                "{distance_mm} mm -> {raw} ({:?}), lens at {position}",
                driver.convention()
            );
        }
        Commands::Autofocus { polls, continuous } => {
            sensor.set_af_behavior(AfBehavior::LockAfter {
                polls,
                position: cli.peak,
            });
            driver.init_firmware(&firmware_image(cli.seed, 256))?;
            if continuous {
                driver.continuous_autofocus()?;
                println!("continuous autofocus: {:?}", driver.query_status()?);
            } else {
                let position = driver.single_autofocus()?;
                println!("autofocus locked at {position}");
            }
        }
    }

    info!(mode = %driver.mode(), "Scenario finished");
    let (_, delay) = driver.into_parts();
    println!(
        "simulated wait: {} ms over {} delays, {} register writes",
        delay.total_ms(),
        delay.calls(),
        sensor.writes().len()
    );
    Ok(())
}

fn calibrate(driver: &mut SimDriver, metric: &mut SyntheticSharpness) -> Result<ov5640_focus::FocusRange> {
    driver.calibrate_range(metric).context("Range calibration failed")
}

fn firmware_image(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}
