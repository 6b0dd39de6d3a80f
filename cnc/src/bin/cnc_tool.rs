//! Command-line tool for driving the button-pressing mill.
//!
//! Subcommands mirror the [`Mill`] operations:
//! - `position`: Query the current tool position
//! - `set-home`: Treat the current position as (0, 0, 0)
//! - `home`: Raise the tool and travel to xy home
//! - `raise` / `lower`: Move the tool to the safe height / to z=0
//! - `go-to`: Travel to named locations
//! - `direct`: Move straight to a location's absolute coordinates
//! - `press`: Press named locations in order
//! - `gcode`: Stream a G-code file to the controller unverified
//!
//! `--simulate` runs against an in-process simulated controller instead of a
//! serial port, which is handy for checking a location file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cnc::grbl::sim::SimulatedMill;
use cnc::grbl::{Clock, Connect, Mill, MillConfig, DEFAULT_BAUD, DEFAULT_XY_SPEED, DEFAULT_Z_SPEED};
use tracing::info;

/// GRBL button-press mill control tool
#[derive(Parser, Debug)]
#[command(name = "cnc_tool")]
#[command(about = "Drive a GRBL mill to press buttons on a device under test")]
#[command(version)]
struct Args {
    /// Serial device of the controller
    #[arg(long, global = true, default_value = "/dev/ttyACM0")]
    device: String,

    /// Serial baud rate
    #[arg(long, global = true, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// JSON file with named device locations
    #[arg(short, long, global = true)]
    locations: Option<PathBuf>,

    /// Feed rate for xy travel
    #[arg(long, global = true, default_value_t = DEFAULT_XY_SPEED)]
    xy_speed: f64,

    /// Feed rate for raising and lowering the tool
    #[arg(long, global = true, default_value_t = DEFAULT_Z_SPEED)]
    z_speed: f64,

    /// Seconds a move may take to complete
    #[arg(short, long, global = true, default_value = "10", value_parser = parse_timeout)]
    timeout: Duration,

    /// Use a simulated controller instead of the serial port
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query the current tool position
    Position,

    /// Treat the current tool position as home (0, 0, 0)
    SetHome,

    /// Raise the tool and travel to xy home
    Home {
        /// Also lower the tool to z=0 once home
        #[arg(long)]
        lower: bool,
    },

    /// Raise the tool to the safe height
    Raise,

    /// Lower the tool to z=0
    Lower,

    /// Travel to named locations in order, relative to device_location
    GoTo {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Move directly to a location's absolute coordinates without raising first
    Direct { name: String },

    /// Press named locations in order
    Press {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Send each line of a G-code file without verification
    Gcode { file: PathBuf },
}

/// Parse `--timeout` seconds, rejecting values no move could converge within.
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{s:?} is not a number: {e}"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("timeout must be a positive number of seconds, got {s}"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("timeout {s} out of range: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = MillConfig::new(&args.device);
    config.baud = args.baud;
    config.xy_speed = args.xy_speed;
    config.z_speed = args.z_speed;
    config.timeout = args.timeout;

    if args.simulate {
        info!("Using simulated controller");
        let mut mill = Mill::new(SimulatedMill::new(), &config)?;
        run(&mut mill, &args)
    } else {
        let mut mill = Mill::open(config)?;
        run(&mut mill, &args)
    }
}

fn run<C: Connect, K: Clock>(mill: &mut Mill<C, K>, args: &Args) -> Result<()> {
    if let Some(path) = &args.locations {
        mill.load_locations(path)
            .with_context(|| format!("Loading locations from {}", path.display()))?;
    }

    match &args.command {
        Command::Position => {
            let position = mill.request_position()?;
            println!("{position}");
        }
        Command::SetHome => mill.set_home()?,
        Command::Home { lower } => {
            mill.go_to_home()?;
            if *lower {
                mill.lower_tool()?;
            }
        }
        Command::Raise => mill.raise_tool()?,
        Command::Lower => mill.lower_tool()?,
        Command::GoTo { names } => {
            for name in names {
                mill.go_to(name)?;
            }
        }
        Command::Direct { name } => mill.direct_go_to(name)?,
        Command::Press { names } => mill.press(names.as_slice())?,
        Command::Gcode { file } => mill.execute_gcode_file(file)?,
    }

    let position = mill.request_position()?;
    info!("Done at {}", position);
    mill.close_connection()?;
    Ok(())
}
