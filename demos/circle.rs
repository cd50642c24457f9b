//! Frame-by-frame output of a rotating circle to a simulated DAC.
//!
//! Walks the whole device lifecycle: enumerate, open, start, then a
//! wait-for-ready / write-frame loop, stop and close.
//!
//! Run with: `cargo run --example circle -- --frames 500 --rate 30000`

use clap::{Parser, ValueEnum};
use laser_frame_dac::protocols::simulated::{SimulatedDevice, SimulatedProvider};
use laser_frame_dac::{DacContext, DeviceHandle, Frame, Point, Result, API_VERSION};
use std::f64::consts::TAU;
use std::io::Write;

#[derive(Parser)]
#[command(about = "Stream a circle to a simulated laser DAC")]
struct Args {
    /// Number of frames to show
    #[arg(short, long, default_value_t = 1000)]
    frames: u64,

    /// Points per frame
    #[arg(short, long, default_value_t = 200)]
    points: usize,

    /// Sample rate in Hz
    #[arg(short, long, default_value_t = 20_000)]
    rate: u32,

    /// Number of simulated devices to enumerate
    #[arg(long, default_value_t = 1)]
    devices: usize,

    /// How frames are fed to the device
    #[arg(long, value_enum, default_value_t = Mode::Loop)]
    mode: Mode,
}

#[derive(Copy, Clone, ValueEnum)]
enum Mode {
    /// Explicit wait_for_ready / write_frame loop
    Loop,
    /// Callback-driven `DacContext::run`
    Run,
}

/// White circle, rotated by `frame` steps so consecutive frames differ.
fn circle_points(n_points: usize, frame: u64) -> Vec<Point> {
    let offset = (frame % 360) as f64 / 360.0 * TAU;
    (0..n_points)
        .map(|i| {
            let phi = i as f64 * TAU / n_points as f64 + offset;
            let x = (phi.sin() * 32767.5 - 0.5) as i16;
            let y = (phi.cos() * 32767.5 - 0.5) as i16;
            Point::new(x, y, 65535, 65535, 65535, 65535).with_user(65535, 65535)
        })
        .collect()
}

fn stream_loop(ctx: &DacContext, handle: DeviceHandle, args: &Args) -> Result<()> {
    ctx.start_output(handle)?;

    for frame in 0..args.frames {
        ctx.wait_for_ready(handle, -1)?;
        print!("Showing frame {}.\r", frame + 1);
        std::io::stdout().flush().ok();
        ctx.write_frame(handle, &circle_points(args.points, frame), args.rate, 0)?;
    }
    println!();

    ctx.stop_output(handle)
}

fn stream_run(ctx: &DacContext, handle: DeviceHandle, args: &Args) -> Result<()> {
    let exit = ctx.run(handle, |frame| {
        (frame < args.frames).then(|| Frame::new(circle_points(args.points, frame), args.rate))
    })?;
    println!("Run ended: {:?}", exit);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let provider = (1..=args.devices).fold(SimulatedProvider::new(), |provider, i| {
        provider.with_device(SimulatedDevice::new(format!("sim-{}", i)))
    });
    let ctx = DacContext::new(provider);

    println!("API Version {}.{:02}", API_VERSION >> 8, API_VERSION & 0xFF);

    let count = ctx.enumerate_devices();
    if count == 0 {
        println!("No devices found.");
        return Ok(());
    }

    println!("Found {} device(s):", count);
    for i in 0..count {
        println!(" {}: {}", i, ctx.device_id(i)?);
    }
    println!();

    let device_id = ctx.device_id(0)?;
    println!("Opening device: {}", device_id);
    let handle = ctx.open_device(&device_id)?;
    println!(
        "Label: {}, max sample rate: {} Hz, {} frame buffers",
        ctx.device_label(handle)?,
        ctx.max_sample_rate(handle)?,
        ctx.config().buffer_depth
    );

    println!("Starting laser.");
    match args.mode {
        Mode::Loop => stream_loop(&ctx, handle, &args)?,
        Mode::Run => stream_run(&ctx, handle, &args)?,
    }
    println!("Stopped laser.");

    let stats = ctx.session(handle)?.stats();
    println!(
        "Frames submitted: {}, superseded: {}, points written: {}",
        stats.frames_submitted, stats.frames_superseded, stats.points_written
    );

    println!("Closing device.");
    ctx.close_device(handle)?;
    ctx.exit();
    Ok(())
}
