//! End-to-end tests against the simulated device.
//!
//! These drive the public context API through the full
//! enumerate -> open -> start -> wait/write -> stop -> close lifecycle and
//! check what the simulated device actually received.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use laser_frame_dac::protocols::simulated::{DeviceMonitor, SimulatedDevice, SimulatedProvider};
use laser_frame_dac::{
    DacContext, DeviceCapabilities, DeviceDiscovery, DeviceHandle, Error, Frame, Point,
    SessionConfig, SessionState, UniverseDirection, WaitTimeout,
};

// =============================================================================
// Helpers
// =============================================================================

fn single_device(device: SimulatedDevice) -> (DacContext, DeviceMonitor) {
    let id = device.id().to_string();
    let provider = SimulatedProvider::new().with_device(device);
    let monitor = provider.monitor(&id).expect("device registered");
    (DacContext::new(provider), monitor)
}

/// A device that takes at most 10 points per write into a 10-point FIFO,
/// so the output worker is paced tightly by the sample rate.
fn slow_device(id: &str) -> SimulatedDevice {
    SimulatedDevice::new(id)
        .with_caps(DeviceCapabilities {
            max_sample_rate: 100_000,
            max_points_per_frame: 65_535,
            max_points_per_write: 10,
        })
        .with_fifo_points(10)
}

fn circle(points: usize, tag: u16) -> Vec<Point> {
    (0..points)
        .map(|i| {
            let angle = i as f32 / points as f32 * std::f32::consts::TAU;
            Point::new(
                (angle.cos() * 20_000.0) as i16,
                (angle.sin() * 20_000.0) as i16,
                tag,
                0,
                0,
                65535,
            )
        })
        .collect()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn open_started(ctx: &DacContext, id: &str) -> DeviceHandle {
    let handle = ctx.open_device(id).expect("open");
    ctx.start_output(handle).expect("start");
    handle
}

// =============================================================================
// Lifecycle Scenarios
// =============================================================================

#[test]
fn test_open_start_write_stop_close() {
    let (ctx, monitor) = single_device(SimulatedDevice::new("dev-1"));
    assert_eq!(ctx.enumerate_devices(), 1);
    assert_eq!(ctx.device_id(0).unwrap(), "dev-1");

    let handle = open_started(&ctx, "dev-1");
    assert!(monitor.shutter_open());

    assert!(ctx.wait_for_ready(handle, -1).unwrap() >= 1);
    ctx.write_frame(handle, &circle(200, 65535), 20_000, 0)
        .unwrap();

    // The worker dequeues the frame and gives the slot back.
    assert!(ctx.wait_for_ready(handle, -1).unwrap() >= 1);
    assert!(wait_until(Duration::from_secs(5), || {
        ctx.wait_for_ready(handle, 0) == Ok(2)
    }));
    assert!(monitor.wait_until(Duration::from_secs(5), |m| m.points_written() >= 200));

    ctx.stop_output(handle).unwrap();
    assert!(!monitor.shutter_open());
    ctx.close_device(handle).unwrap();
    assert!(!monitor.is_connected());

    let first = &monitor.writes()[0];
    assert_eq!(first.sample_rate, 20_000);
    assert_eq!(first.points, circle(200, 65535));
}

#[test]
fn test_close_twice() {
    let (ctx, _monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = ctx.open_device("dev-1").unwrap();

    assert_eq!(ctx.close_device(handle), Ok(()));
    assert!(ctx.close_device(handle).unwrap_err().is_invalid_handle());
}

#[test]
fn test_close_while_started_is_refused() {
    let (ctx, monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = open_started(&ctx, "dev-1");

    assert!(ctx.close_device(handle).unwrap_err().is_invalid_handle());
    assert!(monitor.is_connected());
    assert_eq!(
        ctx.session(handle).unwrap().state(),
        SessionState::Started
    );

    ctx.stop_output(handle).unwrap();
    ctx.close_device(handle).unwrap();
}

#[test]
fn test_streaming_ops_outside_started_are_not_started() {
    let (ctx, _monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = ctx.open_device("dev-1").unwrap();
    let points = circle(50, 65535);

    for _ in 0..2 {
        assert_eq!(ctx.stop_output(handle), Err(Error::NotStarted));
        assert_eq!(ctx.wait_for_ready(handle, 0), Err(Error::NotStarted));
        assert_eq!(ctx.wait_for_ready(handle, -1), Err(Error::NotStarted));
        assert_eq!(ctx.wait_for_ready(handle, 10), Err(Error::NotStarted));
        assert_eq!(
            ctx.write_frame(handle, &points, 20_000, 0),
            Err(Error::NotStarted)
        );

        // Second round in Stopped state.
        ctx.start_output(handle).unwrap();
        ctx.stop_output(handle).unwrap();
    }

    // Non-streaming calls stay valid.
    assert_eq!(ctx.max_sample_rate(handle), Ok(100_000));
    assert!(ctx.device_label(handle).is_ok());
}

#[test]
fn test_start_twice_is_not_initialised() {
    let (ctx, _monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = open_started(&ctx, "dev-1");
    assert!(matches!(
        ctx.start_output(handle),
        Err(Error::NotInitialised(_))
    ));
    ctx.stop_output(handle).unwrap();
}

#[test]
fn test_open_unreachable_device() {
    let device = SimulatedDevice::new("dev-1");
    device.monitor().set_reachable(false);
    let (ctx, _monitor) = single_device(device);

    assert_eq!(ctx.enumerate_devices(), 0);
    assert!(ctx.open_device("dev-1").unwrap_err().is_io());
    assert!(ctx.open_handles().is_empty());
}

#[test]
fn test_open_across_providers() {
    let discovery = DeviceDiscovery::new()
        .with_provider(Box::new(SimulatedProvider::with_devices(["usb-1"])))
        .with_provider(Box::new(SimulatedProvider::with_devices(["net-1", "net-2"])));
    let ctx = DacContext::with_discovery(discovery);

    assert_eq!(ctx.enumerate_devices(), 3);
    let a = ctx.open_device("usb-1").unwrap();
    let b = ctx.open_device("net-2").unwrap();
    assert_ne!(a, b);
    assert_eq!(ctx.open_handles(), vec![a, b]);
}

// =============================================================================
// Frame Validation
// =============================================================================

#[test]
fn test_frame_validation_errors() {
    let (ctx, _monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = open_started(&ctx, "dev-1");

    let empty = ctx.write_frame(handle, &[], 20_000, 0).unwrap_err();
    assert!(matches!(empty, Error::ParameterInvalid(_)));

    let zero_rate = ctx.write_frame(handle, &circle(10, 1), 0, 0).unwrap_err();
    assert!(matches!(zero_rate, Error::ParameterOutOfRange(_)));

    let too_fast = ctx
        .write_frame(handle, &circle(10, 1), 100_001, 0)
        .unwrap_err();
    assert!(matches!(too_fast, Error::ParameterOutOfRange(_)));

    let too_long = ctx
        .write_frame(handle, &vec![Point::default(); 65_536], 20_000, 0)
        .unwrap_err();
    assert!(matches!(too_long, Error::ParameterOutOfRange(_)));

    assert_eq!(ctx.wait_for_ready(handle, 0), Ok(2));
    ctx.stop_output(handle).unwrap();
}

// =============================================================================
// Free Slot Accounting
// =============================================================================

#[test]
fn test_wait_poll_is_non_blocking() {
    let (ctx, _monitor) = single_device(slow_device("dev-1"));
    let handle = open_started(&ctx, "dev-1");

    // 10_000 points at 1 kHz keep the worker busy for ten seconds.
    ctx.write_frame(handle, &circle(10_000, 1), 1_000, 1).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        ctx.session(handle).unwrap().stats().frames_started == 1
    }));

    ctx.write_frame(handle, &circle(10, 2), 1_000, 1).unwrap();
    ctx.write_frame(handle, &circle(10, 3), 1_000, 1).unwrap();

    let started = Instant::now();
    assert_eq!(ctx.wait_for_ready(handle, 0), Ok(0));
    assert!(started.elapsed() < Duration::from_millis(50));

    // Timed wait gives up with 0.
    let started = Instant::now();
    assert_eq!(ctx.wait_for_ready(handle, 30), Ok(0));
    assert!(started.elapsed() >= Duration::from_millis(30));

    // No slot: submission fails fast.
    let err = ctx.write_frame(handle, &circle(10, 4), 1_000, 1).unwrap_err();
    assert!(matches!(err, Error::ParameterOutOfRange(_)));

    // Stop drops both queued frames and the streaming one promptly.
    let started = Instant::now();
    ctx.stop_output(handle).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(ctx.session(handle).unwrap().stats().frames_dropped, 3);
}

#[test]
fn test_blocking_wait_returns_when_slot_frees() {
    let (ctx, _monitor) = single_device(slow_device("dev-1"));
    let handle = open_started(&ctx, "dev-1");

    // About half a second of output.
    ctx.write_frame(handle, &circle(1_000, 1), 2_000, 1).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        ctx.wait_for_ready(handle, 0) == Ok(2)
    }));
    ctx.write_frame(handle, &circle(10, 2), 2_000, 1).unwrap();
    ctx.write_frame(handle, &circle(10, 3), 2_000, 1).unwrap();
    assert_eq!(ctx.wait_for_ready(handle, 0), Ok(0));

    let started = Instant::now();
    let free = ctx.wait_for_ready(handle, -1).unwrap();
    assert!(free >= 1);
    assert!(started.elapsed() >= Duration::from_millis(20));

    ctx.stop_output(handle).unwrap();
}

#[test]
fn test_submit_then_drain_restores_free_slots() {
    let (ctx, monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = open_started(&ctx, "dev-1");
    let before = ctx.wait_for_ready(handle, 0).unwrap();

    for tag in 1..=4u16 {
        ctx.wait_for_ready(handle, -1).unwrap();
        ctx.write_frame(handle, &circle(100, tag), 40_000, 1).unwrap();
    }

    let session = ctx.session(handle).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        session.stats().frames_completed == 4
    }));
    assert_eq!(ctx.wait_for_ready(handle, 0), Ok(before));
    assert_eq!(monitor.points_written(), 400);

    // Frames played in submission order.
    let tags: Vec<u16> = monitor.writes().iter().map(|w| w.points[0].red).collect();
    assert_eq!(tags, [1, 2, 3, 4]);

    ctx.stop_output(handle).unwrap();
}

#[test]
fn test_unbounded_timed_wait_behaves_like_forever() {
    let (ctx, _monitor) = single_device(slow_device("dev-1"));
    let handle = open_started(&ctx, "dev-1");

    // About 50 ms of output for the streaming frame.
    ctx.write_frame(handle, &circle(100, 1), 2_000, 1).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        ctx.wait_for_ready(handle, 0) == Ok(2)
    }));
    ctx.write_frame(handle, &circle(10, 2), 2_000, 1).unwrap();
    ctx.write_frame(handle, &circle(10, 3), 2_000, 1).unwrap();

    assert!(ctx.wait_for_ready(handle, Duration::MAX).unwrap() >= 1);
    ctx.stop_output(handle).unwrap();
}

// =============================================================================
// Repeat Semantics
// =============================================================================

#[test]
fn test_repeating_frame_replaced_by_newer_frame() {
    let (ctx, monitor) = single_device(slow_device("dev-1"));
    let handle = open_started(&ctx, "dev-1");

    ctx.write_frame(handle, &circle(100, 1), 10_000, 0).unwrap();
    assert!(monitor.wait_until(Duration::from_secs(5), |m| m.points_written() >= 150));
    ctx.write_frame(handle, &circle(30, 2), 10_000, 2).unwrap();

    let session = ctx.session(handle).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        session.stats().frames_completed == 1
    }));
    ctx.stop_output(handle).unwrap();

    let writes = monitor.writes();
    let first_new = writes
        .iter()
        .position(|w| w.points[0].red == 2)
        .expect("second frame was written");

    // The newer frame starts at its own first point and plays exactly twice.
    assert_eq!(writes[first_new].points[0], circle(30, 2)[0]);
    assert_eq!(writes[first_new..].len(), 6);
    assert!(writes[first_new..].iter().all(|w| w.points[0].red == 2));
    assert_eq!(session.stats().frames_superseded, 1);
}

#[test]
fn test_stop_interrupts_repeating_frame_and_restart_works() {
    let (ctx, monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = open_started(&ctx, "dev-1");

    // 200 points at 20 kHz: one pass every 10 ms.
    let frame = circle(200, 65535);
    let period = Frame::new(frame.clone(), 20_000).period();
    assert_eq!(period, Duration::from_millis(10));
    ctx.write_frame(handle, &frame, 20_000, 0).unwrap();
    assert!(monitor.wait_until(Duration::from_secs(5), |m| m.points_written() >= 1_000));

    // Stop does not wait for the pass to finish.
    let started = Instant::now();
    ctx.stop_output(handle).unwrap();
    assert!(started.elapsed() < period * 10);

    let written = monitor.points_written();
    thread::sleep(period * 3);
    assert_eq!(monitor.points_written(), written);

    // A following submit and drain completes, and only the new frame is sent.
    monitor.clear_writes();
    ctx.start_output(handle).unwrap();
    ctx.wait_for_ready(handle, -1).unwrap();
    let marked = circle(200, 7);
    ctx.write_frame(handle, &marked, 20_000, 1).unwrap();
    let session = ctx.session(handle).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        session.stats().frames_completed == 1
    }));
    assert_eq!(ctx.wait_for_ready(handle, 0), Ok(2));

    let writes = monitor.writes();
    assert_eq!(writes[0].points[0], marked[0]);
    assert!(writes.iter().all(|w| w.points[0].red == 7));
    assert_eq!(writes.iter().map(|w| w.points.len()).sum::<usize>(), 200);
    ctx.stop_output(handle).unwrap();
    ctx.close_device(handle).unwrap();
}

#[test]
fn test_stop_wakes_blocked_waiter() {
    let (ctx, _monitor) = single_device(slow_device("dev-1"));
    let ctx = Arc::new(ctx);
    let handle = open_started(&ctx, "dev-1");

    ctx.write_frame(handle, &circle(10_000, 1), 1_000, 1).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        ctx.wait_for_ready(handle, 0) == Ok(2)
    }));
    ctx.write_frame(handle, &circle(10, 2), 1_000, 1).unwrap();
    ctx.write_frame(handle, &circle(10, 3), 1_000, 1).unwrap();

    let waiter = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || ctx.wait_for_ready(handle, WaitTimeout::Forever))
    };
    thread::sleep(Duration::from_millis(30));
    ctx.stop_output(handle).unwrap();

    assert_eq!(waiter.join().unwrap(), Err(Error::NotStarted));
}

// =============================================================================
// Faults
// =============================================================================

#[test]
fn test_write_failure_surfaces_as_io() {
    let (ctx, monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = open_started(&ctx, "dev-1");

    monitor.fail_next_write();
    ctx.write_frame(handle, &circle(100, 1), 20_000, 0).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        ctx.wait_for_ready(handle, 0).is_err()
    }));
    assert!(ctx.wait_for_ready(handle, -1).unwrap_err().is_io());
    assert!(ctx
        .write_frame(handle, &circle(100, 1), 20_000, 0)
        .unwrap_err()
        .is_io());

    // Once stopped, the old fault no longer masks the stopped state.
    ctx.stop_output(handle).unwrap();
    assert_eq!(ctx.wait_for_ready(handle, 0), Err(Error::NotStarted));
    assert_eq!(ctx.wait_for_ready(handle, -1), Err(Error::NotStarted));
    assert_eq!(
        ctx.write_frame(handle, &circle(100, 1), 20_000, 0),
        Err(Error::NotStarted)
    );

    // A restart clears the fault.
    ctx.start_output(handle).unwrap();
    assert_eq!(ctx.wait_for_ready(handle, 0), Ok(2));
    ctx.stop_output(handle).unwrap();
    ctx.close_device(handle).unwrap();
}

#[test]
fn test_device_lost_while_streaming() {
    let (ctx, monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = open_started(&ctx, "dev-1");

    ctx.write_frame(handle, &circle(100, 1), 20_000, 0).unwrap();
    assert!(monitor.wait_until(Duration::from_secs(5), |m| m.points_written() > 0));
    monitor.set_reachable(false);

    assert!(wait_until(Duration::from_secs(5), || {
        matches!(ctx.wait_for_ready(handle, 0), Err(Error::Io(_)))
    }));
    ctx.stop_output(handle).unwrap();
}

#[test]
fn test_shutter_failure_on_start() {
    let (ctx, monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = ctx.open_device("dev-1").unwrap();

    monitor.set_fail_shutter(true);
    assert!(ctx.start_output(handle).unwrap_err().is_io());
    assert_eq!(ctx.session(handle).unwrap().state(), SessionState::Opened);
    assert_eq!(ctx.wait_for_ready(handle, 0), Err(Error::NotStarted));
}

// =============================================================================
// Label and DMX
// =============================================================================

#[test]
fn test_device_label() {
    let (ctx, monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = ctx.open_device("dev-1").unwrap();

    assert_eq!(ctx.device_label(handle).unwrap(), "Simulated dev-1");
    ctx.set_device_label(handle, "Projector Left").unwrap();
    assert_eq!(monitor.label(), "Projector Left");

    assert!(matches!(
        ctx.set_device_label(handle, "a\0b"),
        Err(Error::ParameterInvalid(_))
    ));
}

#[test]
fn test_dmx_universes() {
    let (ctx, monitor) = single_device(SimulatedDevice::new("dev-1"));
    let handle = ctx.open_device("dev-1").unwrap();

    assert_eq!(ctx.universe_count(handle), Ok(2));
    let output = ctx.universe_query(handle, 0).unwrap();
    assert_eq!(output.direction, UniverseDirection::Output);
    assert_eq!(output.channel_count, 512);
    assert_eq!(
        ctx.universe_query(handle, 1).unwrap().direction,
        UniverseDirection::Input
    );

    ctx.universe_write(handle, 0, 0, &[255, 128, 0]).unwrap();
    ctx.universe_update(handle, 0).unwrap();
    assert_eq!(&monitor.universe_data(0).unwrap()[..3], &[255, 128, 0]);

    monitor.inject_universe_input(1, 10, &[42]);
    let mut buf = [0u8; 1];
    ctx.universe_read(handle, 1, 10, &mut buf).unwrap();
    assert_eq!(buf, [42]);

    assert!(matches!(
        ctx.universe_query(handle, 2),
        Err(Error::ParameterOutOfRange(_))
    ));
    assert!(matches!(
        ctx.universe_write(handle, 1, 0, &[1]),
        Err(Error::ParameterInvalid(_))
    ));
    assert!(matches!(
        ctx.universe_write(handle, 0, 0, &[]),
        Err(Error::ParameterInvalid(_))
    ));
    assert!(matches!(
        ctx.universe_read(handle, 1, 511, &mut [0u8; 2]),
        Err(Error::ParameterOutOfRange(_))
    ));
}

// =============================================================================
// Context Shutdown
// =============================================================================

#[test]
fn test_exit_stops_and_closes_everything() {
    let first = SimulatedDevice::new("dev-1");
    let second = SimulatedDevice::new("dev-2");
    let monitors = [first.monitor(), second.monitor()];
    let ctx = DacContext::new(SimulatedProvider::new().with_device(first).with_device(second))
        .with_config(SessionConfig::new().with_buffer_depth(3));

    let a = open_started(&ctx, "dev-1");
    let _b = ctx.open_device("dev-2").unwrap();
    assert_eq!(ctx.wait_for_ready(a, 0), Ok(3));
    ctx.write_frame(a, &circle(100, 1), 20_000, 0).unwrap();

    ctx.exit();
    for monitor in &monitors {
        assert!(!monitor.shutter_open());
        assert!(!monitor.is_connected());
    }
}
