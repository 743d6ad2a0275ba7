use std::env;
use std::time::{Duration, Instant};

use base64::Engine;
use common::pattern::{brightness_wave_frame, color_wave_frame, DEFAULT_WAVE_COLORS};
use common::{
    decode_reading, ActuatorCommand, Color, DriveCommand, IlluminationCommand, ModuleStatus, OrchestratorStatus,
    PanTiltCommand, SensorKind,
};
use criterion::{black_box, Criterion};

const ULTRASONIC: &str = r#"{"sensor":"ultrasonic","distance":42.7}"#;
const INFRARED: &str = r#"{"sensor":"infrared","value":5}"#;
const ORCHESTRATOR: &str = r#"{"orchestrator":"raspberry","status":"actuator_clients_started"}"#;

fn camera_payload(bytes: usize) -> String {
    let frame: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
    let image = base64::engine::general_purpose::STANDARD.encode(frame);
    format!(r#"{{"sensor":"picam","image":"{}"}}"#, image)
}

fn ring(led_count: usize) -> Vec<Color> {
    color_wave_frame(3, &DEFAULT_WAVE_COLORS, led_count)
}

/// Average wall time of `f` over `iterations` runs.
fn time_it(name: &str, iterations: u32, mut f: impl FnMut()) {
    let start = Instant::now();
    for _ in 0..iterations {
        f();
    }
    let avg = start.elapsed() / iterations;
    println!("{:<32} {:>10.2} µs", name, avg.as_nanos() as f64 / 1000.0);
}

fn run_quick(mode: &str, camera: &str) {
    println!("{:<32} {:>13}", "benchmark", "avg");
    if mode == "decode" || mode == "all" {
        time_it("decode ultrasonic", 100_000, || {
            black_box(decode_reading(SensorKind::Ultrasonic, black_box(ULTRASONIC)).ok());
        });
        time_it("decode infrared", 100_000, || {
            black_box(decode_reading(SensorKind::Infrared, black_box(INFRARED)).ok());
        });
        time_it("decode camera frame (64 KiB)", 500, || {
            black_box(decode_reading(SensorKind::Camera, black_box(camera)).ok());
        });
        time_it("parse orchestrator status", 100_000, || {
            black_box(OrchestratorStatus::parse(black_box(ORCHESTRATOR)).ok());
        });
    }
    if mode == "encode" || mode == "all" {
        let colors = ring(8);
        time_it("encode illumination (8 leds)", 100_000, || {
            black_box(IlluminationCommand::from_colors(black_box(&colors)).to_json().ok());
        });
        time_it("encode drive", 100_000, || {
            black_box(DriveCommand::new(1500, 1500, -1500, -1500).to_json().ok());
        });
        time_it("encode pan/tilt", 100_000, || {
            black_box(PanTiltCommand::new(90, 70, 0.05).to_json().ok());
        });
        time_it("encode module status", 100_000, || {
            black_box(ModuleStatus::connected("ultrasonic_client").to_json().ok());
        });
        time_it("brightness wave frame (8 leds)", 100_000, || {
            black_box(brightness_wave_frame(black_box(37), &DEFAULT_WAVE_COLORS, 8, 16));
        });
    }
}

fn run_criterion(mode: &str, camera: &str) {
    let mut c = Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(5));

    if mode == "decode" || mode == "all" {
        c.bench_function("decode_ultrasonic", |b| {
            b.iter(|| decode_reading(SensorKind::Ultrasonic, black_box(ULTRASONIC)))
        });
        c.bench_function("decode_infrared", |b| {
            b.iter(|| decode_reading(SensorKind::Infrared, black_box(INFRARED)))
        });
        c.bench_function("decode_camera_64k", |b| {
            b.iter(|| decode_reading(SensorKind::Camera, black_box(camera)))
        });
        c.bench_function("parse_orchestrator_status", |b| {
            b.iter(|| OrchestratorStatus::parse(black_box(ORCHESTRATOR)))
        });
    }
    if mode == "encode" || mode == "all" {
        let colors = ring(8);
        c.bench_function("encode_illumination_8", |b| {
            b.iter(|| IlluminationCommand::from_colors(black_box(&colors)).to_json())
        });
        c.bench_function("encode_pan_tilt", |b| {
            b.iter(|| PanTiltCommand::new(black_box(90), 70, 0.05).to_json())
        });
        c.bench_function("brightness_wave_frame_8", |b| {
            b.iter(|| brightness_wave_frame(black_box(37), &DEFAULT_WAVE_COLORS, 8, 16))
        });
    }
    c.final_summary();
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mode = args
        .get(1)
        .filter(|a| !a.starts_with("--"))
        .map(String::as_str)
        .unwrap_or("all");
    if !matches!(mode, "decode" | "encode" | "all") {
        eprintln!("Usage: benchmark_runner [decode|encode|all] [--criterion]");
        std::process::exit(1);
    }
    let use_criterion = args.iter().any(|a| a == "--criterion");

    println!("========================================");
    println!("Link codec benchmarks ({})", mode);
    println!("========================================\n");

    let camera = camera_payload(64 * 1024);
    if use_criterion {
        run_criterion(mode, &camera);
    } else {
        run_quick(mode, &camera);
    }
}
