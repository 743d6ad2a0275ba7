//! Keyboard drive console on stdin.
//!
//! Each drive key queues one motor pulse; the control loop stops the wheels
//! when the pulse elapses, so holding a direction means repeating the key.

use std::io::{self, BufRead};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use common::DriveCommand;

use crate::control_loop::ControlRequest;

pub fn show_help() {
    println!("\n===========================================");
    println!("Drive console");
    println!("===========================================");
    println!("w: forward   s: back");
    println!("a: left      d: right");
    println!("x: stop      h: help");
    println!("===========================================");
}

/// Map one input line to a request. Wheel order is front-left, rear-left,
/// front-right, rear-right.
pub fn parse_key(line: &str, duty: i32) -> Option<ControlRequest> {
    let pulse = |d1, d2, d3, d4| Some(ControlRequest::Pulse(DriveCommand::new(d1, d2, d3, d4)));
    match line.trim() {
        "w" => pulse(duty, duty, duty, duty),
        "s" => pulse(-duty, -duty, -duty, -duty),
        "a" => pulse(-duty, -duty, duty, duty),
        "d" => pulse(duty, duty, -duty, -duty),
        "x" => Some(ControlRequest::Stop),
        _ => None,
    }
}

/// Forward requests from `input` until it ends or the loop hangs up.
/// Returns how many requests were sent.
pub fn run_console<R: BufRead>(input: R, requests: &Sender<ControlRequest>, duty: i32) -> usize {
    let mut sent = 0;
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("[Console] stdin read failed: {}", e);
                break;
            }
        };
        match parse_key(&line, duty) {
            Some(request) => {
                if requests.send(request).is_err() {
                    debug!("[Console] control loop gone");
                    break;
                }
                sent += 1;
            }
            None if line.trim() == "h" => show_help(),
            None if line.trim().is_empty() => {}
            None => println!("unknown key {:?}, h for help", line.trim()),
        }
    }
    sent
}

/// Read stdin on a detached thread. The thread ends at EOF.
pub fn spawn_console(requests: Sender<ControlRequest>, duty: i32) -> io::Result<JoinHandle<usize>> {
    info!("[Console] drive console ready (duty {})", duty);
    thread::Builder::new()
        .name("drive-console".into())
        .spawn(move || {
            show_help();
            run_console(io::stdin().lock(), &requests, duty)
        })
}
