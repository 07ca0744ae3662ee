//! Headless VNC server example with animated content.
//!
//! This example wires an animated `FrameSource` and a logging `InputSink`
//! into the server, demonstrating the capture/input boundary without any
//! actual screen capture.
//!
//! Usage:
//!   cargo run --example capture_loop

use std::error::Error;
use std::time::Duration;

use rfbserver::source::{run_capture, run_input_pump};
use rfbserver::{FrameSource, InputSink, VncServer, DEFAULT_PORT};

const WIDTH: u16 = 640;
const HEIGHT: u16 = 480;

/// Generates an animated gradient, one frame per poll.
struct AnimatedSource {
    frame: u32,
}

impl FrameSource for AnimatedSource {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let mut pixels = vec![0u8; usize::from(WIDTH) * usize::from(HEIGHT) * 4];
        for y in 0..u32::from(HEIGHT) {
            for x in 0..u32::from(WIDTH) {
                let offset = ((y * u32::from(WIDTH) + x) * 4) as usize;
                pixels[offset] = ((self.frame / 2) % 256) as u8; // B
                pixels[offset + 1] = ((y + self.frame) % 256) as u8; // G
                pixels[offset + 2] = ((x + self.frame) % 256) as u8; // R
                pixels[offset + 3] = 255; // A
            }
        }
        self.frame = self.frame.wrapping_add(1);
        Some(pixels)
    }
}

/// Prints viewer input instead of injecting it anywhere.
struct LoggingSink;

impl InputSink for LoggingSink {
    fn key_event(&self, down: bool, keysym: u32) {
        println!("key {keysym:#06x} {}", if down { "down" } else { "up" });
    }

    fn pointer_event(&self, buttons: u8, x: u16, y: u16) {
        println!("pointer ({x},{y}) buttons={buttons:#05b}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("Starting headless VNC server on port {DEFAULT_PORT}...");
    println!("Connect with: vncviewer localhost:{DEFAULT_PORT}");
    println!("Press Ctrl+C to stop");

    let (server, events) = VncServer::new(WIDTH, HEIGHT, "animated demo".to_string(), None);

    let listener = server.clone();
    tokio::spawn(async move {
        if let Err(e) = listener.listen(DEFAULT_PORT).await {
            eprintln!("Server error: {e}");
        }
    });

    tokio::spawn(run_input_pump(events, LoggingSink));

    // ~30 FPS capture cadence; blocks until the server stops.
    run_capture(
        server,
        AnimatedSource { frame: 0 },
        Duration::from_millis(33),
    )
    .await;

    Ok(())
}
