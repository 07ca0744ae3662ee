//! Simple VNC server example.
//!
//! This example creates a VNC server with a static test pattern and a
//! password.
//!
//! Usage:
//!   cargo run --example pattern_server
//!
//! Then connect with a VNC viewer to localhost:5900

use std::error::Error;

use rfbserver::{VncServer, DEFAULT_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init();

    const WIDTH: u16 = 800;
    const HEIGHT: u16 = 600;

    println!("Starting VNC server on port {DEFAULT_PORT}...");
    println!("Connect with: vncviewer localhost:{DEFAULT_PORT}");
    println!("Password: test123");

    let (server, mut events) = VncServer::new(
        WIDTH,
        HEIGHT,
        "rfbserver test pattern".to_string(),
        Some("test123".to_string()),
    );

    // Create a test pattern (gradient), BGRA byte order.
    let mut pixels = vec![0u8; usize::from(WIDTH) * usize::from(HEIGHT) * 4];
    for y in 0..usize::from(HEIGHT) {
        for x in 0..usize::from(WIDTH) {
            let offset = (y * usize::from(WIDTH) + x) * 4;
            pixels[offset] = 128; // B: constant
            pixels[offset + 1] = (y * 255 / usize::from(HEIGHT)) as u8; // G: vertical gradient
            pixels[offset + 2] = (x * 255 / usize::from(WIDTH)) as u8; // R: horizontal gradient
            pixels[offset + 3] = 255; // A: opaque
        }
    }
    server.set_frame(&pixels).await?;

    println!("Framebuffer updated with test pattern");
    println!("Server ready for connections");

    // Log input events while the listener runs.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("event: {event:?}");
        }
    });

    // Start server (blocks until the process is killed)
    server.listen(DEFAULT_PORT).await?;

    Ok(())
}
