//! Server events that can be received by the application.

/// Events emitted by the VNC server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A client has connected to the server.
    ClientConnected {
        /// Unique client identifier.
        client_id: usize,
        /// Client's peer address.
        address: String,
    },

    /// A client has disconnected from the server.
    ClientDisconnected {
        /// Unique client identifier.
        client_id: usize,
    },

    /// Key press or release event from a client.
    KeyEvent {
        /// Client identifier.
        client_id: usize,
        /// True if pressed, false if released.
        down: bool,
        /// Key symbol (X11 keysym).
        keysym: u32,
    },

    /// Pointer movement or button event from a client.
    PointerEvent {
        /// Client identifier.
        client_id: usize,
        /// X coordinate.
        x: u16,
        /// Y coordinate.
        y: u16,
        /// Button mask (bit 0 left, 1 middle, 2 right, 3 wheel-up,
        /// 4 wheel-down).
        buttons: u8,
    },

    /// Clipboard text received from a client.
    CutText {
        /// Client identifier.
        client_id: usize,
        /// Clipboard text content.
        text: String,
    },
}
