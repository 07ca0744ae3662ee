// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! VNC authentication implementation.
//!
//! This module implements VNC Authentication (security type 2) as specified
//! in RFC 6143 Section 7.2.2. It uses DES encryption with a VNC-specific bit
//! reversal quirk for challenge-response authentication.
//!
//! # Protocol
//!
//! The VNC authentication handshake works as follows:
//! 1. Server generates a 16-byte random challenge
//! 2. Server sends the challenge to the client
//! 3. Client encrypts the challenge using the password as the DES key (with bit-reversed bytes)
//! 4. Client sends the encrypted result back to the server
//! 5. Server verifies the response matches its own encryption of the challenge
//!
//! # Security Note
//!
//! VNC Authentication is a legacy protocol and has known security limitations.
//! It should only be used on trusted networks or in conjunction with TLS/SSL
//! tunneling.

use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use rand::Rng;

/// Handles VNC authentication, specifically the VNC Authentication scheme as
/// defined in RFC 6143 Section 7.2.2.
///
/// This struct is responsible for holding the VNC server's password, generating
/// a challenge for clients, and verifying their responses using DES encryption
/// with the VNC-specific bit reversal quirk.
pub struct VncAuth {
    /// The VNC password, if set. Stored as an `Option<String>`.
    password: Option<String>,
}

impl VncAuth {
    /// Creates a new `VncAuth` instance.
    ///
    /// # Arguments
    ///
    /// * `password` - An `Option<String>` containing the VNC password. If `None`, no password is set.
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }

    /// Generates a cryptographically random 16-byte challenge.
    ///
    /// The challenge is sent to the client, which must encrypt it with the
    /// shared secret (password) and send the result back for verification.
    #[allow(clippy::unused_self)] // Kept as method for API consistency with the other VncAuth operations
    pub fn generate_challenge(&self) -> [u8; 16] {
        let mut rng = rand::rng();
        let mut challenge = [0u8; 16];
        rng.fill(&mut challenge);
        challenge
    }

    /// Verifies a client's authentication response against the generated
    /// challenge and the server's password.
    ///
    /// The client's response is expected to be the challenge encrypted with
    /// the VNC password. This function re-encrypts the original challenge
    /// with the stored password and compares the two ciphertexts in constant
    /// time, so the comparison leaks no prefix-length information.
    ///
    /// # Arguments
    ///
    /// * `response` - The client's encrypted response (16 bytes).
    /// * `challenge` - The original 16-byte challenge that was sent to the client.
    ///
    /// # Returns
    ///
    /// `true` if the response matches the expected encrypted challenge.
    pub fn verify_response(&self, response: &[u8], challenge: &[u8; 16]) -> bool {
        let Some(ref password) = self.password else {
            return false;
        };
        if response.len() != 16 {
            return false;
        }

        let expected = encrypt_challenge(challenge, password);
        constant_time_eq(response, &expected)
    }
}

/// Encrypts a 16-byte challenge with the VNC password using DES.
///
/// Implements the VNC-specific DES encryption: up to 8 password bytes are
/// taken (truncating longer passwords *before* any transformation, for
/// interoperability with historical clients), zero-padded, and each byte
/// has its bit order reversed before use as the DES key. The 16-byte
/// challenge is encrypted as two independent 8-byte blocks (ECB mode, no
/// padding).
///
/// # Arguments
///
/// * `challenge` - The 16-byte challenge to encrypt.
/// * `password` - The VNC password string.
///
/// # Returns
///
/// The 16-byte ciphertext.
fn encrypt_challenge(challenge: &[u8; 16], password: &str) -> [u8; 16] {
    let key = prepare_key(password);

    // An 8-byte key can never be rejected, so this expect is unreachable.
    let cipher = Des::new_from_slice(&key).expect("8-byte key");

    let mut encrypted = [0u8; 16];

    // First block
    let mut block1_bytes = [0u8; 8];
    block1_bytes.copy_from_slice(&challenge[0..8]);
    let mut block1 = block1_bytes.into();
    cipher.encrypt_block(&mut block1);
    encrypted[0..8].copy_from_slice(&block1);

    // Second block
    let mut block2_bytes = [0u8; 8];
    block2_bytes.copy_from_slice(&challenge[8..16]);
    let mut block2 = block2_bytes.into();
    cipher.encrypt_block(&mut block2);
    encrypted[8..16].copy_from_slice(&block2);

    encrypted
}

/// Derives the 8-byte DES key from a VNC password.
///
/// Truncates to 8 bytes, zero-pads, then reverses the bit order of every
/// byte (the historical VNC quirk).
fn prepare_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    for (i, &byte) in password.as_bytes().iter().take(8).enumerate() {
        key[i] = reverse_bits(byte);
    }
    key
}

/// Reverses the bits within a single byte.
///
/// Used specifically in VNC authentication, where password bytes have their
/// bits reversed (bit 0 ↔ bit 7) before being used as a DES key.
///
/// # Example
///
/// `0b10110001` (177) becomes `0b10001101` (141).
fn reverse_bits(byte: u8) -> u8 {
    let mut result = 0u8;
    for i in 0..8 {
        if byte & (1 << i) != 0 {
            result |= 1 << (7 - i);
        }
    }
    result
}

/// Compares two equal-length byte slices without early exit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    debug_assert_eq!(a.len(), b.len());
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
