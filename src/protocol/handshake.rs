//! RTMP simple handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 + C1 ---------------------->|
//!   |<------ S0 + S1 + S2 ------------------|
//!   |------- C2 --------------------------->|
//! ```
//!
//! Only the plain handshake is implemented: no HMAC digest, and echoes are
//! not verified since several servers and encoders get them wrong.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Which side of the handshake we play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Nothing sent or received yet
    Start,
    /// Client: waiting for S0S1S2. Server: waiting for C0C1.
    AwaitHello,
    /// Server only: waiting for C2
    AwaitEcho,
    Done,
}

/// Handshake state machine, independent of any socket
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    stage: Stage,
}

impl Handshake {
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            stage: Stage::Start,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Bytes the peer must send before the next step can run
    pub fn bytes_needed(&self) -> usize {
        match (self.stage, self.role) {
            (Stage::AwaitHello, HandshakeRole::Client) => 1 + 2 * HANDSHAKE_SIZE,
            (Stage::AwaitHello, HandshakeRole::Server) => 1 + HANDSHAKE_SIZE,
            (Stage::AwaitEcho, _) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// Start the handshake; only the client has something to send up front
    pub fn initial(&mut self) -> Option<Bytes> {
        if self.stage != Stage::Start {
            return None;
        }
        self.stage = Stage::AwaitHello;

        match self.role {
            HandshakeRole::Client => {
                let mut out = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                out.put_u8(RTMP_VERSION);
                out.put_slice(&hello_packet());
                Some(out.freeze())
            }
            HandshakeRole::Server => None,
        }
    }

    /// Consume peer bytes once enough are buffered, returning our reply
    ///
    /// Returns `Ok(None)` when more data is needed or nothing must be sent.
    pub fn process(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<Bytes>, HandshakeError> {
        let needed = self.bytes_needed();
        if needed == 0 || buf.len() < needed {
            return Ok(None);
        }

        match (self.stage, self.role) {
            (Stage::AwaitHello, HandshakeRole::Server) => {
                check_version(buf.get_u8())?;
                let mut c1 = [0u8; HANDSHAKE_SIZE];
                buf.copy_to_slice(&mut c1);

                let mut out = BytesMut::with_capacity(1 + 2 * HANDSHAKE_SIZE);
                out.put_u8(RTMP_VERSION);
                out.put_slice(&hello_packet());
                out.put_slice(&echo_packet(&c1));

                self.stage = Stage::AwaitEcho;
                Ok(Some(out.freeze()))
            }
            (Stage::AwaitHello, HandshakeRole::Client) => {
                check_version(buf.get_u8())?;
                let mut s1 = [0u8; HANDSHAKE_SIZE];
                buf.copy_to_slice(&mut s1);
                // S2 should echo C1; not verified
                buf.advance(HANDSHAKE_SIZE);

                self.stage = Stage::Done;
                Ok(Some(Bytes::copy_from_slice(&echo_packet(&s1))))
            }
            (Stage::AwaitEcho, _) => {
                // C2 should echo S1; not verified
                buf.advance(HANDSHAKE_SIZE);
                self.stage = Stage::Done;
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}

fn check_version(version: u8) -> std::result::Result<(), HandshakeError> {
    // Accept anything from 3 up; some encoders send odd values
    if version < RTMP_VERSION {
        return Err(HandshakeError::InvalidVersion(version));
    }
    Ok(())
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1/S1: 4-byte time, 4 zero bytes, 1528 pseudo-random bytes
fn hello_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let time = now_millis();
    packet[0..4].copy_from_slice(&time.to_be_bytes());

    // Handshake randomness carries no security weight; an LCG is enough
    let mut seed = u64::from(time) | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    packet
}

/// C2/S2: the peer's packet with bytes 4..8 replaced by our read time
fn echo_packet(peer: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}

/// Run the handshake over a socket
///
/// Bytes the peer sent past the handshake stay in `buf` for the chunk decoder.
pub async fn perform<S>(io: &mut S, role: HandshakeRole, buf: &mut BytesMut) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = Handshake::new(role);
    if let Some(out) = handshake.initial() {
        io.write_all(&out).await?;
    }

    while !handshake.is_done() {
        if let Some(out) = handshake.process(buf)? {
            io.write_all(&out).await?;
            continue;
        }
        if handshake.is_done() {
            break;
        }
        if io.read_buf(buf).await? == 0 {
            return Err(HandshakeError::ConnectionClosed.into());
        }
    }

    io.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_exchange() {
        let mut client = Handshake::new(HandshakeRole::Client);
        let mut server = Handshake::new(HandshakeRole::Server);

        let c0c1 = client.initial().unwrap();
        assert_eq!(c0c1.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(c0c1[0], RTMP_VERSION);
        assert!(server.initial().is_none());

        let mut to_server = BytesMut::from(&c0c1[..]);
        let s0s1s2 = server.process(&mut to_server).unwrap().unwrap();
        assert_eq!(s0s1s2.len(), 1 + 2 * HANDSHAKE_SIZE);
        assert!(to_server.is_empty());

        let mut to_client = BytesMut::from(&s0s1s2[..]);
        let c2 = client.process(&mut to_client).unwrap().unwrap();
        assert_eq!(c2.len(), HANDSHAKE_SIZE);
        assert!(client.is_done());

        let mut to_server = BytesMut::from(&c2[..]);
        assert!(server.process(&mut to_server).unwrap().is_none());
        assert!(server.is_done());
    }

    #[test]
    fn test_partial_input_waits() {
        let mut server = Handshake::new(HandshakeRole::Server);
        server.initial();
        assert_eq!(server.bytes_needed(), 1 + HANDSHAKE_SIZE);

        let mut partial = BytesMut::from(&[RTMP_VERSION; 100][..]);
        assert!(server.process(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 100);
    }

    #[test]
    fn test_old_version_rejected() {
        let mut server = Handshake::new(HandshakeRole::Server);
        server.initial();

        let mut c0c1 = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        c0c1.put_u8(2);
        c0c1.put_slice(&[0u8; HANDSHAKE_SIZE]);

        assert_eq!(
            server.process(&mut c0c1),
            Err(HandshakeError::InvalidVersion(2))
        );
    }

    #[test]
    fn test_echo_keeps_peer_random() {
        let hello = hello_packet();
        let echo = echo_packet(&hello);
        assert_eq!(&hello[0..4], &echo[0..4]);
        assert_eq!(&hello[8..], &echo[8..]);
        assert_eq!(&hello[4..8], &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_perform_over_duplex() {
        let (mut client_io, mut server_io) = tokio::io::duplex(8192);

        let server = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            perform(&mut server_io, HandshakeRole::Server, &mut buf).await
        });

        let mut buf = BytesMut::new();
        perform(&mut client_io, HandshakeRole::Client, &mut buf)
            .await
            .unwrap();
        server.await.unwrap().unwrap();
        assert!(buf.is_empty());
    }
}
