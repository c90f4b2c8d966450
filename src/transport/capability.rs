//! Capability-negotiating Unix-domain socket.
//!
//! The gateway's Unix admin socket may be served with different socket
//! types depending on how it was built and what the OS supports. The
//! channel negotiates the best message-boundary-preserving type at connect
//! time, in strict priority order:
//!
//! 1. `SOCK_SEQPACKET` - connection-oriented, record boundaries preserved
//! 2. `SOCK_DGRAM` - record boundaries preserved, needs a bound local path
//! 3. `SOCK_STREAM` - plain byte stream, requires the JSON framer upstream
//!
//! Each failed attempt is swallowed and logged at low severity; only
//! exhausting every tier surfaces a connection failure. The selected tier
//! is immutable for the life of the channel.
//!
//! All I/O is readiness-driven and non-blocking so the owning channel's
//! read/write never stalls the scheduler.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixDatagram, UnixStream};

use crate::error::{AdminError, Result};

/// The socket type selected after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityTier {
    /// `SOCK_SEQPACKET`: one message per send/receive, connection-oriented.
    RecordPreserving,
    /// `SOCK_DGRAM`: one message per send/receive, connectionless.
    Datagram,
    /// `SOCK_STREAM`: undelimited bytes; the owning channel must frame.
    ByteStream,
}

impl CapabilityTier {
    /// Human-readable tier name.
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityTier::RecordPreserving => "seqpacket",
            CapabilityTier::Datagram => "datagram",
            CapabilityTier::ByteStream => "stream",
        }
    }

    /// Whether one receive yields exactly one protocol message.
    pub fn preserves_records(&self) -> bool {
        !matches!(self, CapabilityTier::ByteStream)
    }
}

/// Automatic negotiation, or a caller-forced socket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapabilityPreference {
    /// Try every tier in priority order.
    #[default]
    Auto,
    /// Use exactly this tier; its failure is a connection failure.
    Force(CapabilityTier),
}

impl CapabilityPreference {
    fn candidates(&self) -> Vec<CapabilityTier> {
        match self {
            CapabilityPreference::Auto => vec![
                CapabilityTier::RecordPreserving,
                CapabilityTier::Datagram,
                CapabilityTier::ByteStream,
            ],
            CapabilityPreference::Force(tier) => vec![*tier],
        }
    }
}

/// Removes the datagram tier's bound local socket file on drop.
struct LocalPathGuard {
    path: PathBuf,
}

impl Drop for LocalPathGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// The connected socket behind the uniform send/receive surface.
///
/// Seqpacket and stream tiers both live in a `UnixStream`: a seqpacket fd
/// still reads one record per `recv` once connected, and tokio's readiness
/// machinery works on any connected `AF_UNIX` fd.
enum Kind {
    Stream(UnixStream),
    Datagram {
        socket: UnixDatagram,
        _local: LocalPathGuard,
    },
}

/// A Unix-domain channel with uniform primitives regardless of which
/// capability tier was negotiated.
pub struct CapabilityChannel {
    kind: Kind,
    tier: CapabilityTier,
    peer: PathBuf,
}

impl CapabilityChannel {
    /// Open the channel, negotiating the best available socket type.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::ConnectionFailed`] only after every candidate
    /// tier has failed.
    pub async fn connect(path: &Path, preference: CapabilityPreference) -> Result<Self> {
        for tier in preference.candidates() {
            match Self::try_open(path, tier).await {
                Ok(channel) => {
                    tracing::debug!(tier = tier.name(), peer = %path.display(), "unix channel connected");
                    return Ok(channel);
                }
                Err(e) => {
                    tracing::debug!(tier = tier.name(), "socket type unavailable: {}", e);
                }
            }
        }
        Err(AdminError::ConnectionFailed(format!(
            "no usable socket type for {}",
            path.display()
        )))
    }

    async fn try_open(path: &Path, tier: CapabilityTier) -> Result<Self> {
        let kind = match tier {
            CapabilityTier::RecordPreserving => Kind::Stream(open_seqpacket(path)?),
            CapabilityTier::Datagram => {
                let local = generate_socket_path("admwire-dgram");
                let socket = UnixDatagram::bind(&local)?;
                let guard = LocalPathGuard {
                    path: PathBuf::from(&local),
                };
                socket.connect(path)?;
                Kind::Datagram {
                    socket,
                    _local: guard,
                }
            }
            CapabilityTier::ByteStream => Kind::Stream(UnixStream::connect(path).await?),
        };
        Ok(Self {
            kind,
            tier,
            peer: path.to_path_buf(),
        })
    }

    /// The tier selected at connect time.
    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    /// Current tier plus peer identity, for diagnostics.
    pub fn describe(&self) -> String {
        format!("{} socket to {}", self.tier.name(), self.peer.display())
    }

    /// Send one buffer.
    ///
    /// Record-preserving tiers transmit it as a single message; the stream
    /// tier writes until every byte is accepted.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        match &self.kind {
            Kind::Stream(stream) => {
                let mut written = 0;
                while written < bytes.len() {
                    stream.writable().await?;
                    match stream.try_write(&bytes[written..]) {
                        Ok(n) => written += n,
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(())
            }
            Kind::Datagram { socket, .. } => {
                socket.send(bytes).await?;
                Ok(())
            }
        }
    }

    /// Receive into `buf`, returning the number of bytes read.
    ///
    /// Zero means the peer closed an ordered connection. On the
    /// record-preserving tiers each call yields at most one message.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        match &self.kind {
            Kind::Stream(stream) => loop {
                stream.readable().await?;
                match stream.try_read(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(e) => return Err(e.into()),
                }
            },
            Kind::Datagram { socket, .. } => Ok(socket.recv(buf).await?),
        }
    }

    /// Close the channel, shutting down an ordered connection cleanly.
    ///
    /// The datagram tier's bound local path is removed when the channel
    /// drops, whether or not `close` was called.
    pub async fn close(self) {
        if let Kind::Stream(mut stream) = self.kind {
            let _ = stream.shutdown().await;
        }
    }
}

/// Connect a `SOCK_SEQPACKET` socket and hand it to tokio.
///
/// tokio has no seqpacket wrapper, so the fd is created through socket2,
/// connected, switched to non-blocking, and registered as a `UnixStream`.
fn open_seqpacket(path: &Path) -> Result<UnixStream> {
    use socket2::{Domain, SockAddr, Socket, Type};

    let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
    socket.connect(&SockAddr::unix(path)?)?;
    socket.set_nonblocking(true)?;

    let std_stream: std::os::unix::net::UnixStream = socket.into();
    Ok(UnixStream::from_std(std_stream)?)
}

/// Generate a unique socket path for this process.
///
/// Format: `/tmp/{prefix}-{pid}-{random}.sock`.
pub(crate) fn generate_socket_path(prefix: &str) -> String {
    let pid = std::process::id();
    format!("/tmp/{}-{}-{:x}.sock", prefix, pid, rand_u64())
}

/// Simple random u64 using system time and process ID.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid
}
