//! Local channel endpoints.
//!
//! Every channel number in [0, 256) gets a byte-stream endpoint in the
//! abstract socket namespace, named `rethos/<n>`. Exactly one client may be
//! connected per channel: the listener is closed on accept and re-created
//! when the client goes away, so further connect attempts are refused while
//! a client holds the channel.
//!
//! Messages on the local protocol are a 4-byte big-endian payload length
//! followed by the payload. Oversize messages are skipped with an error log
//! and the excess drained so the stream stays aligned.

use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::SocketAddr;

use rethos_core::constants::{MTU, NUM_CHANNELS};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::dispatcher::Event;

/// Outbound payloads queued per connected client before the dispatcher
/// starts dropping.
const CLIENT_QUEUE: usize = 64;

/// Endpoint naming configuration.
///
/// The default prefix is the production namespace; tests substitute a unique
/// prefix so parallel runs cannot collide on abstract names.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub name_prefix: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name_prefix: "rethos".into(),
        }
    }
}

impl EndpointConfig {
    fn name(&self, channel: u8) -> String {
        format!("{}/{}", self.name_prefix, channel)
    }
}

/// Bind the abstract-namespace listener for one channel.
fn bind_endpoint(config: &EndpointConfig, channel: u8) -> io::Result<UnixListener> {
    let addr = SocketAddr::from_abstract_name(config.name(channel).as_bytes())?;
    let listener = std::os::unix::net::UnixListener::bind_addr(&addr)?;
    listener.set_nonblocking(true)?;
    UnixListener::from_std(listener)
}

/// Bind all 256 endpoints and spawn one accept task per channel.
///
/// Binding happens up front so a name collision (another daemon instance)
/// aborts startup instead of surfacing later.
pub fn spawn_endpoints(config: EndpointConfig, event_tx: mpsc::Sender<Event>) -> io::Result<()> {
    for channel in 0..NUM_CHANNELS as u16 {
        let channel = channel as u8;
        let listener = bind_endpoint(&config, channel)?;
        tokio::spawn(endpoint_task(config.clone(), channel, listener, event_tx.clone()));
    }
    Ok(())
}

/// Accept loop for one channel: accept a client, bridge it until it goes
/// away, then listen again.
async fn endpoint_task(
    config: EndpointConfig,
    channel: u8,
    mut listener: UnixListener,
    event_tx: mpsc::Sender<Event>,
) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(e) => {
                warn!(channel, error = %e, "accept failed");
                continue;
            }
        };
        info!(channel, "accepted client process");

        // One client per channel: release the listening name until this
        // client disconnects.
        drop(listener);

        let (writer_tx, writer_rx) = mpsc::channel(CLIENT_QUEUE);
        if event_tx
            .send(Event::ClientConnected { channel, writer: writer_tx })
            .await
            .is_err()
        {
            return;
        }

        run_client(channel, stream, &event_tx, writer_rx).await;

        info!(channel, "client process disconnected");
        if event_tx.send(Event::ClientDisconnected { channel }).await.is_err() {
            return;
        }

        listener = loop {
            match bind_endpoint(&config, channel) {
                Ok(l) => break l,
                Err(e) => {
                    warn!(channel, error = %e, "rebind failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        };
    }
}

/// Bridge one connected client: forward its messages to the dispatcher and
/// write dispatcher-supplied payloads back, until EOF or a read error.
async fn run_client(
    channel: u8,
    stream: UnixStream,
    event_tx: &mpsc::Sender<Event>,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
) {
    let (mut read_half, mut write_half) = stream.into_split();

    let writer = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if let Err(e) = write_message(&mut write_half, &payload).await {
                warn!(error = %e, "client write failed");
                break;
            }
        }
    });

    loop {
        match read_message(&mut read_half).await {
            Ok(ClientRead::Message(payload)) => {
                if event_tx
                    .send(Event::ClientMessage { channel, payload })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(ClientRead::Oversize(len)) => {
                error!(channel, len, "client message exceeds MTU, skipping");
            }
            Ok(ClientRead::Disconnected) => break,
            Err(e) => {
                warn!(channel, error = %e, "client read failed, closing");
                break;
            }
        }
    }

    writer.abort();
}

/// Result of reading one length-prefixed message.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientRead {
    /// A complete message within the MTU.
    Message(Vec<u8>),
    /// A message longer than the MTU; its bytes were drained and discarded.
    Oversize(u32),
    /// The stream ended (EOF, possibly mid-message).
    Disconnected,
}

/// Read one `length || payload` message from a client stream.
///
/// Oversize payloads are consumed in full so the next read starts at a
/// message boundary.
pub async fn read_message<R>(reader: &mut R) -> io::Result<ClientRead>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Ok(ClientRead::Disconnected);
        }
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf);

    if len as usize > MTU {
        let mut limited = (&mut *reader).take(u64::from(len));
        let drained = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        if drained < u64::from(len) {
            return Ok(ClientRead::Disconnected);
        }
        return Ok(ClientRead::Oversize(len));
    }

    let mut payload = vec![0u8; len as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(ClientRead::Message(payload)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(ClientRead::Disconnected),
        Err(e) => Err(e),
    }
}

/// Write one `length || payload` message to a client stream.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}
