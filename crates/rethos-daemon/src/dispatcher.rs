//! The central event dispatcher.
//!
//! A single task owns the link state, the statistics, the channel slot
//! table, and the serial write path. Everything else reaches it through the
//! event queue, so no protocol state needs synchronization. The loop is a
//! biased select over, in order: the three timers, the serial byte stream,
//! stdin, and the bridge event queue. A DATA frame's side effects (the ACK
//! and the delivery) complete before the next serial byte is examined.

use std::future;

use rethos_core::constants::{CHANNEL_COMMAND, CHANNEL_CONTROL, CHANNEL_STDIN, CHANNEL_TUNNEL, MTU, NUM_CHANNELS};
use rethos_core::{encode_frame, DeframeEvent, Deframer, Frame};
use rethos_link::{ControlDisposition, DataDisposition, DataOutcome, LinkState, Stats};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::command::CommandHandler;
use crate::error::DaemonError;
use crate::tun::TunDevice;

/// Stats summary period.
const STATS_INTERVAL: Duration = Duration::from_secs(15);
/// Retransmission deadline, re-armed on every DATA send and after every
/// timeout resend, canceled by a matching ACK.
const REXMIT_TIMEOUT: Duration = Duration::from_millis(100);
/// Unsolicited address-announce period.
const IPADDR_INTERVAL: Duration = Duration::from_secs(20);

/// Events delivered to the dispatcher from endpoint tasks and the tunnel
/// reader.
#[derive(Debug)]
pub enum Event {
    /// A client connected on `channel`; `writer` accepts outbound payloads
    /// for it.
    ClientConnected {
        channel: u8,
        writer: mpsc::Sender<Vec<u8>>,
    },
    /// The client on `channel` went away; its endpoint is listening again.
    ClientDisconnected { channel: u8 },
    /// A complete length-prefixed message read from the client on `channel`.
    ClientMessage { channel: u8, payload: Vec<u8> },
    /// A packet read from the tunnel interface.
    TunPacket(Vec<u8>),
}

/// A channel slot either accepts a client or has one.
enum ChannelSlot {
    Listening,
    Connected { writer: mpsc::Sender<Vec<u8>> },
}

/// The dispatcher. Generic over the serial transport so tests can drive it
/// with an in-memory duplex stream.
pub struct Dispatcher<S> {
    serial_rx: ReadHalf<S>,
    serial_tx: WriteHalf<S>,
    events: mpsc::Receiver<Event>,
    link: LinkState,
    deframer: Deframer,
    stats: Stats,
    channels: [ChannelSlot; NUM_CHANNELS],
    command: CommandHandler,
    tun: Option<TunDevice>,
    stdin: tokio::io::Stdin,
    stdout: tokio::io::Stdout,
    stdin_open: bool,
    rexmit_deadline: Option<Instant>,
}

impl<S> Dispatcher<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// `watch_stdin` disables the stdin bridge when false; tests and
    /// non-interactive deployments have no stdin worth watching.
    pub fn new(
        serial: S,
        events: mpsc::Receiver<Event>,
        command: CommandHandler,
        tun: Option<TunDevice>,
        watch_stdin: bool,
    ) -> Self {
        let (serial_rx, serial_tx) = tokio::io::split(serial);
        Self {
            serial_rx,
            serial_tx,
            events,
            link: LinkState::new(),
            deframer: Deframer::new(),
            stats: Stats::new(),
            channels: std::array::from_fn(|_| ChannelSlot::Listening),
            command,
            tun,
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
            stdin_open: watch_stdin,
            rexmit_deadline: None,
        }
    }

    /// Run until a fatal error. The loop has no clean exit: the daemon stops
    /// by being killed or by losing the serial link.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        let start = Instant::now();
        let mut stats_tick = tokio::time::interval_at(start + STATS_INTERVAL, STATS_INTERVAL);
        let mut ipaddr_tick = tokio::time::interval_at(start + IPADDR_INTERVAL, IPADDR_INTERVAL);

        let mut serial_buf = vec![0u8; MTU];
        let mut stdin_buf = vec![0u8; MTU];

        info!("entering event loop");

        loop {
            let rexmit_deadline = self.rexmit_deadline;
            tokio::select! {
                biased;

                _ = stats_tick.tick() => {
                    self.on_stats_tick();
                }

                _ = rexmit_wait(rexmit_deadline), if rexmit_deadline.is_some() => {
                    self.on_rexmit_tick().await?;
                }

                _ = ipaddr_tick.tick() => {
                    let announce = self.command.address_reply();
                    self.send_data(CHANNEL_COMMAND, &announce).await?;
                }

                read = self.serial_rx.read(&mut serial_buf) => {
                    let n = read.map_err(|e| {
                        warn!(error = %e, "serial read failed");
                        DaemonError::SerialClosed
                    })?;
                    if n == 0 {
                        warn!("lost serial connection");
                        return Err(DaemonError::SerialClosed);
                    }
                    // Process every byte, and each frame's side effects,
                    // before reading from the wire again.
                    for i in 0..n {
                        self.on_serial_byte(serial_buf[i]).await?;
                    }
                }

                read = self.stdin.read(&mut stdin_buf), if self.stdin_open => {
                    match read {
                        Ok(0) | Err(_) => {
                            warn!("stdin closed, disabling stdin bridging");
                            self.stdin_open = false;
                        }
                        Ok(n) => {
                            self.send_data(CHANNEL_STDIN, &stdin_buf[..n]).await?;
                        }
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => self.on_event(event).await?,
                        None => return Err(DaemonError::EventChannelClosed),
                    }
                }
            }
        }
    }

    /// Encode and fully drain one frame to the serial line.
    async fn transmit(&mut self, frame: &Frame) -> Result<(), DaemonError> {
        let wire = encode_frame(frame)?;
        self.serial_tx.write_all(&wire).await?;
        self.serial_tx.flush().await?;
        Ok(())
    }

    /// Send a DATA frame: consume a sequence number, fill the retransmit
    /// slot, and arm the retransmit timer.
    async fn send_data(&mut self, channel: u8, payload: &[u8]) -> Result<(), DaemonError> {
        let frame = self.link.send_data(channel, payload);
        debug!(channel, seqno = frame.seqno, len = payload.len(), "sending DATA");
        self.transmit(&frame).await?;
        self.rexmit_deadline = Some(Instant::now() + REXMIT_TIMEOUT);
        Ok(())
    }

    async fn on_serial_byte(&mut self, byte: u8) -> Result<(), DaemonError> {
        match self.deframer.push(byte) {
            None => Ok(()),
            Some(DeframeEvent::Restarted) => {
                warn!("unexpected start-of-frame sequence, dropping frame in progress");
                Ok(())
            }
            Some(DeframeEvent::FrameDropped(reason)) => {
                warn!(%reason, "dropping corrupt frame");
                self.stats.global.bad_frames += 1;
                self.stats.global.lost_frames += 1;
                self.transmit(&Frame::nack()).await
            }
            Some(DeframeEvent::FrameReady(frame)) => self.on_frame(frame).await,
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<(), DaemonError> {
        let ch = frame.channel as usize;
        self.stats.channel[ch].serial_received += 1;
        self.stats.global.serial_received += 1;

        if frame.channel == CHANNEL_CONTROL {
            match self.link.on_control(&frame) {
                ControlDisposition::AckAccepted => {
                    debug!(seqno = frame.seqno, "outstanding frame acked");
                    self.rexmit_deadline = None;
                }
                ControlDisposition::AckIgnored | ControlDisposition::NackIgnored => {}
                ControlDisposition::Retransmit(f) => {
                    debug!(seqno = f.seqno, "retransmitting after NACK");
                    self.transmit(&f).await?;
                }
                ControlDisposition::AckLastReceived(f) => {
                    debug!(seqno = f.seqno, "re-acking last received frame after stray NACK");
                    self.transmit(&f).await?;
                }
                ControlDisposition::UnknownType(t) => {
                    info!("got frame of type {t:#x} on control channel");
                }
            }
            return Ok(());
        }

        let DataDisposition { ack, outcome } = self.link.on_data(&frame);
        self.transmit(&ack).await?;

        match outcome {
            DataOutcome::Duplicate => {
                info!(channel = frame.channel, "got a duplicate frame");
                Ok(())
            }
            DataOutcome::Empty { lost } => {
                self.stats.global.lost_frames += u64::from(lost);
                info!(channel = frame.channel, "got an empty frame, dropping");
                Ok(())
            }
            DataOutcome::Deliver { lost } => {
                self.stats.global.lost_frames += u64::from(lost);
                self.deliver(frame).await
            }
        }
    }

    /// Route an accepted payload: built-in consumers first, then the
    /// connected client, if any.
    async fn deliver(&mut self, frame: Frame) -> Result<(), DaemonError> {
        match frame.channel {
            CHANNEL_STDIN => {
                self.stdout.write_all(&frame.payload).await?;
                self.stdout.flush().await?;
            }
            CHANNEL_TUNNEL => match &mut self.tun {
                Some(tun) => tun.write_packet(&frame.payload),
                None => info!("got a packet to forward, dropping it"),
            },
            CHANNEL_COMMAND => {
                if let Some(reply) = self.command.handle(&frame.payload) {
                    self.send_data(CHANNEL_COMMAND, &reply).await?;
                }
            }
            _ => {}
        }

        let ch = frame.channel as usize;
        match &self.channels[ch] {
            ChannelSlot::Connected { writer } => {
                if writer.try_send(frame.payload).is_ok() {
                    self.stats.channel[ch].domain_forwarded += 1;
                    self.stats.global.domain_forwarded += 1;
                } else {
                    warn!(channel = frame.channel, "client not keeping up, dropping message");
                }
            }
            ChannelSlot::Listening => {
                warn!(channel = frame.channel, "channel not connected, dropping message");
                self.stats.channel[ch].drop_notconnected += 1;
                // Channels 1 and 3 were consumed above regardless, so they
                // stay out of the global drop counter.
                if frame.channel != CHANNEL_STDIN && frame.channel != CHANNEL_TUNNEL {
                    self.stats.global.drop_notconnected += 1;
                }
            }
        }
        Ok(())
    }

    async fn on_event(&mut self, event: Event) -> Result<(), DaemonError> {
        match event {
            Event::ClientConnected { channel, writer } => {
                self.channels[channel as usize] = ChannelSlot::Connected { writer };
            }
            Event::ClientDisconnected { channel } => {
                self.channels[channel as usize] = ChannelSlot::Listening;
            }
            Event::ClientMessage { channel, payload } => {
                let ch = channel as usize;
                self.stats.channel[ch].domain_received += 1;
                self.stats.global.domain_received += 1;
                self.send_data(channel, &payload).await?;
                self.stats.channel[ch].serial_forwarded += 1;
                self.stats.global.serial_forwarded += 1;
            }
            Event::TunPacket(packet) => {
                self.send_data(CHANNEL_TUNNEL, &packet).await?;
            }
        }
        Ok(())
    }

    async fn on_rexmit_tick(&mut self) -> Result<(), DaemonError> {
        match self.link.rexmit_frame() {
            Some(frame) => {
                debug!(seqno = frame.seqno, "retransmit timeout, resending");
                self.transmit(&frame).await?;
                self.rexmit_deadline = Some(Instant::now() + REXMIT_TIMEOUT);
            }
            None => {
                self.rexmit_deadline = None;
            }
        }
        Ok(())
    }

    fn on_stats_tick(&mut self) {
        let g = &self.stats.global;
        info!("================================================================================");
        info!(
            "Received {} frames on serial link; forwarded {} on domain sockets",
            g.serial_received, g.domain_forwarded
        );
        info!(
            "Received {} frames on domain sockets; forwarded {} on serial link",
            g.domain_received, g.serial_forwarded
        );
        info!(
            "Lost {} frames, {} of which were detected on the serial link",
            g.lost_frames, g.bad_frames
        );
        info!(
            "An additional {} frames were dropped, due to lack of a listening process",
            g.drop_notconnected
        );

        if let ChannelSlot::Connected { writer } = &self.channels[CHANNEL_CONTROL as usize] {
            if writer.try_send(self.stats.encode()).is_err() {
                warn!("stats client not keeping up, dropping snapshot");
            }
        }
    }
}

/// Sleep until the retransmit deadline. Guarded by the caller so it is never
/// polled with `None`.
async fn rexmit_wait(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
