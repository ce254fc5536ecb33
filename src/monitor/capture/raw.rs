//! Raw-socket capture backend.
//!
//! Opens an `AF_INET`/`SOCK_RAW` socket bound to TCP through pnet's layer-3
//! transport channel. The kernel hands every inbound TCP datagram to it with
//! the IPv4 header attached; the datagram bytes go straight to
//! [`decode_frame`], which does its own header unpacking.

use crate::logger::Event;
use crate::monitor::capture::{CaptureConfig, CaptureContext, HitQueue};
use crate::monitor::config::{POLL_INTERVAL, RECV_BUFFER_SIZE};
use crate::monitor::decoder::{decode_frame, FrameFilter};
use crate::monitor::error::WatchError;
use chrono::Local;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::Packet;
use pnet::transport::{ipv4_packet_iter, transport_channel, TransportChannelType, TransportReceiver};
use std::sync::atomic::Ordering;

pub struct RawSocketSource {
    rx:     TransportReceiver,
    filter: FrameFilter,
}

impl RawSocketSource {
    /// Opens the raw socket.
    ///
    /// # Errors
    /// [`WatchError::CaptureInit`] if the socket cannot be created, usually
    /// because the process lacks `CAP_NET_RAW`.
    pub fn open(cfg: &CaptureConfig) -> Result<Self, WatchError> {
        let channel = TransportChannelType::Layer3(IpNextHeaderProtocols::Tcp);
        // The sending half is never used; dropping it leaves the receiver open.
        let (_tx, rx) = transport_channel(RECV_BUFFER_SIZE, channel).map_err(|e| {
            WatchError::CaptureInit { backend: "socket", reason: e.to_string() }
        })?;

        Ok(Self {
            rx,
            filter: FrameFilter { port: cfg.port, destination_ip: cfg.ip_filter },
        })
    }

    /// Receive loop. Wakes at least every [`POLL_INTERVAL`] to check the
    /// shutdown flag; a receive error ends the capture.
    pub fn run(mut self, queue: &HitQueue, ctx: &CaptureContext) {
        let mut frames = ipv4_packet_iter(&mut self.rx);

        while !ctx.shutdown.load(Ordering::Relaxed) {
            let packet = match frames.next_with_timeout(POLL_INTERVAL) {
                Ok(Some((packet, _addr))) => packet,
                Ok(None) => continue,
                Err(e) => {
                    ctx.logger.log(&Event::Info {
                        message: &format!("Raw capture stopped: {}", e),
                    });
                    break;
                }
            };
            let arrival = Local::now();
            ctx.stats.frames_seen.fetch_add(1, Ordering::Relaxed);

            match decode_frame(packet.packet(), &self.filter, arrival) {
                Ok(Some(hit)) => queue.push(hit),
                Ok(None) => {}
                Err(e) => {
                    ctx.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    ctx.logger.log(&Event::FrameDropped { reason: &e.to_string() });
                }
            }
        }
    }
}
