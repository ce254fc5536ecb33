//! libpcap capture backend with `etherparse` dissection.
//!
//! On a loopback interface every frame is reported twice, once as it is sent
//! and once as it is received. [`LoopbackDedupe`] pairs the two copies up so
//! each loopback request is counted exactly once.

use crate::logger::Event;
use crate::monitor::capture::{CaptureConfig, CaptureContext, HitQueue};
use crate::monitor::config::{LOOPBACK_DEDUPE_CAPACITY, POLL_INTERVAL};
use crate::monitor::decoder::parse_request_section;
use crate::monitor::error::{FrameDecodeError, WatchError};
use crate::monitor::types::HttpHit;
use chrono::{DateTime, Local};
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use pcap::{Active, Capture, Linktype};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;

/// Length of the Linux "cooked" header used by the `any` device.
const LINUX_SLL_HEADER: usize = 16;
/// Length of the BSD loopback address-family header.
const NULL_HEADER: usize = 4;

pub struct PcapSource {
    cap:  Capture<Active>,
    link: Linktype,
}

impl PcapSource {
    /// Opens `cfg.interface` and installs a BPF filter for the watched port
    /// (and destination address, when filtered).
    ///
    /// # Errors
    /// [`WatchError::CaptureInit`] if the device cannot be opened or the
    /// filter cannot be compiled.
    pub fn open(cfg: &CaptureConfig) -> Result<Self, WatchError> {
        let init = |e: pcap::Error| WatchError::CaptureInit {
            backend: "pcap",
            reason:  format!("{} ({})", e, cfg.interface),
        };

        let mut cap = Capture::from_device(cfg.interface.as_str())
            .map_err(init)?
            .promisc(true)
            .timeout(POLL_INTERVAL.as_millis() as i32) // wake so the shutdown flag is checked
            .open()
            .map_err(init)?;

        cap.filter(&bpf_filter(cfg), true).map_err(init)?;
        let link = cap.get_datalink();

        Ok(Self { cap, link })
    }

    /// Capture loop; exits on shutdown or on any capture error other than a
    /// read timeout.
    pub fn run(mut self, queue: &HitQueue, ctx: &CaptureContext) {
        let mut dedupe = LoopbackDedupe::new(LOOPBACK_DEDUPE_CAPACITY);

        while !ctx.shutdown.load(Ordering::Relaxed) {
            let data = match self.cap.next_packet() {
                Ok(pkt) => pkt.data,
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    ctx.logger.log(&Event::Info {
                        message: &format!("pcap capture stopped: {}", e),
                    });
                    break;
                }
            };
            let arrival = Local::now();
            ctx.stats.frames_seen.fetch_add(1, Ordering::Relaxed);

            match dissect(self.link, data, arrival, &mut dedupe) {
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

/// BPF program matching requests to the watched port.
fn bpf_filter(cfg: &CaptureConfig) -> String {
    match cfg.ip_filter {
        Some(ip) => format!("tcp dst port {} and dst host {}", cfg.port, ip),
        None     => format!("tcp dst port {}", cfg.port),
    }
}

/// Slices a captured frame according to its link type.
fn slice_frame(link: Linktype, data: &[u8]) -> Result<SlicedPacket<'_>, FrameDecodeError> {
    let skip = if link == Linktype::LINUX_SLL {
        LINUX_SLL_HEADER
    } else if link == Linktype::NULL {
        NULL_HEADER
    } else {
        0
    };
    let sliced = if link == Linktype::ETHERNET {
        SlicedPacket::from_ethernet(data)
    } else {
        let ip = data.get(skip..).ok_or(FrameDecodeError::Truncated {
            needed: skip,
            actual: data.len(),
        })?;
        SlicedPacket::from_ip(ip)
    };
    sliced.map_err(|e| FrameDecodeError::Dissect(e.to_string()))
}

/// Turns one captured frame into a hit.
///
/// The BPF filter has already selected the port and address, so anything
/// that is not IPv4/TCP with a payload here is simply skipped.
fn dissect(
    link:    Linktype,
    data:    &[u8],
    arrival: DateTime<Local>,
    dedupe:  &mut LoopbackDedupe,
) -> Result<Option<HttpHit>, FrameDecodeError> {
    let sliced = slice_frame(link, data)?;

    let (src, dst) = match &sliced.ip {
        Some(InternetSlice::Ipv4(h, _)) => (h.source_addr(), h.destination_addr()),
        _ => return Ok(None),
    };
    let tcp = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return Ok(None),
    };
    if sliced.payload.is_empty() {
        return Ok(None);
    }

    if src == dst {
        let fingerprint = Fingerprint {
            source:           src.octets(),
            destination:      dst.octets(),
            source_port:      tcp.source_port(),
            destination_port: tcp.destination_port(),
            sequence:         tcp.sequence_number(),
            acknowledgement:  tcp.acknowledgment_number(),
            payload:          sliced.payload,
        };
        if !dedupe.is_second_copy(fingerprint.digest()) {
            return Ok(None);
        }
    }

    let section = parse_request_section(sliced.payload)?;
    Ok(Some(HttpHit {
        timestamp: arrival,
        source_ip: src.to_string(),
        section,
    }))
}

/// Per-layer fields identifying one loopback frame.
#[derive(Hash)]
struct Fingerprint<'a> {
    source:           [u8; 4],
    destination:      [u8; 4],
    source_port:      u16,
    destination_port: u16,
    sequence:         u32,
    acknowledgement:  u32,
    payload:          &'a [u8],
}

impl Fingerprint<'_> {
    fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Bounded set of loopback fingerprints awaiting their second copy.
///
/// The first copy of a frame is recorded and skipped; the second finds the
/// record, removes it, and is processed. When the set is full the oldest
/// fingerprint is forgotten, so a lost second copy cannot pin memory.
///
/// Each recording gets a generation number. `order` may still list a
/// fingerprint that was paired off and later recorded again, and forgetting
/// that stale entry must not drop the newer recording.
#[derive(Debug)]
pub struct LoopbackDedupe {
    pending:    HashMap<u64, u64>,
    order:      VecDeque<(u64, u64)>,
    generation: u64,
    capacity:   usize,
}

impl LoopbackDedupe {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending:    HashMap::new(),
            order:      VecDeque::new(),
            generation: 0,
            capacity:   capacity.max(1),
        }
    }

    /// Returns `true` if `fingerprint` was waiting, i.e. this is the inbound copy.
    pub fn is_second_copy(&mut self, fingerprint: u64) -> bool {
        if self.pending.remove(&fingerprint).is_some() {
            return true;
        }

        self.generation += 1;
        self.pending.insert(fingerprint, self.generation);
        self.order.push_back((fingerprint, self.generation));

        while self.pending.len() > self.capacity {
            match self.order.pop_front() {
                Some((oldest, generation)) => self.forget(oldest, generation),
                None => break,
            }
        }
        // Paired-off entries pile up in `order` when every frame finds its
        // twin; sweep them once they outnumber the live ones.
        if self.order.len() > 2 * self.capacity {
            let pending = &self.pending;
            self.order.retain(|(fp, generation)| pending.get(fp) == Some(generation));
        }
        false
    }

    fn forget(&mut self, fingerprint: u64, generation: u64) {
        if self.pending.get(&fingerprint) == Some(&generation) {
            self.pending.remove(&fingerprint);
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::decoder::tests::build_frame;
    use crate::monitor::decoder::IPPROTO_TCP;

    fn ethernet(ip_frame: &[u8]) -> Vec<u8> {
        let mut f = vec![0u8; 14];
        f[12] = 0x08; // ethertype IPv4
        f.extend_from_slice(ip_frame);
        f
    }

    fn cooked(ip_frame: &[u8]) -> Vec<u8> {
        let mut f = vec![0u8; LINUX_SLL_HEADER];
        f[14] = 0x08;
        f.extend_from_slice(ip_frame);
        f
    }

    #[test]
    fn first_loopback_copy_is_skipped_second_is_counted() {
        let mut dedupe = LoopbackDedupe::new(16);
        let frame = ethernet(&build_frame(
            IPPROTO_TCP, [127, 0, 0, 1], [127, 0, 0, 1], 8080, 0, 0, b"GET /lo/x HTTP/1.1",
        ));

        assert_eq!(dissect(Linktype::ETHERNET, &frame, Local::now(), &mut dedupe), Ok(None));
        assert_eq!(dedupe.pending(), 1);

        let hit = dissect(Linktype::ETHERNET, &frame, Local::now(), &mut dedupe)
            .unwrap()
            .unwrap();
        assert_eq!(hit.section, "/lo");
        assert_eq!(hit.source_ip, "127.0.0.1");
        assert_eq!(dedupe.pending(), 0);
    }

    #[test]
    fn non_loopback_frames_are_counted_every_time() {
        let mut dedupe = LoopbackDedupe::new(16);
        let frame = ethernet(&build_frame(
            IPPROTO_TCP, [10, 0, 0, 9], [10, 0, 0, 1], 8080, 0, 0, b"GET /a/b HTTP/1.1",
        ));
        for _ in 0..2 {
            assert!(dissect(Linktype::ETHERNET, &frame, Local::now(), &mut dedupe)
                .unwrap()
                .is_some());
        }
        assert_eq!(dedupe.pending(), 0);
    }

    #[test]
    fn cooked_frames_from_the_any_device_are_sliced() {
        let mut dedupe = LoopbackDedupe::new(16);
        let frame = cooked(&build_frame(
            IPPROTO_TCP, [10, 0, 0, 9], [10, 0, 0, 1], 8080, 0, 0, b"PUT /items/7 HTTP/1.1",
        ));
        let hit = dissect(Linktype::LINUX_SLL, &frame, Local::now(), &mut dedupe)
            .unwrap()
            .unwrap();
        assert_eq!(hit.section, "/items");
    }

    #[test]
    fn bsd_loopback_frames_are_sliced() {
        let mut dedupe = LoopbackDedupe::new(16);
        // Address family AF_INET in host byte order, then the datagram.
        let mut frame = 2u32.to_ne_bytes().to_vec();
        frame.extend_from_slice(&build_frame(
            IPPROTO_TCP, [10, 0, 0, 9], [10, 0, 0, 1], 8080, 0, 0, b"DELETE /users/3 HTTP/1.1",
        ));
        let hit = dissect(Linktype::NULL, &frame, Local::now(), &mut dedupe)
            .unwrap()
            .unwrap();
        assert_eq!(hit.section, "/users");
        assert_eq!(hit.source_ip, "10.0.0.9");
    }

    #[test]
    fn truncated_bsd_loopback_header_is_an_error() {
        let mut dedupe = LoopbackDedupe::new(16);
        assert_eq!(
            dissect(Linktype::NULL, &[2, 0], Local::now(), &mut dedupe),
            Err(FrameDecodeError::Truncated { needed: NULL_HEADER, actual: 2 })
        );
    }

    #[test]
    fn non_http_payload_is_a_decode_error() {
        let mut dedupe = LoopbackDedupe::new(16);
        let frame = ethernet(&build_frame(
            IPPROTO_TCP, [10, 0, 0, 9], [10, 0, 0, 1], 8080, 0, 0, b"HTTP/1.1 200 OK",
        ));
        assert_eq!(
            dissect(Linktype::ETHERNET, &frame, Local::now(), &mut dedupe),
            Err(FrameDecodeError::NotHttpRequest)
        );
    }

    #[test]
    fn dedupe_set_is_bounded() {
        let mut dedupe = LoopbackDedupe::new(3);
        for fp in 0..10u64 {
            assert!(!dedupe.is_second_copy(fp));
        }
        assert_eq!(dedupe.pending(), 3);
        // The oldest fingerprints were forgotten; the newest still pair up.
        assert!(!dedupe.is_second_copy(0));
        assert!(dedupe.is_second_copy(9));
    }

    #[test]
    fn repeated_fingerprint_pairs_up_again_after_stale_entries_age_out() {
        let mut dedupe = LoopbackDedupe::new(2);
        let (a, b) = (0xA, 0xB);

        assert!(!dedupe.is_second_copy(a));
        assert!(dedupe.is_second_copy(a));
        assert!(!dedupe.is_second_copy(b));
        // Same frame seen again, e.g. a retransmission on `lo`.
        assert!(!dedupe.is_second_copy(a));
        assert!(dedupe.is_second_copy(a));
        assert_eq!(dedupe.pending(), 1);
    }

    #[test]
    fn paired_traffic_keeps_the_order_queue_bounded() {
        let mut dedupe = LoopbackDedupe::new(4);
        for fp in 0..1_000u64 {
            assert!(!dedupe.is_second_copy(fp));
            assert!(dedupe.is_second_copy(fp));
        }
        assert_eq!(dedupe.pending(), 0);
        assert!(dedupe.order.len() <= 8);
    }

    #[test]
    fn filter_includes_destination_host_when_set() {
        let mut cfg = CaptureConfig {
            backend:        crate::monitor::capture::CaptureBackend::Pcap,
            port:           8080,
            ip_filter:      None,
            interface:      "any".to_string(),
            queue_capacity: 16,
        };
        assert_eq!(bpf_filter(&cfg), "tcp dst port 8080");
        cfg.ip_filter = Some("10.0.0.1".parse().unwrap());
        assert_eq!(bpf_filter(&cfg), "tcp dst port 8080 and dst host 10.0.0.1");
    }
}
