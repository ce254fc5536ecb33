//! Frame decoder: raw IPv4 datagram → [`HttpHit`].
//!
//! Headers are unpacked by hand at fixed big-endian offsets. Only the fields
//! needed to filter and attribute a request are read.
//!
//! IPv4 (RFC 791), first 20 bytes:
//!
//! | offset | size | field                    |
//! |--------|------|--------------------------|
//! | 0      | 1    | version (hi) / IHL (lo)  |
//! | 2      | 2    | total length             |
//! | 9      | 1    | protocol                 |
//! | 12     | 4    | source address           |
//! | 16     | 4    | destination address      |
//!
//! TCP (RFC 793), first 20 bytes after the IP header:
//!
//! | offset | size | field                     |
//! |--------|------|---------------------------|
//! | 0      | 2    | source port               |
//! | 2      | 2    | destination port          |
//! | 4      | 4    | sequence number           |
//! | 8      | 4    | acknowledgement number    |
//! | 12     | 1    | data offset (hi nibble)   |

use crate::monitor::error::FrameDecodeError;
use crate::monitor::types::HttpHit;
use chrono::{DateTime, Local};
use std::net::Ipv4Addr;

/// IANA protocol number for TCP.
pub const IPPROTO_TCP: u8 = 6;

const IPV4_MIN_HEADER: usize = 20;
const TCP_MIN_HEADER:  usize = 20;

/// Request methods recognised at the start of a payload.
const METHODS: [&str; 8] = [
    "OPTIONS", "GET", "HEAD", "POST", "PUT", "DELETE", "TRACE", "CONNECT",
];

/// Fixed-offset view of an IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version:       u8,
    /// Header length in bytes (IHL × 4), options included.
    pub header_len:    usize,
    pub total_len:     usize,
    pub protocol:      u8,
    pub source:        Ipv4Addr,
    pub destination:   Ipv4Addr,
}

impl Ipv4Header {
    pub fn parse(frame: &[u8]) -> Result<Self, FrameDecodeError> {
        need(frame, IPV4_MIN_HEADER)?;

        let version = frame[0] >> 4;
        if version != 4 {
            return Err(FrameDecodeError::NotIpv4(version));
        }

        let header_len = usize::from(frame[0] & 0x0F) * 4;
        if header_len < IPV4_MIN_HEADER {
            return Err(FrameDecodeError::BadHeaderLength { layer: "IPv4", length: header_len });
        }

        Ok(Self {
            version,
            header_len,
            total_len:   usize::from(be_u16(frame, 2)),
            protocol:    frame[9],
            source:      Ipv4Addr::new(frame[12], frame[13], frame[14], frame[15]),
            destination: Ipv4Addr::new(frame[16], frame[17], frame[18], frame[19]),
        })
    }
}

/// Fixed-offset view of a TCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port:      u16,
    pub destination_port: u16,
    pub sequence:         u32,
    pub acknowledgement:  u32,
    /// Header length in bytes (data offset × 4), options included.
    pub header_len:       usize,
}

impl TcpHeader {
    pub fn parse(segment: &[u8]) -> Result<Self, FrameDecodeError> {
        need(segment, TCP_MIN_HEADER)?;

        let header_len = usize::from(segment[12] >> 4) * 4;
        if header_len < TCP_MIN_HEADER {
            return Err(FrameDecodeError::BadHeaderLength { layer: "TCP", length: header_len });
        }

        Ok(Self {
            source_port:      be_u16(segment, 0),
            destination_port: be_u16(segment, 2),
            sequence:         be_u32(segment, 4),
            acknowledgement:  be_u32(segment, 8),
            header_len,
        })
    }
}

/// What a frame must look like to be counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFilter {
    pub port:           u16,
    pub destination_ip: Option<Ipv4Addr>,
}

/// Decodes one IPv4 datagram as received on a raw TCP socket.
///
/// Returns `Ok(None)` for frames that are well formed but not for us (other
/// protocol, destination or port, or no payload), and `Err` for frames that
/// are malformed or do not carry an HTTP request line.
pub fn decode_frame(
    frame:   &[u8],
    filter:  &FrameFilter,
    arrival: DateTime<Local>,
) -> Result<Option<HttpHit>, FrameDecodeError> {
    let ip = Ipv4Header::parse(frame)?;

    // Trim link padding and unused receive buffer when the total length agrees.
    let frame = if ip.total_len >= ip.header_len && ip.total_len <= frame.len() {
        &frame[..ip.total_len]
    } else {
        frame
    };

    if ip.protocol != IPPROTO_TCP {
        return Ok(None);
    }
    if let Some(wanted) = filter.destination_ip {
        if ip.destination != wanted {
            return Ok(None);
        }
    }

    need(frame, ip.header_len + TCP_MIN_HEADER)?;
    let tcp = TcpHeader::parse(&frame[ip.header_len..])?;
    if tcp.destination_port != filter.port {
        return Ok(None);
    }

    let payload_start = ip.header_len + tcp.header_len;
    need(frame, payload_start)?;
    let payload = &frame[payload_start..];
    if payload.is_empty() {
        return Ok(None);
    }

    let section = parse_request_section(payload)?;
    Ok(Some(HttpHit {
        timestamp: arrival,
        source_ip: ip.source.to_string(),
        section,
    }))
}

/// Decodes a TCP payload as an HTTP request line and returns its section.
///
/// Shared by every capture backend so they all agree on what counts as a
/// request.
pub fn parse_request_section(payload: &[u8]) -> Result<String, FrameDecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| FrameDecodeError::PayloadNotUtf8)?;
    let target = request_target(text).ok_or(FrameDecodeError::NotHttpRequest)?;
    Ok(section_of(target))
}

/// Matches `METHOD SP target SP HTTP/d.d` at the start of `text` and returns
/// the target. The target is the shortest non-empty run of characters on the
/// first line that is followed by a valid version token.
pub fn request_target(text: &str) -> Option<&str> {
    let (method, rest) = text.split_once(' ')?;
    if !METHODS.contains(&method) {
        return None;
    }

    let line = rest.split('\n').next()?;
    let bytes = line.as_bytes();
    let mut from = 1;
    while let Some(pos) = line.get(from..)?.find(" HTTP/") {
        let at = from + pos;
        if let [major, b'.', minor, ..] = &bytes[at + 6..] {
            if major.is_ascii_digit() && minor.is_ascii_digit() {
                return Some(&line[..at]);
            }
        }
        from = at + 1;
    }
    None
}

/// `/foo/index.html` → `/foo`; `/index.html` → `/`.
pub fn section_of(target: &str) -> String {
    let mut parts = target.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(first), Some(_)) => format!("/{}", first),
        _ => "/".to_string(),
    }
}

fn need(buf: &[u8], needed: usize) -> Result<(), FrameDecodeError> {
    if buf.len() < needed {
        Err(FrameDecodeError::Truncated { needed, actual: buf.len() })
    } else {
        Ok(())
    }
}

fn be_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds an IPv4/TCP datagram with optional IP and TCP option padding.
    pub(crate) fn build_frame(
        protocol:  u8,
        src:       [u8; 4],
        dst:       [u8; 4],
        dst_port:  u16,
        ip_opts:   usize,
        tcp_opts:  usize,
        payload:   &[u8],
    ) -> Vec<u8> {
        let ip_len  = 20 + ip_opts * 4;
        let tcp_len = 20 + tcp_opts * 4;
        let total   = ip_len + tcp_len + payload.len();

        let mut f = vec![0u8; total];
        f[0] = 0x40 | (ip_len / 4) as u8;
        f[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        f[8] = 64;
        f[9] = protocol;
        f[12..16].copy_from_slice(&src);
        f[16..20].copy_from_slice(&dst);

        let t = ip_len;
        f[t..t + 2].copy_from_slice(&54321u16.to_be_bytes());
        f[t + 2..t + 4].copy_from_slice(&dst_port.to_be_bytes());
        f[t + 4..t + 8].copy_from_slice(&1000u32.to_be_bytes());
        f[t + 8..t + 12].copy_from_slice(&2000u32.to_be_bytes());
        f[t + 12] = ((tcp_len / 4) as u8) << 4;
        f[t + 13] = 0x18;

        f[ip_len + tcp_len..].copy_from_slice(payload);
        f
    }

    fn http_frame(payload: &str) -> Vec<u8> {
        build_frame(IPPROTO_TCP, [10, 0, 0, 7], [10, 0, 0, 1], 8080, 0, 0, payload.as_bytes())
    }

    fn filter() -> FrameFilter {
        FrameFilter { port: 8080, destination_ip: None }
    }

    fn decode(frame: &[u8]) -> Result<Option<HttpHit>, FrameDecodeError> {
        decode_frame(frame, &filter(), Local::now())
    }

    #[test]
    fn nested_target_yields_first_segment() {
        let hit = decode(&http_frame("GET /foo/index.html HTTP/1.1")).unwrap().unwrap();
        assert_eq!(hit.section, "/foo");
        assert_eq!(hit.source_ip, "10.0.0.7");
    }

    #[test]
    fn single_segment_target_yields_root() {
        let hit = decode(&http_frame("GET /index.html HTTP/1.1")).unwrap().unwrap();
        assert_eq!(hit.section, "/");
    }

    #[test]
    fn unknown_method_is_not_a_request() {
        assert_eq!(
            decode(&http_frame("NOTAVERB /x HTTP/1.1")),
            Err(FrameDecodeError::NotHttpRequest)
        );
    }

    #[test]
    fn full_request_with_headers_is_accepted() {
        let hit = decode(&http_frame(
            "POST /api/v1/users HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n",
        ))
        .unwrap()
        .unwrap();
        assert_eq!(hit.section, "/api");
    }

    #[test]
    fn missing_version_token_is_rejected() {
        assert_eq!(decode(&http_frame("GET /foo HTTP/x.1")), Err(FrameDecodeError::NotHttpRequest));
        assert_eq!(decode(&http_frame("GET /foo")), Err(FrameDecodeError::NotHttpRequest));
        assert_eq!(decode(&http_frame("GET  HTTP/1.1")), Err(FrameDecodeError::NotHttpRequest));
    }

    #[test]
    fn target_stops_at_first_version_token() {
        assert_eq!(request_target("GET /a HTTP/1.0 HTTP/1.1"), Some("/a"));
        assert_eq!(request_target("GET /a HTTP/b/c HTTP/1.1"), Some("/a HTTP/b/c"));
    }

    #[test]
    fn non_tcp_and_filtered_frames_are_skipped() {
        let udp = build_frame(17, [10, 0, 0, 7], [10, 0, 0, 1], 8080, 0, 0, b"GET / HTTP/1.1");
        assert_eq!(decode(&udp), Ok(None));

        let other_port = build_frame(IPPROTO_TCP, [10, 0, 0, 7], [10, 0, 0, 1], 9090, 0, 0, b"GET / HTTP/1.1");
        assert_eq!(decode(&other_port), Ok(None));

        let by_ip = FrameFilter { port: 8080, destination_ip: Some(Ipv4Addr::new(10, 0, 0, 2)) };
        assert_eq!(decode_frame(&http_frame("GET / HTTP/1.1"), &by_ip, Local::now()), Ok(None));

        let matching = FrameFilter { port: 8080, destination_ip: Some(Ipv4Addr::new(10, 0, 0, 1)) };
        assert!(decode_frame(&http_frame("GET / HTTP/1.1"), &matching, Local::now())
            .unwrap()
            .is_some());
    }

    #[test]
    fn empty_payload_is_skipped() {
        assert_eq!(decode(&http_frame("")), Ok(None));
    }

    #[test]
    fn honours_ip_and_tcp_options() {
        let frame = build_frame(
            IPPROTO_TCP, [192, 168, 1, 4], [192, 168, 1, 1], 8080, 2, 3,
            b"GET /bar/baz HTTP/1.0",
        );
        let hit = decode(&frame).unwrap().unwrap();
        assert_eq!(hit.section, "/bar");
        assert_eq!(hit.source_ip, "192.168.1.4");
    }

    #[test]
    fn trailing_padding_beyond_total_length_is_ignored() {
        let mut frame = http_frame("GET /pad/x HTTP/1.1");
        frame.extend_from_slice(&[0xFF; 32]);
        let hit = decode(&frame).unwrap().unwrap();
        assert_eq!(hit.section, "/pad");
    }

    #[test]
    fn non_utf8_payload_is_dropped() {
        let frame = build_frame(IPPROTO_TCP, [10, 0, 0, 7], [10, 0, 0, 1], 8080, 0, 0, &[0x16, 0x03, 0xC3, 0x28]);
        assert_eq!(decode(&frame), Err(FrameDecodeError::PayloadNotUtf8));
    }

    #[test]
    fn malformed_headers_are_errors() {
        assert!(matches!(decode(&[0x45; 10]), Err(FrameDecodeError::Truncated { .. })));

        let mut v6 = http_frame("GET / HTTP/1.1");
        v6[0] = 0x65;
        assert_eq!(decode(&v6), Err(FrameDecodeError::NotIpv4(6)));

        let mut short_ihl = http_frame("GET / HTTP/1.1");
        short_ihl[0] = 0x44;
        assert!(matches!(decode(&short_ihl), Err(FrameDecodeError::BadHeaderLength { layer: "IPv4", .. })));

        let mut short_offset = http_frame("GET / HTTP/1.1");
        short_offset[20 + 12] = 0x30;
        assert!(matches!(decode(&short_offset), Err(FrameDecodeError::BadHeaderLength { layer: "TCP", .. })));
    }

    #[test]
    fn parses_tcp_header_fields() {
        let frame = http_frame("GET / HTTP/1.1");
        let tcp = TcpHeader::parse(&frame[20..]).unwrap();
        assert_eq!(tcp.source_port, 54321);
        assert_eq!(tcp.destination_port, 8080);
        assert_eq!(tcp.sequence, 1000);
        assert_eq!(tcp.acknowledgement, 2000);
        assert_eq!(tcp.header_len, 20);
    }

    #[test]
    fn section_rules() {
        assert_eq!(section_of("/foo/"), "/foo");
        assert_eq!(section_of("/"), "/");
        assert_eq!(section_of("*"), "/");
    }
}
