use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::safe_converter::{PrecheckedCast, SafeCast};

/// One received datagram in the form it is queued and handed to the caller: the source
///  address, source port and payload length as a fixed eight-byte header, followed by the
///  payload. The header is structural - a caller that consumes a whole record receives
///  header plus payload as one byte sequence and parses them itself.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct PacketFrame {
    pub source_addr: Ipv4Addr,
    pub source_port: u16,
    pub payload: Bytes,
}

impl PacketFrame {
    pub const HEADER_LEN: usize = 8;

    pub fn new(source: SocketAddrV4, payload: Bytes) -> PacketFrame {
        PacketFrame {
            source_addr: *source.ip(),
            source_port: source.port(),
            payload,
        }
    }

    /// full length of the framed record, header included
    pub fn framed_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.source_addr.octets());
        buf.put_u16(self.source_port);
        buf.put_u16(self.payload.len().prechecked_cast());
        buf.put_slice(&self.payload);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketFrame> {
        let source_addr = Ipv4Addr::from(buf.try_get_u32()?);
        let source_port = buf.try_get_u16()?;
        let payload_len: usize = buf.try_get_u16()?.safe_cast();

        if buf.remaining() < payload_len {
            bail!("framed record is truncated: header declares {} payload bytes, {} present", payload_len, buf.remaining());
        }
        let payload = buf.copy_to_bytes(payload_len);

        Ok(PacketFrame {
            source_addr,
            source_port,
            payload,
        })
    }

    /// the contiguous wire form that goes into a connection's queue
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.framed_len());
        self.ser(&mut buf);
        buf.freeze()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::hello(Ipv4Addr::new(127,0,0,1), 9100, b"hello".to_vec(), vec![127,0,0,1, 0x23,0x8c, 0,5, 104,101,108,108,111])]
    #[case::empty_payload(Ipv4Addr::new(192,168,1,17), 5000, vec![], vec![192,168,1,17, 0x13,0x88, 0,0])]
    #[case::port_extremes(Ipv4Addr::new(0,0,0,0), u16::MAX, vec![0xab], vec![0,0,0,0, 0xff,0xff, 0,1, 0xab])]
    fn test_ser(#[case] source_addr: Ipv4Addr, #[case] source_port: u16, #[case] payload: Vec<u8>, #[case] expected: Vec<u8>) {
        let frame = PacketFrame {
            source_addr,
            source_port,
            payload: payload.into(),
        };

        let mut buf = BytesMut::new();
        frame.ser(&mut buf);

        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(frame.framed_len(), expected.len());
    }

    #[rstest]
    #[case::hello(PacketFrame { source_addr: Ipv4Addr::new(127,0,0,1), source_port: 9100, payload: Bytes::from_static(b"hello") })]
    #[case::empty(PacketFrame { source_addr: Ipv4Addr::new(10,0,0,1), source_port: 0, payload: Bytes::new() })]
    #[case::binary(PacketFrame { source_addr: Ipv4Addr::new(239,1,1,1), source_port: 9001, payload: Bytes::from_static(&[0, 255, 1, 254]) })]
    fn test_ser_deser(#[case] frame: PacketFrame) {
        let buf = frame.to_bytes();

        let mut b: &[u8] = &buf;
        let deser = PacketFrame::deser(&mut b).unwrap();

        assert!(b.is_empty());
        assert_eq!(frame, deser);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::header_cut_short(vec![127,0,0,1, 0x23])]
    #[case::payload_missing(vec![127,0,0,1, 0x23,0x8c, 0,5])]
    #[case::payload_cut_short(vec![127,0,0,1, 0x23,0x8c, 0,5, 104,101])]
    fn test_deser_truncated(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert!(PacketFrame::deser(&mut b).is_err());
    }
}
