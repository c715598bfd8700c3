use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::Error;

/// RTP and RTCP over connection-oriented transport
///
/// [RFC4571]: https://tools.ietf.org/html/rfc4571
///
/// Every packet on the stream is preceded by a 16 bit unsigned length field
/// in network byte order. The length counts the packet only, not the field
/// itself. A length of zero is valid and carries no packet.
pub struct Framing;

impl Framing {
    /// Size of the length prefix.
    pub const HEADER_SIZE: usize = 2;

    /// Total size of the frame starting at the beginning of `bytes`,
    /// including the length prefix.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_transport_codec::Framing;
    ///
    /// assert_eq!(Framing::frame_size(&[0x00, 0x0c]).unwrap(), 14);
    /// assert!(Framing::frame_size(&[0x00]).is_err());
    /// ```
    pub fn frame_size(bytes: &[u8]) -> Result<usize, Error> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(Error::InvalidInput);
        }

        Ok(u16::from_be_bytes(bytes[..2].try_into()?) as usize + Self::HEADER_SIZE)
    }

    /// Appends `payload` to `bytes` as one frame.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use rtp_transport_codec::Framing;
    ///
    /// let mut bytes = BytesMut::with_capacity(1500);
    /// Framing::encode(&[0x80, 0x60, 0x00, 0x01], &mut bytes).unwrap();
    ///
    /// assert_eq!(&bytes[..], &[0x00, 0x04, 0x80, 0x60, 0x00, 0x01]);
    /// ```
    pub fn encode(payload: &[u8], bytes: &mut BytesMut) -> Result<(), Error> {
        if payload.len() > u16::MAX as usize {
            return Err(Error::FrameTooLarge(payload.len()));
        }

        bytes.reserve(payload.len() + Self::HEADER_SIZE);
        bytes.put_u16(payload.len() as u16);
        bytes.extend_from_slice(payload);
        Ok(())
    }
}

/// Splits a byte stream back into frames.
///
/// A single read from a stream socket may end in the middle of a frame or
/// carry several frames, so bytes are accumulated until a complete frame is
/// available.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Takes the next complete frame payload, with the length prefix
    /// stripped.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_transport_codec::FrameDecoder;
    ///
    /// let mut decoder = FrameDecoder::default();
    /// decoder.extend(&[0x00, 0x03, 0x01, 0x02]);
    /// assert!(decoder.next_frame().is_none());
    ///
    /// decoder.extend(&[0x03, 0x00, 0x01]);
    /// assert_eq!(&decoder.next_frame().unwrap()[..], &[0x01, 0x02, 0x03]);
    /// assert_eq!(decoder.len(), 2);
    /// ```
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let size = Framing::frame_size(&self.buffer).ok()?;
        if size > self.buffer.len() {
            return None;
        }

        let mut frame = self.buffer.split_to(size);
        frame.advance(Framing::HEADER_SIZE);
        Some(frame.freeze())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
