//! Ogg page reading and packet reassembly.
//!
//! Only what the transcoder output needs: pages are framed and checksummed,
//! and their segment tables are walked to rebuild packets. A segment of the
//! maximum size continues the current packet, any shorter segment ends it.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncRead;

use crate::error::{DcaError, Result};
use crate::format::read_full_async;

/// Every page starts with this
pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// Fixed part of the page header, before the segment table
pub const HEADER_LEN: usize = 27;

/// Lacing value of a segment that continues into the next one
pub const MAX_SEGMENT_LEN: usize = 255;

/// Page continues a packet from the previous page
pub const FLAG_CONTINUED: u8 = 0x01;
/// First page of a logical bitstream
pub const FLAG_BOS: u8 = 0x02;
/// Last page of a logical bitstream
pub const FLAG_EOS: u8 = 0x04;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04c1_1db7
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

fn crc_update(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &b| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ b) as usize]
    })
}

/// One Ogg page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    header_type: u8,
    granule_position: i64,
    serial: u32,
    sequence: u32,
    segment_table: Vec<u8>,
    body: Bytes,
}

impl Page {
    /// Build a page; the body must be exactly the sum of the lacing values.
    pub fn new(
        header_type: u8,
        granule_position: i64,
        serial: u32,
        sequence: u32,
        segment_table: Vec<u8>,
        body: Bytes,
    ) -> Result<Self> {
        if segment_table.len() > 255 {
            return Err(DcaError::Page(format!(
                "{} segments in one page",
                segment_table.len()
            )));
        }
        let body_len: usize = segment_table.iter().map(|&l| l as usize).sum();
        if body_len != body.len() {
            return Err(DcaError::Page(format!(
                "segment table describes {} bytes, body has {}",
                body_len,
                body.len()
            )));
        }
        Ok(Self {
            header_type,
            granule_position,
            serial,
            sequence,
            segment_table,
            body,
        })
    }

    pub fn header_type(&self) -> u8 {
        self.header_type
    }

    pub fn granule_position(&self) -> i64 {
        self.granule_position
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn segment_table(&self) -> &[u8] {
        &self.segment_table
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body split along the segment table.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let mut pos = 0;
        self.segment_table.iter().map(move |&len| {
            let segment = &self.body[pos..pos + len as usize];
            pos += len as usize;
            segment
        })
    }

    /// Serialize with a freshly computed checksum.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(HEADER_LEN + self.segment_table.len() + self.body.len());
        buf.put_slice(CAPTURE_PATTERN);
        buf.put_u8(0);
        buf.put_u8(self.header_type);
        buf.put_i64_le(self.granule_position);
        buf.put_u32_le(self.serial);
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(0);
        buf.put_u8(self.segment_table.len() as u8);
        buf.put_slice(&self.segment_table);
        buf.put_slice(&self.body);

        let crc = crc_update(0, &buf);
        buf[22..26].copy_from_slice(&crc.to_le_bytes());
        buf.freeze()
    }
}

/// Reads consecutive pages from a byte stream.
pub struct PageReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> PageReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Next page, or `None` at a clean end of input.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        let mut header = [0u8; HEADER_LEN];
        let read = read_full_async(&mut self.reader, &mut header).await?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_LEN {
            return Err(DcaError::Page(format!(
                "truncated page header ({} of {} bytes)",
                read, HEADER_LEN
            )));
        }
        if &header[..4] != CAPTURE_PATTERN {
            return Err(DcaError::Page("missing capture pattern".to_string()));
        }
        if header[4] != 0 {
            return Err(DcaError::Page(format!(
                "unsupported stream structure version {}",
                header[4]
            )));
        }

        let mut segment_table = vec![0u8; header[26] as usize];
        self.fill(&mut segment_table, "segment table").await?;
        let body_len: usize = segment_table.iter().map(|&l| l as usize).sum();
        let mut body = vec![0u8; body_len];
        self.fill(&mut body, "page body").await?;

        let expected = u32::from_le_bytes([header[22], header[23], header[24], header[25]]);
        header[22..26].fill(0);
        let crc = crc_update(crc_update(crc_update(0, &header), &segment_table), &body);
        if crc != expected {
            return Err(DcaError::Page(format!(
                "checksum mismatch (expected {:08x}, computed {:08x})",
                expected, crc
            )));
        }

        Ok(Some(Page {
            header_type: header[5],
            granule_position: i64::from_le_bytes(header[6..14].try_into().unwrap_or_default()),
            serial: u32::from_le_bytes([header[14], header[15], header[16], header[17]]),
            sequence: u32::from_le_bytes([header[18], header[19], header[20], header[21]]),
            segment_table,
            body: Bytes::from(body),
        }))
    }

    async fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        let read = read_full_async(&mut self.reader, buf).await?;
        if read < buf.len() {
            return Err(DcaError::Page(format!(
                "truncated {} ({} of {} bytes)",
                what,
                read,
                buf.len()
            )));
        }
        Ok(())
    }
}

/// Rebuilds packets from the segments of consecutive pages.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    buf: BytesMut,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk one page's segment table and return the packets it completes.
    /// A packet still open at the end of the page carries over to the next.
    pub fn push(&mut self, page: &Page) -> Vec<Bytes> {
        let mut packets = Vec::new();
        for segment in page.segments() {
            self.buf.extend_from_slice(segment);
            // An Opus packet is at least one byte long
            if segment.len() < MAX_SEGMENT_LEN && !self.buf.is_empty() {
                packets.push(self.buf.split().freeze());
            }
        }
        packets
    }

    /// Bytes of the packet still being assembled
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Take whatever is left once the page stream has ended.
    pub fn finish(&mut self) -> Option<Bytes> {
        (!self.buf.is_empty()).then(|| self.buf.split().freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(sequence: u32, segment_table: Vec<u8>) -> Page {
        let len: usize = segment_table.iter().map(|&l| l as usize).sum();
        let body: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
        Page::new(0, sequence as i64 * 960, 0x1234, sequence, segment_table, body.into()).unwrap()
    }

    #[test]
    fn test_crc_reference_value() {
        // Polynomial 0x04c11db7, zero init, no reflection, no final xor
        assert_eq!(crc_update(0, b"123456789"), 0x89a1_897f);
    }

    #[tokio::test]
    async fn test_page_round_trip() {
        let original = page(3, vec![255, 10, 0, 7]);
        let bytes = original.to_bytes();
        let mut reader = PageReader::new(&bytes[..]);

        let parsed = reader.next_page().await.unwrap().unwrap();
        assert_eq!(parsed, original);
        assert!(reader.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_page_rejected() {
        let mut bytes = page(0, vec![20]).to_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut reader = PageReader::new(&bytes[..]);
        assert!(matches!(reader.next_page().await, Err(DcaError::Page(_))));
    }

    #[tokio::test]
    async fn test_garbage_and_truncation_rejected() {
        let garbage = [0u8; 40];
        let mut reader = PageReader::new(&garbage[..]);
        assert!(matches!(reader.next_page().await, Err(DcaError::Page(_))));

        let bytes = page(0, vec![100]).to_bytes();
        let mut reader = PageReader::new(&bytes[..bytes.len() - 10]);
        assert!(matches!(reader.next_page().await, Err(DcaError::Page(_))));

        let mut reader = PageReader::new(&bytes[..12]);
        assert!(matches!(reader.next_page().await, Err(DcaError::Page(_))));
    }

    #[test]
    fn test_page_rejects_inconsistent_body() {
        assert!(Page::new(0, 0, 0, 0, vec![4], Bytes::from_static(b"abc")).is_err());
    }

    #[test]
    fn test_short_segment_ends_packet() {
        let mut assembler = PacketAssembler::new();
        let packets = assembler.push(&page(0, vec![10, 20, 255, 30]));

        let lens: Vec<usize> = packets.iter().map(|p| p.len()).collect();
        assert_eq!(lens, vec![10, 20, 285]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_packet_spans_pages() {
        let mut assembler = PacketAssembler::new();
        assert!(assembler.push(&page(0, vec![255, 255])).is_empty());
        assert_eq!(assembler.pending(), 510);

        let packets = assembler.push(&page(1, vec![1, 5]));
        let lens: Vec<usize> = packets.iter().map(|p| p.len()).collect();
        assert_eq!(lens, vec![511, 5]);
    }

    #[test]
    fn test_zero_lacing_terminates_full_packet() {
        let mut assembler = PacketAssembler::new();
        let packets = assembler.push(&page(0, vec![255, 0, 0, 3]));

        let lens: Vec<usize> = packets.iter().map(|p| p.len()).collect();
        assert_eq!(lens, vec![255, 3]);
    }

    #[test]
    fn test_trailing_partial_packet_flushed_once() {
        let mut assembler = PacketAssembler::new();
        assert_eq!(assembler.push(&page(0, vec![4, 255])).len(), 1);

        let tail = assembler.finish().unwrap();
        assert_eq!(tail.len(), 255);
        assert!(assembler.finish().is_none());
    }
}
