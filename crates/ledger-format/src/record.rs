use crate::error::{FormatError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::ops::Range;
use std::path::Path;

/// Width of the leading `txn_size` field.
pub const TXN_SIZE_FIELD: usize = 4;
pub const GCM_SIZE_TAG: usize = 16;
pub const GCM_SIZE_IV: usize = 12;
pub const DOMAIN_SIZE_FIELD: usize = 8;
/// Smallest legal `txn_size`: the GCM header plus the public domain length.
pub const MIN_TXN_SIZE: usize = GcmHeader::SIZE + DOMAIN_SIZE_FIELD;

/// Opaque AES-GCM header carried by every record. Never decrypted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcmHeader {
    pub tag: [u8; GCM_SIZE_TAG],
    pub iv: [u8; GCM_SIZE_IV],
}

impl GcmHeader {
    pub const SIZE: usize = GCM_SIZE_TAG + GCM_SIZE_IV; // 28 bytes

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        let mut tag = [0u8; GCM_SIZE_TAG];
        let mut iv = [0u8; GCM_SIZE_IV];
        tag.copy_from_slice(&buf[0..GCM_SIZE_TAG]);
        iv.copy_from_slice(&buf[GCM_SIZE_TAG..Self::SIZE]);
        Self { tag, iv }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..GCM_SIZE_TAG].copy_from_slice(&self.tag);
        buf[GCM_SIZE_TAG..Self::SIZE].copy_from_slice(&self.iv);
        buf
    }
}

/// Location and header fields of one transaction record inside a ledger buffer.
///
/// Layout (little-endian):
/// ```text
/// [txn_size: u32][gcm tag: 16][gcm iv: 12][domain_size: u64][public domain][private domain]
/// ```
/// `txn_size` counts everything after itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFrame {
    pub offset: usize,
    pub txn_size: u32,
    pub gcm: GcmHeader,
    pub domain_size: u64,
}

impl RecordFrame {
    /// Parses the record header starting at `offset`.
    ///
    /// The whole record must fit in `buf`; a record cut short by the end of
    /// the buffer is reported as `Truncated`.
    pub fn parse(buf: &[u8], offset: usize) -> Result<Self> {
        let available = buf.len().saturating_sub(offset);
        if available < TXN_SIZE_FIELD {
            return Err(FormatError::Truncated {
                offset,
                needed: TXN_SIZE_FIELD,
                available,
            });
        }

        let mut rd = &buf[offset..offset + TXN_SIZE_FIELD];
        let txn_size = rd.read_u32::<LittleEndian>()?;

        let needed = TXN_SIZE_FIELD + txn_size as usize;
        if available < needed {
            return Err(FormatError::Truncated {
                offset,
                needed,
                available,
            });
        }

        let body_start = offset + TXN_SIZE_FIELD;
        let (gcm, domain_size) = parse_body_header(&buf[body_start..offset + needed], body_start)?;

        Ok(Self {
            offset,
            txn_size,
            gcm,
            domain_size,
        })
    }

    /// Bytes covered by `txn_size`. This is what the Merkle history hashes.
    pub fn body_range(&self) -> Range<usize> {
        let start = self.offset + TXN_SIZE_FIELD;
        start..start + self.txn_size as usize
    }

    pub fn domain_range(&self) -> Range<usize> {
        let start = self.offset + TXN_SIZE_FIELD + MIN_TXN_SIZE;
        start..start + self.domain_size as usize
    }

    /// Encrypted private domain trailing the public one. Usually empty.
    pub fn private_range(&self) -> Range<usize> {
        self.domain_range().end..self.end()
    }

    /// Offset of the next record.
    pub fn end(&self) -> usize {
        self.offset + TXN_SIZE_FIELD + self.txn_size as usize
    }
}

/// Reads the GCM header and public domain size from a record body
/// (the bytes after `txn_size`). `offset` is only used for error reporting.
pub fn parse_body_header(body: &[u8], offset: usize) -> Result<(GcmHeader, u64)> {
    if body.len() < MIN_TXN_SIZE {
        return Err(FormatError::malformed(
            offset,
            format!(
                "transaction of {} bytes is shorter than its {}-byte header",
                body.len(),
                MIN_TXN_SIZE
            ),
        ));
    }

    let gcm_bytes: &[u8; GcmHeader::SIZE] = body[..GcmHeader::SIZE]
        .try_into()
        .map_err(|_| FormatError::malformed(offset, "gcm header"))?;
    let gcm = GcmHeader::from_bytes(gcm_bytes);

    let mut rd = &body[GcmHeader::SIZE..MIN_TXN_SIZE];
    let domain_size = rd.read_u64::<LittleEndian>()?;

    let room = (body.len() - MIN_TXN_SIZE) as u64;
    if domain_size > room {
        return Err(FormatError::malformed(
            offset + GcmHeader::SIZE,
            format!("public domain of {} bytes overruns the {} bytes left in the transaction", domain_size, room),
        ));
    }

    Ok((gcm, domain_size))
}

/// Serializes one record, size field included.
pub fn encode_record(gcm: &GcmHeader, public_domain: &[u8], private_domain: &[u8]) -> Result<Vec<u8>> {
    let txn_size = MIN_TXN_SIZE + public_domain.len() + private_domain.len();
    if txn_size > u32::MAX as usize {
        return Err(FormatError::Encode(
            "transaction too large (exceeds u32::MAX bytes)".to_string(),
        ));
    }

    let mut buf = Vec::with_capacity(TXN_SIZE_FIELD + txn_size);
    buf.write_u32::<LittleEndian>(txn_size as u32)?;
    buf.extend_from_slice(&gcm.to_bytes());
    buf.write_u64::<LittleEndian>(public_domain.len() as u64)?;
    buf.extend_from_slice(public_domain);
    buf.extend_from_slice(private_domain);
    Ok(buf)
}

/// Walks record frames from the start of a buffer.
pub struct FrameIter<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<RecordFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match RecordFrame::parse(self.buf, self.offset) {
            Ok(frame) => {
                self.offset = frame.end();
                Some(Ok(frame))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

pub fn frames(buf: &[u8]) -> FrameIter<'_> {
    FrameIter {
        buf,
        offset: 0,
        failed: false,
    }
}

/// Append-only writer for ledger files.
pub struct LedgerFileWriter {
    file: File,
    len: u64,
    sync: bool,
}

impl LedgerFileWriter {
    /// Opens (or creates) a ledger file in append mode.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len, sync })
    }

    /// Appends an already encoded record and returns the offset it starts at.
    pub fn append(&mut self, record: &[u8]) -> Result<u64> {
        let offset = self.len;
        self.file.write_all(record)?;
        if self.sync {
            self.file.sync_data()?;
        }
        self.len += record.len() as u64;
        Ok(offset)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
