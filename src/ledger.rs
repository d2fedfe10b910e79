// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ledger buffer and the cursor over its records.
//!
//! The ledger is read-only and its length is fixed at open time; records
//! appended to the file afterwards need a fresh `Ledger`.

use crate::domain::{Domain, TableFilter};
use crate::error::{ReplayError, Result};
use ledger_format::record::{frames, RecordFrame};
use memmap2::Mmap;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Mapped(m) => m,
            Backing::Owned(v) => v,
        }
    }
}

pub struct Ledger {
    data: Backing,
    path: Option<PathBuf>,
    filter: TableFilter,
}

/// Byte offset of a cursor. Total order over positions in one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerPosition(pub usize);

impl Ledger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ReplayError::io(0, e))?;
        let len = file.metadata().map_err(|e| ReplayError::io(0, e))?.len();

        // Zero-length maps are rejected on some platforms.
        let data = if len == 0 {
            Backing::Owned(Vec::new())
        } else {
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ReplayError::io(0, e))?;
            Backing::Mapped(mmap)
        };

        tracing::info!("Opened ledger {} ({} bytes)", path.display(), len);
        Ok(Self {
            data,
            path: Some(path.to_path_buf()),
            filter: TableFilter::All,
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Backing::Owned(bytes),
            path: None,
            filter: TableFilter::All,
        }
    }

    /// Restricts which tables cursors materialise.
    pub fn with_filter(mut self, filter: TableFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> &TableFilter {
        &self.filter
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn begin(&self) -> LedgerPosition {
        LedgerPosition(0)
    }

    /// Terminal sentinel position.
    pub fn end(&self) -> LedgerPosition {
        LedgerPosition(self.len())
    }

    pub fn cursor(&self) -> LedgerCursor<'_> {
        LedgerCursor::new(self, 0)
    }

    /// Cursor at `offset`, which must be a record boundary or the end.
    pub fn cursor_at(&self, offset: usize) -> Result<LedgerCursor<'_>> {
        self.check_boundary(offset)?;
        Ok(LedgerCursor::new(self, offset))
    }

    pub fn iter(&self) -> LedgerIter<'_> {
        LedgerIter {
            cursor: self.cursor(),
            failed: false,
        }
    }

    pub fn iter_from(&self, offset: usize) -> Result<LedgerIter<'_>> {
        Ok(LedgerIter {
            cursor: self.cursor_at(offset)?,
            failed: false,
        })
    }

    /// Offsets of every record, in order.
    pub fn record_offsets(&self) -> Result<Vec<usize>> {
        frames(self.bytes())
            .map(|f| f.map(|f| f.offset).map_err(ReplayError::from))
            .collect()
    }

    fn check_boundary(&self, offset: usize) -> Result<()> {
        if offset == 0 || offset == self.len() {
            return Ok(());
        }
        if offset > self.len() {
            return Err(ReplayError::InvalidOffset { offset });
        }
        for frame in frames(self.bytes()) {
            let frame = frame?;
            if frame.offset == offset {
                return Ok(());
            }
            if frame.offset > offset {
                break;
            }
        }
        Err(ReplayError::InvalidOffset { offset })
    }
}

/// Cursor over one ledger. The record at the current position is decoded
/// on first access and memoised until the cursor moves.
pub struct LedgerCursor<'a> {
    ledger: &'a Ledger,
    offset: usize,
    frame: Option<RecordFrame>,
    domain: Option<Domain>,
}

impl<'a> LedgerCursor<'a> {
    fn new(ledger: &'a Ledger, offset: usize) -> Self {
        Self {
            ledger,
            offset,
            frame: None,
            domain: None,
        }
    }

    pub fn ledger(&self) -> &'a Ledger {
        self.ledger
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn position(&self) -> LedgerPosition {
        LedgerPosition(self.offset)
    }

    pub fn has_next(&self) -> bool {
        self.offset < self.ledger.len()
    }

    fn frame(&mut self) -> Result<RecordFrame> {
        if let Some(frame) = self.frame {
            return Ok(frame);
        }
        if !self.has_next() {
            return Err(ReplayError::InvalidOffset { offset: self.offset });
        }
        let frame = RecordFrame::parse(self.ledger.bytes(), self.offset).map_err(|e| {
            let e = ReplayError::from(e);
            tracing::error!("Aborting ledger pass: {}", e);
            e
        })?;
        self.frame = Some(frame);
        Ok(frame)
    }

    /// Record body at the current position: everything `txn_size` covers.
    /// This is what the Merkle history hashes.
    pub fn raw_bytes(&mut self) -> Result<&'a [u8]> {
        let frame = self.frame()?;
        let bytes: &'a [u8] = self.ledger.bytes();
        Ok(&bytes[frame.body_range()])
    }

    /// The whole record, size field included.
    pub fn record_bytes(&mut self) -> Result<&'a [u8]> {
        let frame = self.frame()?;
        let bytes: &'a [u8] = self.ledger.bytes();
        Ok(&bytes[frame.offset..frame.end()])
    }

    /// Decoded domain at the current position. Dereferencing the end is an
    /// `InvalidOffset` error.
    pub fn domain(&mut self) -> Result<&Domain> {
        if self.domain.is_none() {
            let domain = self.decode()?;
            self.domain = Some(domain);
        }
        match &self.domain {
            Some(d) => Ok(d),
            None => Err(ReplayError::InvalidOffset { offset: self.offset }),
        }
    }

    /// Moves the current domain out, decoding it if needed.
    pub fn take_domain(&mut self) -> Result<Domain> {
        match self.domain.take() {
            Some(d) => Ok(d),
            None => self.decode(),
        }
    }

    fn decode(&mut self) -> Result<Domain> {
        let frame = self.frame()?;
        let range = frame.domain_range();
        Domain::decode(&self.ledger.bytes()[range.clone()], range.start, self.ledger.filter()).map_err(|e| {
            tracing::error!("Aborting ledger pass: {}", e);
            e
        })
    }

    /// Steps past the current record. Returns `false` (and does nothing) at the end.
    pub fn advance(&mut self) -> Result<bool> {
        if !self.has_next() {
            return Ok(false);
        }
        let frame = self.frame()?;
        tracing::trace!("Record at {} ({} bytes)", frame.offset, frame.txn_size);
        self.offset = frame.end();
        self.frame = None;
        self.domain = None;
        Ok(true)
    }
}

/// Iterator of owned domains. Stops after the first error.
pub struct LedgerIter<'a> {
    cursor: LedgerCursor<'a>,
    failed: bool,
}

impl<'a> LedgerIter<'a> {
    pub fn offset(&self) -> usize {
        self.cursor.offset()
    }
}

impl<'a> Iterator for LedgerIter<'a> {
    type Item = Result<Domain>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.cursor.has_next() {
            return None;
        }
        let step = self
            .cursor
            .take_domain()
            .and_then(|d| self.cursor.advance().map(|_| d));
        if step.is_err() {
            self.failed = true;
        }
        Some(step)
    }
}
