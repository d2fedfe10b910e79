//! Byte-level formats shared by ledger producers and the replay engine.
//!
//! Nothing in here interprets table contents: records are framed, msgpack
//! elements are delimited, snapshot blocks are framed, and the snapshot
//! catalog is appended to and scanned.

pub mod error;
pub mod record;
pub mod msgpack;
pub mod domain;
pub mod snapshot;
pub mod catalog;
pub mod fixtures;

pub use error::{FormatError, Result};
pub use record::{GcmHeader, RecordFrame};
pub use msgpack::{MsgReader, MsgWriter};
pub use domain::{DomainWriter, MAP_START_INDICATOR, SIGNATURES_TABLE};
pub use catalog::CatalogEntry;
