//! NDEF URI reader/writer engine for NFC Forum Type 2 tags.
//!
//! A background monitor polls the reader, reads or writes one URI record per
//! tag presentation and reports back over a channel.
//!
//! # Features
//!
//! - `pcsc-reader` - PC/SC transport for desktop contactless readers (ACR122, ACR1252)
//! - `serde` - Serialize/Deserialize for configuration and records
//!
//! # Example
//!
//! ```ignore
//! use ntag_uri::{MonitorConfig, MonitorEvent, NfcStation, PcscConfig, WriteRequest};
//!
//! let reader = PcscConfig::default().with_reader_filter("ACR1252");
//! let mut station = NfcStation::initialize(&reader, MonitorConfig::default())?;
//! let events = station.start_monitoring()?;
//!
//! station.set_write_mode(WriteRequest::new("https://example.com").lock_after_write(true).copies(3))?;
//! for event in events {
//!     match event {
//!         MonitorEvent::Write(status) => println!("{}", status),
//!         MonitorEvent::Lock(status) => println!("{}", status),
//!         MonitorEvent::Read(record) => println!("Tag read: {}", record),
//!         MonitorEvent::Log(line) => println!("{}", line),
//!         MonitorEvent::Status(status) => println!("{:?}", status),
//!     }
//! }
//! ```

pub mod apdu;
mod batch;
mod config;
mod monitor;
pub mod ndef;
mod reader;
mod station;
mod transport;
pub mod type2;
mod types;

#[cfg(feature = "pcsc-reader")]
mod pcsc;

// Re-exports
pub use batch::{BatchController, BatchProgress, BatchState};
pub use config::{MAX_BATCH, MonitorConfig};
pub use ndef::{EncodedRecord, decode_uri, encode_uri, normalize_uri};
pub use reader::{Phase, TagReader};
pub use station::NfcStation;
pub use transport::TagTransport;
pub use types::{
    ErrorKind, LockStatus, Mode, MonitorEvent, OperationOutcome, ReaderStatus, TagError, TagId,
    UriRecord, WriteReport, WriteRequest, WriteStatus,
};

#[cfg(feature = "pcsc-reader")]
pub use crate::pcsc::{PcscConfig, PcscTransport};
