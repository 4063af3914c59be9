//! Command sequencing for one operation on the tag in the field

use log::{debug, info, warn};

use crate::apdu::{self, PAGE_LEN, READ_LEN};
use crate::ndef::{self, TlvLayout};
use crate::transport::TagTransport;
use crate::type2::{self, CapabilityContainer, TagMemory, Type2Layout};
use crate::types::{TagError, TagId, UriRecord, WriteReport, WriteRequest, bytes_to_hex};

/// Step of the operation currently running on the tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Probing,
    Reading,
    Writing,
    Locking,
    Done,
    Failed,
}

/// Tag memory as found by the probe that starts every operation
#[derive(Debug, Clone)]
struct Snapshot {
    memory: TagMemory,
    layout: Type2Layout,
    /// Data area bytes read so far (page 4 onwards)
    raw: Vec<u8>,
}

/// Reads and writes NDEF URI records on Type 2 tags through a reader transport
pub struct TagReader<T: TagTransport> {
    transport: T,
    phase: Phase,
    default_capacity: usize,
}

impl<T: TagTransport> TagReader<T> {
    /// Data area assumed when the capability container declares none (Ultralight)
    pub const DEFAULT_CAPACITY: usize = 48;

    /// Create a new tag reader with the given transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            phase: Phase::Idle,
            default_capacity: Self::DEFAULT_CAPACITY,
        }
    }

    pub fn with_default_capacity(mut self, capacity: usize) -> Self {
        self.default_capacity = capacity;
        self
    }

    pub fn reader_name(&self) -> &str {
        self.transport.reader_name()
    }

    /// Phase reached by the last operation
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Check for a tag in the field
    pub fn poll(&mut self) -> Result<Option<TagId>, TagError> {
        self.transport
            .poll()
            .map_err(|e| TagError::Transport(format!("{:?}", e)))
    }

    pub fn close(&mut self) -> Result<(), TagError> {
        self.transport
            .close()
            .map_err(|e| TagError::Transport(format!("{:?}", e)))
    }

    /// Read the URI stored on the tag in the field.
    ///
    /// Only READ commands are issued; tag memory is never altered.
    pub fn read_tag(&mut self) -> Result<UriRecord, TagError> {
        let result = self.snapshot().and_then(|snapshot| ndef::decode_uri(&snapshot.raw));
        self.finish(result)
    }

    /// Write `request.uri` to the tag in the field, locking it afterwards if asked.
    ///
    /// The tag is left untouched unless every check passes: it must be NDEF
    /// formatted, writable, hold no URI (unless `allow_overwrite`) and have
    /// room for the record. Lock bits are only set once all data pages have
    /// been acknowledged.
    pub fn write_tag(&mut self, request: &WriteRequest) -> Result<WriteReport, TagError> {
        let result = self.write_sequence(request);
        self.finish(result)
    }

    /// Set the lock bits of the tag in the field without touching its data.
    ///
    /// Bits already set are left alone, so this also completes a lock that
    /// failed part way through a write ([`TagError::LockFailedAfterWrite`]).
    pub fn lock_tag(&mut self) -> Result<(), TagError> {
        let result = self.lock_sequence();
        self.finish(result)
    }

    fn lock_sequence(&mut self) -> Result<(), TagError> {
        let Snapshot { mut memory, layout, .. } = self.snapshot()?;
        self.set_phase(Phase::Locking);
        self.lock(&layout, &mut memory)?;
        info!("Tag locked");
        Ok(())
    }

    fn write_sequence(&mut self, request: &WriteRequest) -> Result<WriteReport, TagError> {
        let Snapshot {
            mut memory,
            layout,
            raw,
        } = self.snapshot()?;

        if layout.cc.is_read_only() {
            return Err(TagError::ReadOnly);
        }
        match ndef::decode_uri(&raw) {
            Ok(existing) if !existing.uri.is_empty() && !request.allow_overwrite => {
                return Err(TagError::AlreadyWritten(existing.uri));
            }
            Ok(existing) => debug!("Overwriting {}", existing.uri),
            Err(e) => debug!("Existing content not a URI: {}", e),
        }

        let encoded = ndef::encode_uri(&request.uri, layout.message_capacity())?;
        let image = layout.image(&encoded);
        let writes = type2::plan_data_writes(&image, layout.length_field(&encoded))?;

        self.set_phase(Phase::Writing);
        for (page, data) in &writes {
            self.write_page(*page, data)?;
        }
        info!("Wrote {} ({} bytes)", encoded.record, encoded.len());

        if request.lock_after_write {
            self.set_phase(Phase::Locking);
            self.lock(&layout, &mut memory)
                .map_err(|e| TagError::LockFailedAfterWrite(e.to_string()))?;
            info!("Tag locked");
        }

        Ok(WriteReport {
            record: encoded.record,
            pages_written: writes.len(),
            locked: request.lock_after_write,
        })
    }

    /// Read pages 0-3 and enough of the data area to cover the NDEF message
    fn snapshot(&mut self) -> Result<Snapshot, TagError> {
        self.set_phase(Phase::Probing);
        let mut memory = TagMemory::default();
        let head = self.read_pages(0)?;
        memory.insert_block(0, &head);

        let mut cc_page = [0u8; PAGE_LEN];
        cc_page.copy_from_slice(&head[type2::CC_PAGE as usize * PAGE_LEN..][..PAGE_LEN]);
        let cc = CapabilityContainer::parse(cc_page)?;
        debug!("Capability container: {:?}", cc);

        self.set_phase(Phase::Reading);
        let capacity = if cc.data_area_size == 0 {
            self.default_capacity
        } else {
            cc.data_area_size
        };
        let mut raw = Vec::with_capacity(capacity);
        let mut page = type2::DATA_START_PAGE;
        while raw.len() < capacity {
            let block = self.read_pages(page)?;
            memory.insert_block(page, &block);
            raw.extend_from_slice(&block);

            match ndef::scan_tlvs(&raw) {
                Ok(TlvLayout { complete: false, .. }) => {}
                _ => break,
            }
            page = match page.checked_add((READ_LEN / PAGE_LEN) as u8) {
                Some(next) => next,
                None => break,
            };
        }
        raw.truncate(capacity);

        let tlvs = ndef::scan_tlvs(&raw).unwrap_or_default();
        let layout = Type2Layout::new(cc, self.default_capacity, &raw, &tlvs);
        Ok(Snapshot {
            memory,
            layout,
            raw,
        })
    }

    fn lock(&mut self, layout: &Type2Layout, memory: &mut TagMemory) -> Result<(), TagError> {
        for page in type2::lock_pages(layout) {
            if !memory.contains(page) {
                let block = self.read_pages(page)?;
                memory.insert_block(page, &block);
            }
        }
        for command in type2::build_lock_commands(layout, memory)? {
            self.exec(&command)?;
        }
        Ok(())
    }

    /// Read four pages starting at `page`
    pub fn read_pages(&mut self, page: u8) -> Result<[u8; READ_LEN], TagError> {
        let data = self.exec(&apdu::read_pages(page))?;
        data.get(..READ_LEN)
            .and_then(|d| <[u8; READ_LEN]>::try_from(d).ok())
            .ok_or_else(|| {
                TagError::InvalidResponse(format!(
                    "Read of page {} returned {} bytes",
                    page,
                    data.len()
                ))
            })
    }

    /// Write one page
    pub fn write_page(&mut self, page: u8, data: &[u8; PAGE_LEN]) -> Result<(), TagError> {
        self.exec(&apdu::write_page(page, data)).map(|_| ())
    }

    fn set_phase(&mut self, phase: Phase) {
        debug!("Phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn finish<R>(&mut self, result: Result<R, TagError>) -> Result<R, TagError> {
        match &result {
            Ok(_) => self.set_phase(Phase::Done),
            Err(e) => {
                warn!("Tag operation failed in {:?}: {}", self.phase, e);
                self.set_phase(Phase::Failed);
            }
        }
        result
    }

    fn exec(&mut self, cmd: &[u8]) -> Result<Vec<u8>, TagError> {
        debug!("Sending command: {}", bytes_to_hex(cmd));
        let response = self
            .transport
            .transceive(cmd)
            .map_err(|e| TagError::Transport(format!("{:?}", e)))?;
        debug!("Received {} bytes: {}", response.len(), bytes_to_hex(&response));
        apdu::check_status(&response).map(<[u8]>::to_vec)
    }
}
