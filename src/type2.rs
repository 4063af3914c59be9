//! NFC Forum Type 2 tag memory layout
//!
//! Memory is addressed in 4-byte pages. Pages 0-1 hold the UID, page 2 the
//! static lock bytes, page 3 the capability container (CC) and the data area
//! starts at page 4. Tags with more than 48 data bytes carry dynamic lock
//! bits, located by a Lock Control TLV or by the default rule.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::apdu::{self, PAGE_LEN, READ_LEN};
use crate::ndef::{EncodedRecord, TLV_TERMINATOR, TlvLayout};
use crate::types::TagError;

pub const STATIC_LOCK_PAGE: u8 = 2;
pub const CC_PAGE: u8 = 3;
pub const DATA_START_PAGE: u8 = 4;
/// Byte address of the data area
pub const DATA_START: usize = DATA_START_PAGE as usize * PAGE_LEN;
/// Data area covered by the static lock bits alone
pub const STATIC_DATA_SIZE: usize = 48;

const CC_MAGIC: u8 = 0xE1;
const CC_WRITE_DENIED: u8 = 0x0F;
const DEFAULT_BYTES_PER_LOCK_BIT: usize = 8;
/// Highest page reachable without sector select
const MAX_PAGE: usize = 0xFF;

/// Capability container (page 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
    pub version: u8,
    /// Data area size in bytes as declared (byte 2 × 8)
    pub data_area_size: usize,
    /// Access nibbles: read (high) and write (low)
    pub access: u8,
}

impl CapabilityContainer {
    pub fn parse(page: [u8; PAGE_LEN]) -> Result<Self, TagError> {
        if page[0] != CC_MAGIC {
            return Err(TagError::NotNdefFormatted);
        }
        Ok(Self {
            version: page[1],
            data_area_size: page[2] as usize * 8,
            access: page[3],
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.access & 0x0F != 0x00
    }
}

/// Dynamic lock bits of a tag larger than 48 data bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicLock {
    /// Byte address of the first lock byte
    pub byte_address: usize,
    /// Number of lock bits
    pub bits: usize,
}

impl DynamicLock {
    /// Decode a Lock Control TLV value
    fn from_control(value: [u8; 3]) -> Self {
        let major_offsets = (value[0] >> 4) as usize;
        let minor_offsets = (value[0] & 0x0F) as usize;
        let bits = if value[1] == 0 { 256 } else { value[1] as usize };
        let major_offset_size = 1usize << (value[2] & 0x0F);
        Self {
            byte_address: major_offsets * major_offset_size + minor_offsets,
            bits,
        }
    }

    /// Location and size when no Lock Control TLV is present
    fn default_for(data_area_size: usize) -> Option<Self> {
        if data_area_size <= STATIC_DATA_SIZE {
            return None;
        }
        Some(Self {
            byte_address: DATA_START + data_area_size,
            bits: (data_area_size - STATIC_DATA_SIZE).div_ceil(DEFAULT_BYTES_PER_LOCK_BIT),
        })
    }

    fn bytes(&self) -> Range<usize> {
        self.byte_address..self.byte_address + self.bits.div_ceil(8)
    }
}

/// Where things live on one particular tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type2Layout {
    pub cc: CapabilityContainer,
    /// Data area size actually used (CC size, or the default when CC says 0)
    pub data_area_size: usize,
    /// Control TLVs preceding the NDEF TLV, kept as-is when writing
    pub controls: Vec<u8>,
    pub dynamic_lock: Option<DynamicLock>,
}

impl Type2Layout {
    pub fn new(
        cc: CapabilityContainer,
        default_capacity: usize,
        raw: &[u8],
        tlvs: &TlvLayout,
    ) -> Self {
        let declared = if cc.data_area_size == 0 {
            default_capacity
        } else {
            cc.data_area_size
        };
        let data_area_size = declared.min((MAX_PAGE + 1) * PAGE_LEN - DATA_START);
        let controls = raw.get(..tlvs.controls_end).unwrap_or_default().to_vec();
        let dynamic_lock = match tlvs.lock_control {
            Some(value) => Some(DynamicLock::from_control(value)),
            None => DynamicLock::default_for(data_area_size),
        };
        Self {
            cc,
            data_area_size,
            controls,
            dynamic_lock,
        }
    }

    /// Bytes available to the NDEF TLV
    pub fn message_capacity(&self) -> usize {
        self.data_area_size.saturating_sub(self.controls.len())
    }

    /// Data-area image: control TLVs, NDEF TLV, then a terminator if it fits
    pub fn image(&self, record: &EncodedRecord) -> Vec<u8> {
        let mut image = Vec::with_capacity(self.data_area_size);
        image.extend_from_slice(&self.controls);
        image.extend_from_slice(record.bytes());
        if image.len() < self.data_area_size {
            image.push(TLV_TERMINATOR);
        }
        image
    }

    /// Position of the NDEF TLV length field within `image()`
    pub fn length_field(&self, record: &EncodedRecord) -> Range<usize> {
        let field = record.length_field();
        field.start + self.controls.len()..field.end + self.controls.len()
    }
}

/// Pages read from a tag, keyed by page number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMemory {
    pages: BTreeMap<u8, [u8; PAGE_LEN]>,
}

impl TagMemory {
    /// Store a READ response (four pages starting at `start`)
    pub fn insert_block(&mut self, start: u8, block: &[u8; READ_LEN]) {
        for (i, chunk) in block.chunks_exact(PAGE_LEN).enumerate() {
            let Some(page) = start.checked_add(i as u8) else {
                break;
            };
            let mut data = [0u8; PAGE_LEN];
            data.copy_from_slice(chunk);
            self.pages.insert(page, data);
        }
    }

    pub fn page(&self, page: u8) -> Option<[u8; PAGE_LEN]> {
        self.pages.get(&page).copied()
    }

    pub fn contains(&self, page: u8) -> bool {
        self.pages.contains_key(&page)
    }
}

/// Bits to set on one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMask {
    pub page: u8,
    pub mask: [u8; PAGE_LEN],
}

impl PageMask {
    pub fn apply(&self, current: [u8; PAGE_LEN]) -> [u8; PAGE_LEN] {
        let mut out = current;
        for (byte, mask) in out.iter_mut().zip(self.mask) {
            *byte |= mask;
        }
        out
    }
}

/// Bits that make the tag read-only, in the order they must be written:
/// CC write access, dynamic lock bits, static lock bytes.
pub fn lock_plan(layout: &Type2Layout) -> Result<Vec<PageMask>, TagError> {
    let mut plan = vec![PageMask {
        page: CC_PAGE,
        mask: [0x00, 0x00, 0x00, CC_WRITE_DENIED],
    }];

    if let Some(dynamic) = layout.dynamic_lock {
        let mut pages: BTreeMap<u8, [u8; PAGE_LEN]> = BTreeMap::new();
        for bit in 0..dynamic.bits {
            let byte = dynamic.byte_address + bit / 8;
            let page = u8::try_from(byte / PAGE_LEN).map_err(|_| {
                TagError::InvalidParameter(format!("Dynamic lock byte {} is out of reach", byte))
            })?;
            pages.entry(page).or_default()[byte % PAGE_LEN] |= 1 << (bit % 8);
        }
        plan.extend(pages.into_iter().map(|(page, mask)| PageMask { page, mask }));
    }

    plan.push(PageMask {
        page: STATIC_LOCK_PAGE,
        mask: [0x00, 0x00, 0xFF, 0xFF],
    });
    Ok(plan)
}

/// Pages whose current content `build_lock_commands` needs
pub fn lock_pages(layout: &Type2Layout) -> Vec<u8> {
    let mut pages = vec![STATIC_LOCK_PAGE, CC_PAGE];
    if let Some(dynamic) = layout.dynamic_lock {
        for byte in dynamic.bytes() {
            if let Ok(page) = u8::try_from(byte / PAGE_LEN) {
                if !pages.contains(&page) {
                    pages.push(page);
                }
            }
        }
    }
    pages
}

/// Write commands that lock the tag, OR-ing lock bits into the current page
/// contents so unrelated bytes on shared pages are preserved.
///
/// Pages that already carry their lock bits are skipped, so the result can
/// finish a lock sequence that stopped part way.
pub fn build_lock_commands(
    layout: &Type2Layout,
    memory: &TagMemory,
) -> Result<Vec<Vec<u8>>, TagError> {
    let mut commands = Vec::new();
    for mask in lock_plan(layout)? {
        let current = memory.page(mask.page).ok_or_else(|| {
            TagError::InvalidParameter(format!("Page {} was not read before locking", mask.page))
        })?;
        let locked = mask.apply(current);
        if locked != current {
            commands.push(apdu::write_page(mask.page, &locked));
        }
    }
    Ok(commands)
}

/// Order the page writes for a data-area image so that a tag torn away
/// mid-write reads back as empty instead of as a damaged record.
///
/// Pages holding the TLV length are first written with length zero, then the
/// remaining pages, and finally the length pages with their real content.
pub fn plan_data_writes(
    image: &[u8],
    length_field: Range<usize>,
) -> Result<Vec<(u8, [u8; PAGE_LEN])>, TagError> {
    let page_count = image.len().div_ceil(PAGE_LEN);
    let last_page = DATA_START_PAGE as usize + page_count.saturating_sub(1);
    if last_page > MAX_PAGE {
        return Err(TagError::InvalidParameter(format!(
            "Image of {} bytes extends past page {}",
            image.len(),
            MAX_PAGE
        )));
    }

    let pages: Vec<(u8, [u8; PAGE_LEN])> = image
        .chunks(PAGE_LEN)
        .enumerate()
        .map(|(i, chunk)| {
            let mut data = [0u8; PAGE_LEN];
            data[..chunk.len()].copy_from_slice(chunk);
            (DATA_START_PAGE + i as u8, data)
        })
        .collect();

    let header_pages: Range<usize> =
        length_field.start / PAGE_LEN..(length_field.end - 1) / PAGE_LEN + 1;

    let mut zeroed = image.to_vec();
    for (n, offset) in length_field.clone().enumerate() {
        // 3-byte form keeps its 0xFF marker
        zeroed[offset] = if length_field.len() == 3 && n == 0 { 0xFF } else { 0x00 };
    }

    let mut writes = Vec::with_capacity(pages.len() + header_pages.len());
    for i in header_pages.clone() {
        let mut data = [0u8; PAGE_LEN];
        let chunk = &zeroed[i * PAGE_LEN..((i + 1) * PAGE_LEN).min(zeroed.len())];
        data[..chunk.len()].copy_from_slice(chunk);
        writes.push((DATA_START_PAGE + i as u8, data));
    }
    writes.extend(
        pages
            .iter()
            .enumerate()
            .filter(|(i, _)| !header_pages.contains(i))
            .map(|(_, page)| *page),
    );
    writes.extend(header_pages.map(|i| pages[i]));
    Ok(writes)
}
