//! Pseudo-APDU framing for PC/SC contactless readers (ACR122/ACR1252 class)
//!
//! The reader maps these onto Type 2 tag READ/WRITE commands. Every
//! response ends in a two-byte status word; `90 00` means success.

use crate::types::TagError;

const CLA: u8 = 0xFF;
const INS_GET_DATA: u8 = 0xCA;
const INS_READ_BINARY: u8 = 0xB0;
const INS_UPDATE_BINARY: u8 = 0xD6;

const SW_SUCCESS: [u8; 2] = [0x90, 0x00];

/// Bytes returned by one READ (four pages)
pub const READ_LEN: usize = 16;
/// Bytes in one Type 2 page
pub const PAGE_LEN: usize = 4;

pub(crate) fn create_command(ins: u8, p1: u8, p2: u8, data: &[u8], le: Option<u8>) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(6 + data.len());
    cmd.extend_from_slice(&[CLA, ins, p1, p2]);
    if !data.is_empty() {
        cmd.push(data.len() as u8);
        cmd.extend_from_slice(data);
    }
    if let Some(le) = le {
        cmd.push(le);
    }
    cmd
}

/// GET DATA: UID of the tag in the field
pub fn get_uid() -> Vec<u8> {
    create_command(INS_GET_DATA, 0x00, 0x00, &[], Some(0x00))
}

/// READ BINARY: four pages starting at `page`
pub fn read_pages(page: u8) -> Vec<u8> {
    create_command(INS_READ_BINARY, 0x00, page, &[], Some(READ_LEN as u8))
}

/// UPDATE BINARY: one page
pub fn write_page(page: u8, data: &[u8; PAGE_LEN]) -> Vec<u8> {
    create_command(INS_UPDATE_BINARY, 0x00, page, data, None)
}

/// Strip and check the trailing status word, returning the payload
pub fn check_status(response: &[u8]) -> Result<&[u8], TagError> {
    let Some(split) = response.len().checked_sub(2) else {
        return Err(TagError::InvalidResponse(format!(
            "Response too short: {:02X?}",
            response
        )));
    };
    let (payload, status) = response.split_at(split);
    if status == SW_SUCCESS {
        Ok(payload)
    } else {
        Err(TagError::InvalidResponse(format!(
            "Command failed with status {:02X}{:02X}",
            status[0], status[1]
        )))
    }
}
