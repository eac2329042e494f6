//! On-disk page formats.
//!
//! Every page is exactly `PAGE_SIZE` bytes and every integer field is
//! little-endian. Link fields (`next_page`, `prev_page`) use 0 for "none";
//! block 0 of each file is a head page (catalog chain head, data file header)
//! and is never the target of a link.

mod catalog_page;
mod data_file_header;
mod record_page;

pub use catalog_page::*;
pub use data_file_header::*;
pub use record_page::*;

use crate::common::{PageKind, Result};

/// A page type that can be decoded from, and encoded into, a page-sized buffer.
/// `deserialize(serialize(x)) == x` for every valid page.
pub trait PageCodec: Sized + Send {
    /// Buffer pool arena that caches pages of this type
    const KIND: PageKind;

    /// Decodes and validates a page image.
    fn deserialize(data: &[u8]) -> Result<Self>;

    /// Encodes the page into `data`, which is PAGE_SIZE bytes.
    fn serialize_into(&self, data: &mut [u8]);

    /// Encodes the page into a fresh buffer.
    fn serialize(&self) -> Vec<u8> {
        let mut data = vec![0u8; crate::common::PAGE_SIZE];
        self.serialize_into(&mut data);
        data
    }
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
