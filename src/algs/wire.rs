//! Fixed, versioned, little-endian wire types for the migration paths.
//!
//! Row payloads are variable-length (coordinate dimension and connectivity
//! arity differ per block), so each row travels as a fixed [`WireRowHdr`]
//! followed by `n_coord` `f64` words and `n_conn` `u64` words. All
//! multi-byte integers are **little-endian** on the wire: stored pre-LE with
//! `.to_le()` and decoded with `.from_le()`.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Count of following records or bytes, exchanged in the sizing phase.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A tagged global id (u64) carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireId {
    pub id_le: u64,
}

impl WireId {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// Per-row header of the migration and ghost-reply payloads.
///
/// `owner_le` carries the owner rank the receiver must record for the row:
/// the destination rank itself for migrated rows, the authoritative owner
/// for ghost replies. NOTE: ranks are u32 (never usize) on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireRowHdr {
    pub gid_le: u64,
    pub n_coord_le: u32,
    pub n_conn_le: u32,
    pub owner_le: u32,
    pub _pad: u32, // keep 8-byte alignment (explicit)
}

impl WireRowHdr {
    pub const SIZE: usize = 24; // 8 + 4 + 4 + 4 + 4

    pub fn new(gid: u64, n_coord: usize, n_conn: usize, owner: u32) -> Self {
        Self {
            gid_le: gid.to_le(),
            n_coord_le: (n_coord as u32).to_le(),
            n_conn_le: (n_conn as u32).to_le(),
            owner_le: owner.to_le(),
            _pad: 0,
        }
    }

    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn n_coord(&self) -> usize {
        u32::from_le(self.n_coord_le) as usize
    }
    pub fn n_conn(&self) -> usize {
        u32::from_le(self.n_conn_le) as usize
    }
    pub fn owner(&self) -> u32 {
        u32::from_le(self.owner_le)
    }
}

/// Appends a row record (header + coordinate words + id words) to `buf`.
pub fn push_row(buf: &mut Vec<u8>, hdr: WireRowHdr, coords: &[f64], conn: &[u64]) {
    debug_assert_eq!(hdr.n_coord(), coords.len());
    debug_assert_eq!(hdr.n_conn(), conn.len());
    buf.extend_from_slice(cast_slice(&[hdr]));
    let coord_words: Vec<u64> = coords.iter().map(|c| c.to_bits().to_le()).collect();
    buf.extend_from_slice(cast_slice(&coord_words));
    let conn_words: Vec<u64> = conn.iter().map(|c| c.to_le()).collect();
    buf.extend_from_slice(cast_slice(&conn_words));
}

/// Sequentially decodes the row records of one received buffer.
pub struct RowReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// One decoded row: header plus owned coordinate and connectivity words.
pub struct WireRow {
    pub hdr: WireRowHdr,
    pub coords: Vec<f64>,
    pub conn: Vec<u64>,
}

impl<'a> RowReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Reads the next row, or `None` at a clean end of buffer.
    ///
    /// A buffer that ends mid-record yields `Err(())`; callers translate
    /// that into their truncated-payload error with the peer rank attached.
    pub fn next_row(&mut self) -> Result<Option<WireRow>, ()> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        if self.remaining() < WireRowHdr::SIZE {
            return Err(());
        }
        let mut hdr = WireRowHdr::zeroed();
        cast_slice_mut(std::slice::from_mut(&mut hdr))
            .copy_from_slice(&self.buf[self.pos..self.pos + WireRowHdr::SIZE]);
        self.pos += WireRowHdr::SIZE;

        let n_words = hdr.n_coord() + hdr.n_conn();
        if self.remaining() < n_words * 8 {
            return Err(());
        }
        let mut words = vec![0u64; n_words];
        cast_slice_mut(&mut words).copy_from_slice(&self.buf[self.pos..self.pos + n_words * 8]);
        self.pos += n_words * 8;

        let coords = words[..hdr.n_coord()]
            .iter()
            .map(|w| f64::from_bits(u64::from_le(*w)))
            .collect();
        let conn = words[hdr.n_coord()..].iter().map(|w| u64::from_le(*w)).collect();
        Ok(Some(WireRow { hdr, coords, conn }))
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    // Pod/Zeroable ensures no padding contains uninit when cast to bytes.
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireId>() == 8);
    assert!(size_of::<WireRowHdr>() == WireRowHdr::SIZE);
    assert!(align_of::<WireRowHdr>() == 8);
};

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(WireId, u64);

    #[test]
    fn roundtrip_node_row() {
        let mut buf = Vec::new();
        let hdr = WireRowHdr::new(7, 3, 2, 1);
        push_row(&mut buf, hdr, &[1.0, -2.5, 0.125], &[10, 11]);

        let mut rd = RowReader::new(&buf);
        let row = rd.next_row().unwrap().unwrap();
        assert_eq!(row.hdr.gid(), 7);
        assert_eq!(row.hdr.owner(), 1);
        assert_eq!(row.coords, vec![1.0, -2.5, 0.125]);
        assert_eq!(row.conn, vec![10, 11]);
        assert!(rd.next_row().unwrap().is_none());
    }

    #[test]
    fn roundtrip_element_row() {
        let mut buf = Vec::new();
        push_row(&mut buf, WireRowHdr::new(1 << 63, 0, 4, 2), &[], &[0, 1, 5, 4]);
        let mut rd = RowReader::new(&buf);
        let row = rd.next_row().unwrap().unwrap();
        assert_eq!(row.hdr.gid(), 1 << 63);
        assert!(row.coords.is_empty());
        assert_eq!(row.conn, vec![0, 1, 5, 4]);
    }

    #[test]
    fn several_rows_in_one_buffer() {
        let mut buf = Vec::new();
        push_row(&mut buf, WireRowHdr::new(1, 2, 0, 0), &[0.0, 1.0], &[]);
        push_row(&mut buf, WireRowHdr::new(2, 2, 1, 0), &[2.0, 3.0], &[9]);
        let mut rd = RowReader::new(&buf);
        let mut gids = Vec::new();
        while let Some(row) = rd.next_row().unwrap() {
            gids.push(row.hdr.gid());
        }
        assert_eq!(gids, vec![1, 2]);
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let mut buf = Vec::new();
        push_row(&mut buf, WireRowHdr::new(1, 2, 0, 0), &[0.0, 1.0], &[]);
        buf.truncate(buf.len() - 1);
        let mut rd = RowReader::new(&buf);
        assert!(rd.next_row().is_err());
    }

    #[test]
    fn wire_count_roundtrip() {
        let c = WireCount::new(4096);
        let bytes: Vec<u8> = cast_slice(std::slice::from_ref(&c)).to_vec();
        let mut out = WireCount::zeroed();
        cast_slice_mut(std::slice::from_mut(&mut out)).copy_from_slice(&bytes);
        assert_eq!(out.get(), 4096);
    }
}
