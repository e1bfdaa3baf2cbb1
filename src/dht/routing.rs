use super::error::DhtError;
use super::node::{CompactContact, NodeId, PeerAddress};
use crate::constants::{CELL_SIZE, CONTACT_LEN, ID_LEN, MAX_QUALITY, PEER_LEN};
use memmap2::MmapMut;
use rand::Rng as _;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const QUALITY_OFFSET: usize = CONTACT_LEN;

/// One slot of the routing table: a contact and how much we trust it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingCell {
    pub contact: CompactContact,
    pub quality: u8,
}

impl RoutingCell {
    pub fn new(contact: CompactContact, quality: u8) -> Self {
        Self {
            contact,
            quality: quality.min(MAX_QUALITY),
        }
    }

    /// Parses the on-disk form of a cell. Only the low quality bits are read.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() != CELL_SIZE {
            return None;
        }

        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&raw[..ID_LEN]);
        let mut addr = [0u8; PEER_LEN];
        addr.copy_from_slice(&raw[ID_LEN..CONTACT_LEN]);

        Some(Self {
            contact: CompactContact::new(NodeId(id), PeerAddress(addr)),
            quality: raw[QUALITY_OFFSET] & MAX_QUALITY,
        })
    }

    pub fn to_bytes(&self) -> [u8; CELL_SIZE] {
        let mut raw = [0u8; CELL_SIZE];
        raw[..CONTACT_LEN].copy_from_slice(&self.contact.to_compact());
        raw[QUALITY_OFFSET] = self.quality & MAX_QUALITY;
        raw
    }

    pub fn is_empty(&self) -> bool {
        self.contact.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The contact now occupies its cell.
    Accepted,
    /// The occupant survived the eviction check.
    Rejected,
    /// The address is not one we talk to.
    Invalid,
}

/// Decides whether a contact of quality `current` gives way to a candidate of
/// quality `candidate`: always if the candidate is at least as good, otherwise
/// with probability `1 / 2^(current - candidate)`.
pub fn check_evict(current: u8, candidate: u8) -> bool {
    if candidate >= current {
        return true;
    }

    let diff = u32::from(current - candidate).min(31);
    rand::rng().random_range(0..1u32 << diff) == 0
}

/// Builds the fallback direction for each possible trailing prefix byte: the
/// adjacent cell whose byte is closer in XOR metric.
fn build_directions() -> [i8; 256] {
    let mut offsets = [0i8; 256];
    offsets[0] = 1;
    offsets[255] = -1;

    for i in 1..255usize {
        offsets[i] = if (i - 1) ^ i < (i + 1) ^ i { -1 } else { 1 };
    }

    offsets
}

/// A direct-mapped, fixed-capacity contact store.
///
/// Each node id maps to exactly one cell through its first `depth` bytes, so
/// the table holds at most one contact per prefix and contention between ids
/// sharing a prefix is settled by [`check_evict`]. Cells live in a file mapped
/// read-write into memory; writes go straight to the page cache and survive
/// restarts.
pub struct RoutingTable {
    path: PathBuf,
    depth: usize,
    map: MmapMut,
    directions: [i8; 256],
}

impl RoutingTable {
    /// Opens the table at `path`, creating it at the exact size if missing.
    ///
    /// An existing file of the wrong size is never truncated: the caller must
    /// migrate it explicitly.
    pub fn open(path: impl AsRef<Path>, depth: usize) -> Result<Self, DhtError> {
        if !(2..=3).contains(&depth) {
            return Err(DhtError::InvalidDepth(depth));
        }

        let path = path.as_ref().to_path_buf();
        let storage = |source: std::io::Error| DhtError::Storage {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }

        let expected = (Self::capacity_for(depth) * CELL_SIZE) as u64;
        let existed = path.exists();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(storage)?;

        if !existed {
            info!("creating routing table {} ({} bytes)", path.display(), expected);
            file.set_len(expected).map_err(storage)?;
        }

        let found = file.metadata().map_err(storage)?.len();
        if found != expected {
            return Err(DhtError::SizeMismatch {
                path,
                found,
                expected,
            });
        }

        // SAFETY: the file is ours for the lifetime of the process; concurrent
        // external writers would only corrupt cells, which are validated on read.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(storage)?;

        let table = Self {
            path,
            depth,
            map,
            directions: build_directions(),
        };
        debug!(
            "routing table {} open with {} contacts",
            table.path.display(),
            table.len()
        );

        Ok(table)
    }

    fn capacity_for(depth: usize) -> usize {
        1 << (8 * depth)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> usize {
        Self::capacity_for(self.depth)
    }

    fn cell(&self, index: usize) -> RoutingCell {
        let start = index * CELL_SIZE;
        RoutingCell::from_bytes(&self.map[start..start + CELL_SIZE]).unwrap_or_default()
    }

    fn write_cell(&mut self, index: usize, cell: &RoutingCell) {
        let start = index * CELL_SIZE;
        self.map[start..start + CELL_SIZE].copy_from_slice(&cell.to_bytes());
    }

    fn index_of(&self, id: &NodeId) -> usize {
        id.prefix(self.depth)
    }

    /// The cell `id` maps to, if `id` is its occupant.
    pub fn get(&self, id: &NodeId) -> Option<RoutingCell> {
        let cell = self.cell(self.index_of(id));
        (!cell.is_empty() && cell.contact.id == *id).then_some(cell)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Offers `id` at `addr` for its cell with quality `base_quality`.
    ///
    /// A contact already in its cell at the same address keeps the better of
    /// the two qualities. The same id from another address has to win the
    /// eviction check like any other candidate.
    pub fn insert(&mut self, id: &NodeId, addr: &PeerAddress, base_quality: u8) -> InsertOutcome {
        if id.is_empty() || !addr.is_routable() {
            return InsertOutcome::Invalid;
        }

        let index = self.index_of(id);
        let current = self.cell(index);
        let base_quality = base_quality.min(MAX_QUALITY);

        let quality = if current.contact == CompactContact::new(*id, *addr) {
            current.quality.max(base_quality)
        } else if current.is_empty() || check_evict(current.quality, base_quality) {
            base_quality
        } else {
            return InsertOutcome::Rejected;
        };

        self.write_cell(index, &RoutingCell::new(CompactContact::new(*id, *addr), quality));
        InsertOutcome::Accepted
    }

    /// The occupant of the cell `target` maps to or, failing that, of the one
    /// adjacent cell closest to it.
    pub fn lookup_neighbor(&self, target: &NodeId) -> Option<CompactContact> {
        let index = self.index_of(target);

        let cell = self.cell(index);
        if !cell.is_empty() {
            return Some(cell.contact);
        }

        let trailing = target.0[self.depth - 1];
        let alt = index.checked_add_signed(self.directions[trailing as usize] as isize)?;

        let cell = self.cell(alt);
        (!cell.is_empty()).then_some(cell.contact)
    }

    /// Shifts the quality of `id` by `delta`, clamped to the valid range.
    /// Does nothing if `id` has been replaced in the meantime.
    pub fn adjust_quality(&mut self, id: &NodeId, delta: i8) -> bool {
        let index = self.index_of(id);
        let Some(mut cell) = self.get(id) else {
            return false;
        };

        let quality = (i16::from(cell.quality) + i16::from(delta)).clamp(0, MAX_QUALITY as i16);
        cell.quality = quality as u8;
        self.write_cell(index, &cell);
        true
    }

    /// Zeroes the cell of `id` if `id` still occupies it.
    pub fn delete(&mut self, id: &NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }

        let index = self.index_of(id);
        self.write_cell(index, &RoutingCell::default());
        true
    }

    /// The first occupied cell at or after a random index, wrapping once.
    pub fn random_valid_contact(&self) -> Option<CompactContact> {
        let capacity = self.capacity();
        let start = rand::rng().random_range(0..capacity);

        (0..capacity)
            .map(|offset| self.cell((start + offset) % capacity))
            .find(|cell| !cell.is_empty())
            .map(|cell| cell.contact)
    }

    pub fn iter(&self) -> impl Iterator<Item = RoutingCell> + '_ {
        (0..self.capacity())
            .map(|index| self.cell(index))
            .filter(|cell| !cell.is_empty())
    }

    /// Number of occupied cells. Walks the whole table.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn flush(&self) -> Result<(), DhtError> {
        self.map.flush().map_err(|source| DhtError::Storage {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for RoutingTable {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("failed to flush routing table: {}", e);
        }
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("path", &self.path)
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_table() {
        let offsets = build_directions();
        assert_eq!(offsets[0], 1);
        assert_eq!(offsets[255], -1);
        // 0x01 ^ 0x00 = 1 < 0x01 ^ 0x02 = 3
        assert_eq!(offsets[1], -1);
        // 0x02 ^ 0x01 = 3 > 0x02 ^ 0x03 = 1
        assert_eq!(offsets[2], 1);
        assert_eq!(offsets[0x80], 1);
        assert_eq!(offsets[0x7f], -1);
    }

    #[test]
    fn test_cell_layout() {
        let contact = CompactContact::new(
            NodeId([0xaa; 20]),
            PeerAddress::new(std::net::Ipv4Addr::new(1, 2, 3, 4), 0x1ae1),
        );
        let raw = RoutingCell::new(contact, 5).to_bytes();

        assert_eq!(&raw[..20], &[0xaa; 20]);
        assert_eq!(&raw[20..24], &[1, 2, 3, 4]);
        assert_eq!(&raw[24..26], &[0x1a, 0xe1]);
        assert_eq!(raw[26], 5);
        assert_eq!(&raw[27..], &[0; 5]);
    }

    #[test]
    fn test_cell_ignores_high_quality_bits() {
        let mut raw = [0u8; CELL_SIZE];
        raw[0] = 1;
        raw[26] = 0xfe;

        let cell = RoutingCell::from_bytes(&raw).unwrap();
        assert_eq!(cell.quality, 6);
        assert!(RoutingCell::from_bytes(&raw[..31]).is_none());
    }
}
