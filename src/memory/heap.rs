//! Paged heap and identity registry
//!
//! Values live in their storage representation inside an arena of pages.
//! Each block is a header followed by its payload, and blocks are packed back
//! to back:
//!
//! ```text
//! offset  0        4     5         8          12          16
//!         | magic  | tag | reserved | len u32  | capacity  | payload (capacity bytes) | next header ...
//! ```
//!
//! `len` is the size of the value currently stored and may exceed `capacity`
//! after an unchecked move; the excess bytes overwrite whatever follows.
//!
//! The slot table maps an [`Identity`] (index + generation) to its block.
//! Releasing a slot bumps its generation, so every identity still naming it
//! resolves to a dangling fault instead of someone else's storage.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::codec;
use crate::error::{Error, Result};
use crate::fault::{FaultKind, FaultRecord};
use crate::runtime::{Value, ValueKind};

/// Size of a block header in bytes
pub const HEADER_SIZE: usize = 16;

const MAGIC: u32 = 0x5AFE_B10C;

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Configuration
// =============================================================================

/// Heap configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Arena growth granularity in bytes (default: 4096)
    pub page_size: usize,
    /// Maximum number of pages (default: 1024)
    pub max_pages: usize,
    /// Reuse released blocks first-fit before growing the arena
    pub reuse_freed: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            max_pages: 1024,
            reuse_freed: true,
        }
    }
}

impl HeapConfig {
    /// Parses a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: HeapConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `MANAGED_PTR_PAGE_SIZE`, `MANAGED_PTR_MAX_PAGES` and
    /// `MANAGED_PTR_REUSE_FREED`; unset variables take their defaults
    pub fn from_env() -> Result<Self> {
        fn var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
            match std::env::var(name) {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| Error::InvalidConfig(format!("{}={:?}", name, raw))),
                Err(_) => Ok(None),
            }
        }

        let mut config = HeapConfig::default();
        if let Some(page_size) = var("MANAGED_PTR_PAGE_SIZE")? {
            config.page_size = page_size;
        }
        if let Some(max_pages) = var("MANAGED_PTR_MAX_PAGES")? {
            config.max_pages = max_pages;
        }
        if let Some(reuse_freed) = var("MANAGED_PTR_REUSE_FREED")? {
            config.reuse_freed = reuse_freed;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks that pages are a power of two and can hold at least one header
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() || self.page_size < HEADER_SIZE {
            return Err(Error::InvalidConfig(format!(
                "page_size must be a power of two >= {}, got {}",
                HEADER_SIZE, self.page_size
            )));
        }
        if self.max_pages == 0 {
            return Err(Error::InvalidConfig("max_pages must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Largest arena size in bytes
    pub fn limit_bytes(&self) -> usize {
        self.page_size.saturating_mul(self.max_pages)
    }
}

// =============================================================================
// Heap
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Block {
    offset: usize,
    capacity: usize,
}

impl Block {
    fn payload(&self) -> usize {
        self.offset + HEADER_SIZE
    }
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    block: Option<Block>,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    tag: u8,
    len: usize,
}

#[derive(Debug)]
struct HeapInner {
    config: HeapConfig,
    arena: Vec<u8>,
    top: usize,
    entries: Vec<Entry>,
    free_entries: Vec<u32>,
    free_blocks: Vec<Block>,
    quarantined: usize,
}

/// Occupancy snapshot of a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Slots currently holding storage
    pub live_slots: usize,
    /// Mapped arena size in bytes
    pub arena_bytes: usize,
    /// Released blocks waiting for reuse
    pub free_blocks: usize,
    /// Blocks retired because reclamation found them corrupted
    pub quarantined: usize,
}

/// Shared handle to a heap. Clones refer to the same arena.
#[derive(Clone)]
pub struct Heap {
    id: u64,
    inner: Arc<Mutex<HeapInner>>,
}

lazy_static::lazy_static! {
    static ref GLOBAL_HEAP: Heap = {
        let config = HeapConfig::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring heap configuration from environment");
            HeapConfig::default()
        });
        Heap::with_valid_config(config)
    };
}

impl Heap {
    /// Creates an empty heap
    pub fn new(config: HeapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: HeapConfig) -> Self {
        Heap {
            id: NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(Mutex::new(HeapInner {
                config,
                arena: Vec::new(),
                top: 0,
                entries: Vec::new(),
                free_entries: Vec::new(),
                free_blocks: Vec::new(),
                quarantined: 0,
            })),
        }
    }

    /// The process-wide heap used by [`Slot::new`](super::Slot::new)
    pub fn global() -> &'static Heap {
        &GLOBAL_HEAP
    }

    /// Heap id, unique within the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> HeapStats {
        let inner = self.inner.lock();
        HeapStats {
            live_slots: inner.entries.iter().filter(|e| e.block.is_some()).count(),
            arena_bytes: inner.arena.len(),
            free_blocks: inner.free_blocks.len(),
            quarantined: inner.quarantined,
        }
    }

    /// Stores an encodable value and returns its identity
    pub(crate) fn allocate(&self, value: &Value) -> Result<Identity> {
        let bytes = codec::encode(value)?;
        let (index, generation) = self.inner.lock().alloc(value.kind(), &bytes)?;
        Ok(Identity {
            heap: Arc::downgrade(&self.inner),
            heap_id: self.id,
            index,
            generation,
        })
    }

    /// Reclaims the storage behind `identity`
    pub(crate) fn release(&self, identity: &Identity) -> std::result::Result<(), FaultRecord> {
        self.inner.lock().free(identity)
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl HeapInner {
    fn alloc(&mut self, kind: ValueKind, bytes: &[u8]) -> Result<(u32, u32)> {
        let block = match self.take_free_block(bytes.len()) {
            Some(block) => block,
            None => self.bump(bytes.len())?,
        };

        self.write_header(block, kind.tag(), bytes.len());
        self.arena[block.payload()..block.payload() + bytes.len()].copy_from_slice(bytes);

        let index = match self.free_entries.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.entries.len())
                    .map_err(|_| Error::OutOfMemory(self.config.limit_bytes()))?;
                self.entries.push(Entry {
                    generation: 0,
                    block: None,
                });
                index
            }
        };
        let entry = &mut self.entries[index as usize];
        entry.block = Some(block);
        Ok((index, entry.generation))
    }

    fn take_free_block(&mut self, len: usize) -> Option<Block> {
        if !self.config.reuse_freed {
            return None;
        }
        let position = self.free_blocks.iter().position(|b| b.capacity >= len)?;
        Some(self.free_blocks.swap_remove(position))
    }

    fn bump(&mut self, len: usize) -> Result<Block> {
        let limit = self.config.limit_bytes();
        let end = self
            .top
            .checked_add(HEADER_SIZE + len)
            .filter(|end| *end <= limit)
            .ok_or(Error::OutOfMemory(limit))?;

        if end > self.arena.len() {
            let page = self.config.page_size;
            let mapped = end.div_ceil(page) * page;
            tracing::debug!(from = self.arena.len(), to = mapped, "heap grown");
            self.arena.resize(mapped, 0);
        }

        let block = Block {
            offset: self.top,
            capacity: len,
        };
        self.top = end;
        Ok(block)
    }

    fn write_header(&mut self, block: Block, tag: u8, len: usize) {
        let header = &mut self.arena[block.offset..block.payload()];
        header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        header[4] = tag;
        header[5..8].fill(0);
        header[8..12].copy_from_slice(&(len as u32).to_le_bytes());
        header[12..16].copy_from_slice(&(block.capacity as u32).to_le_bytes());
    }

    fn read_header(&self, block: Block) -> std::result::Result<Header, FaultRecord> {
        let corrupted = |message: String| {
            FaultRecord::new(FaultKind::Corrupted, block.offset as u64, message)
        };
        let header = self
            .arena
            .get(block.offset..block.payload())
            .ok_or_else(|| corrupted("block header is outside the arena".to_string()))?;
        let word = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);

        let magic = word(0);
        if magic != MAGIC {
            return Err(corrupted(format!("block header magic is {:#010x}", magic)));
        }
        let capacity = word(12) as usize;
        if capacity != block.capacity {
            return Err(corrupted(format!(
                "block header records capacity {}, slot table {}",
                capacity, block.capacity
            )));
        }
        Ok(Header {
            tag: header[4],
            len: word(8) as usize,
        })
    }

    fn block(&self, identity: &Identity) -> std::result::Result<Block, FaultRecord> {
        let dangling = |message: &str| {
            FaultRecord::new(FaultKind::Dangling, identity.address(), message)
        };
        let entry = self
            .entries
            .get(identity.index as usize)
            .ok_or_else(|| dangling("identity names no slot"))?;
        if entry.generation != identity.generation {
            return Err(dangling("slot was released"));
        }
        entry.block.ok_or_else(|| dangling("slot holds no storage"))
    }

    fn describe(&self, identity: &Identity) -> std::result::Result<(ValueKind, usize), FaultRecord> {
        let block = self.block(identity)?;
        let header = self.read_header(block)?;
        let kind = ValueKind::from_tag(header.tag).ok_or_else(|| {
            FaultRecord::new(
                FaultKind::Corrupted,
                block.offset as u64,
                format!("unknown kind tag {:#04x}", header.tag),
            )
        })?;
        Ok((kind, header.len))
    }

    fn capture(&self, identity: &Identity) -> std::result::Result<(ValueKind, usize), FaultRecord> {
        let (kind, len) = self.describe(identity)?;
        let block = self.block(identity)?;
        if len > block.capacity {
            tracing::warn!(
                address = identity.address(),
                len,
                capacity = block.capacity,
                "capturing a block already overrun by an unchecked move"
            );
        }
        Ok((kind, len))
    }

    fn read(&self, identity: &Identity) -> std::result::Result<Value, FaultRecord> {
        let (kind, len) = self.describe(identity)?;
        let block = self.block(identity)?;
        let payload = self
            .arena
            .get(block.payload()..block.payload() + len)
            .ok_or_else(|| {
                FaultRecord::new(
                    FaultKind::OutOfBounds,
                    (block.payload() + len) as u64,
                    format!("{} byte payload runs past the mapped heap", len),
                )
            })?;
        codec::decode(kind, payload)
            .map_err(|message| FaultRecord::new(FaultKind::Corrupted, block.offset as u64, message))
    }

    fn write(
        &mut self,
        identity: &Identity,
        kind: ValueKind,
        bytes: &[u8],
    ) -> std::result::Result<(), FaultRecord> {
        let block = self.block(identity)?;
        self.read_header(block)?;
        let end = block.payload() + bytes.len();
        if end > self.arena.len() {
            return Err(FaultRecord::new(
                FaultKind::OutOfBounds,
                end as u64,
                format!(
                    "{} byte write at {:#x} runs past the mapped heap ({} bytes)",
                    bytes.len(),
                    block.payload(),
                    self.arena.len()
                ),
            ));
        }
        self.arena[block.payload()..end].copy_from_slice(bytes);
        self.write_header(block, kind.tag(), bytes.len());
        Ok(())
    }

    fn free(&mut self, identity: &Identity) -> std::result::Result<(), FaultRecord> {
        let block = self.block(identity)?;
        let entry = &mut self.entries[identity.index as usize];
        entry.block = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_entries.push(identity.index);

        let verdict = self.read_header(block).and_then(|header| {
            if header.len > block.capacity {
                Err(FaultRecord::new(
                    FaultKind::HeapOverrun,
                    block.offset as u64,
                    format!(
                        "{} byte payload overran its {} byte block",
                        header.len, block.capacity
                    ),
                ))
            } else {
                Ok(())
            }
        });

        if verdict.is_ok() {
            self.free_blocks.push(block);
        } else {
            self.quarantined += 1;
        }
        verdict
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Opaque, non-owning handle to a slot's storage.
///
/// Holding an identity keeps neither the slot nor its heap alive. Every use
/// re-resolves it and reports a dangling fault once the target is gone.
#[derive(Clone)]
pub struct Identity {
    heap: Weak<Mutex<HeapInner>>,
    heap_id: u64,
    index: u32,
    generation: u32,
}

impl Identity {
    /// Packed handle, `index << 32 | generation`
    pub fn address(&self) -> u64 {
        (u64::from(self.index) << 32) | u64::from(self.generation)
    }

    /// Id of the heap this identity points into
    pub fn heap_id(&self) -> u64 {
        self.heap_id
    }

    fn resolve(&self) -> std::result::Result<Arc<Mutex<HeapInner>>, FaultRecord> {
        self.heap.upgrade().ok_or_else(|| {
            FaultRecord::new(FaultKind::Dangling, self.address(), "heap was dropped")
        })
    }

    /// Checks that the storage exists and its header is intact
    pub(crate) fn validate(&self) -> std::result::Result<(), FaultRecord> {
        self.describe().map(|_| ())
    }

    /// Kind tag and current storage size
    pub(crate) fn describe(&self) -> std::result::Result<(ValueKind, usize), FaultRecord> {
        self.resolve()?.lock().describe(self)
    }

    /// Like [`describe`](Self::describe), logging a warning when the stored
    /// size already exceeds the block's capacity
    pub(crate) fn capture(&self) -> std::result::Result<(ValueKind, usize), FaultRecord> {
        self.resolve()?.lock().capture(self)
    }

    /// Decodes the current value
    pub(crate) fn read(&self) -> std::result::Result<Value, FaultRecord> {
        self.resolve()?.lock().read(self)
    }

    /// Overwrites the storage in place. No capacity check: the caller decides
    /// whether an oversized write is allowed.
    pub(crate) fn write(&self, kind: ValueKind, bytes: &[u8]) -> std::result::Result<(), FaultRecord> {
        self.resolve()?.lock().write(self, kind, bytes)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.heap_id == other.heap_id
            && self.index == other.index
            && self.generation == other.generation
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.heap_id.hash(state);
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity(heap {}, {:#x})", self.heap_id, self.address())
    }
}
