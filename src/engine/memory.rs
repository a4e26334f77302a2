//! The engine's linear heap.
//!
//! Bound text and blob parameters are staged here before the bind call and stay allocated
//! until the owning statement is reset or finalized. Addresses are offsets into a single
//! growable buffer; offset 0 is never handed out so it can stand for "null".

use std::collections::{BTreeMap, HashMap};

use crate::error::SqlWorkerError;

const ALIGN: usize = 8;

/// Opaque offset of a live allocation in the memory bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u32);

impl Address {
    #[must_use]
    pub fn offset(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct Block {
    /// Reserved size, aligned.
    size: usize,
    /// Bytes the caller asked for.
    len: usize,
}

/// First-fit allocator over a bounded byte buffer.
#[derive(Debug)]
pub struct MemoryBridge {
    heap: Vec<u8>,
    limit: usize,
    top: usize,
    free: BTreeMap<usize, usize>,
    live: HashMap<usize, Block>,
}

impl MemoryBridge {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            heap: Vec::new(),
            limit: limit.min(u32::MAX as usize),
            top: ALIGN,
            free: BTreeMap::new(),
            live: HashMap::new(),
        }
    }

    /// Reserve `len` bytes (zero-length requests still get a distinct address).
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::OutOfMemory` when neither a free block nor the remaining
    /// headroom below the limit can hold the request.
    pub fn allocate(&mut self, len: usize) -> Result<Address, SqlWorkerError> {
        let size = round_up(len.max(1));
        let offset = match self.take_free(size) {
            Some(offset) => offset,
            None => {
                let end = self
                    .top
                    .checked_add(size)
                    .filter(|end| *end <= self.limit)
                    .ok_or(SqlWorkerError::OutOfMemory {
                        requested: len,
                        limit: self.limit,
                    })?;
                let offset = self.top;
                self.top = end;
                if self.heap.len() < end {
                    self.heap.resize(end, 0);
                }
                offset
            }
        };
        self.live.insert(offset, Block { size, len });
        let address = u32::try_from(offset).map_err(|_| SqlWorkerError::OutOfMemory {
            requested: len,
            limit: self.limit,
        })?;
        Ok(Address(address))
    }

    /// Release an allocation. Returns `false` if the address was not live.
    pub fn free(&mut self, address: Address) -> bool {
        let offset = address.offset();
        let Some(block) = self.live.remove(&offset) else {
            return false;
        };
        self.heap[offset..offset + block.size].fill(0);

        let mut start = offset;
        let mut size = block.size;
        if let Some(next) = self.free.remove(&(start + size)) {
            size += next;
        }
        if let Some((&prev_start, &prev_size)) = self.free.range(..start).next_back() {
            if prev_start + prev_size == start {
                self.free.remove(&prev_start);
                start = prev_start;
                size += prev_size;
            }
        }
        if start + size == self.top {
            self.top = start;
        } else {
            self.free.insert(start, size);
        }
        true
    }

    /// Copy `bytes` to the start of a live allocation.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` if the address is not live or the bytes do not
    /// fit the allocation.
    pub fn write(&mut self, address: Address, bytes: &[u8]) -> Result<(), SqlWorkerError> {
        let block = self.block(address)?;
        if bytes.len() > block.len {
            return Err(SqlWorkerError::HandleClosed(format!(
                "write of {} bytes overflows allocation of {} bytes at {}",
                bytes.len(),
                block.len,
                address.offset()
            )));
        }
        let offset = address.offset();
        self.heap[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `len` bytes out of a live allocation.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` if the address is not live or the range leaves
    /// the allocation.
    pub fn read(&self, address: Address, len: usize) -> Result<Vec<u8>, SqlWorkerError> {
        self.with_bytes(address, len, <[u8]>::to_vec)
    }

    /// Borrow `len` bytes of a live allocation without copying them.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryBridge::read`].
    pub fn with_bytes<R>(
        &self,
        address: Address,
        len: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, SqlWorkerError> {
        let block = self.block(address)?;
        if len > block.len {
            return Err(SqlWorkerError::HandleClosed(format!(
                "read of {len} bytes overflows allocation of {} bytes at {}",
                block.len,
                address.offset()
            )));
        }
        let offset = address.offset();
        Ok(f(&self.heap[offset..offset + len]))
    }

    /// Allocate and fill a buffer; returns the address and the byte count.
    ///
    /// # Errors
    ///
    /// Propagates `OutOfMemory` from [`MemoryBridge::allocate`].
    pub fn allocate_bytes(&mut self, bytes: &[u8]) -> Result<(Address, usize), SqlWorkerError> {
        let address = self.allocate(bytes.len())?;
        self.write(address, bytes)?;
        Ok((address, bytes.len()))
    }

    /// Stage a string as UTF-8. With `terminated`, a trailing zero byte is written but not
    /// counted in the returned length.
    ///
    /// # Errors
    ///
    /// Propagates `OutOfMemory` from [`MemoryBridge::allocate`].
    pub fn allocate_str(
        &mut self,
        text: &str,
        terminated: bool,
    ) -> Result<(Address, usize), SqlWorkerError> {
        let len = text.len();
        let address = self.allocate(len + usize::from(terminated))?;
        self.write(address, text.as_bytes())?;
        Ok((address, len))
    }

    /// Number of live allocations.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Bytes currently reserved by live allocations.
    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        self.live.values().map(|b| b.size).sum()
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn block(&self, address: Address) -> Result<Block, SqlWorkerError> {
        self.live.get(&address.offset()).copied().ok_or_else(|| {
            SqlWorkerError::HandleClosed(format!(
                "address {} is not a live allocation",
                address.offset()
            ))
        })
    }

    fn take_free(&mut self, size: usize) -> Option<usize> {
        let (&offset, &available) = self.free.iter().find(|(_, avail)| **avail >= size)?;
        self.free.remove(&offset);
        if available > size {
            self.free.insert(offset + size, available - size);
        }
        Some(offset)
    }
}

fn round_up(len: usize) -> usize {
    len.div_ceil(ALIGN) * ALIGN
}

/// UTF-16 to UTF-8; every unpaired surrogate becomes exactly one U+FFFD.
#[must_use]
pub fn transcode_utf16(units: &[u16]) -> String {
    char::decode_utf16(units.iter().copied())
        .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Bytes handed back by the engine as text; invalid sequences are replaced with U+FFFD.
#[must_use]
pub fn decode_text_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
