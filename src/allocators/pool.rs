//! Size-class pool - segregated free lists on top of a bump arena

use std::mem::{offset_of, size_of};

use super::{
    bump::BumpArena,
    stats::{FreeListInfo, PoolStats},
    traits::OffsetAllocator,
};
use crate::{
    error::{Result, ShmMapError},
    layout::{
        carved_block_len, class_payload_size, free_list_position, pool_header_len, size_class_for,
        BlockHeader, FreeList, PoolHeader, SECTION_PADDING,
    },
    logging::LogSink,
    memory::InitMode,
    offset::{Offset, OffsetSpace},
};

const BLOCK_HEADER_LEN: usize = size_of::<BlockHeader>();

/// Allocator for the pool region of the backing file
///
/// Class `i` serves payloads of `(i + 1) * 8` bytes. A class with parked
/// blocks hands out its oldest one (head); released blocks are appended at the
/// tail, so reuse within a class is first-in first-out. Classes with nothing
/// parked carve a fresh block from the [`BumpArena`].
///
/// All state lives in the region; this handle only caches the class count.
#[derive(Debug)]
pub struct SizeClassPool {
    /// Pool region; offsets handed out are relative to its start
    space: OffsetSpace,
    /// Number of free lists
    class_count: usize,
    /// Cursor over never-used memory
    bump: BumpArena,
    /// Diagnostics
    log: LogSink,
}

impl SizeClassPool {
    /// Region bytes needed for `class_count` free lists plus `arena_len`
    /// bytes of arena
    pub fn required_len(class_count: usize, arena_len: usize) -> usize {
        pool_header_len(class_count) + arena_len
    }

    /// Lay out (bootstrap) or re-read (attach) the pool header
    ///
    /// On attach the persisted class count wins over `size_class_count`.
    pub fn init(
        space: OffsetSpace,
        size_class_count: usize,
        mode: InitMode,
        log: LogSink,
    ) -> Result<Self> {
        if size_class_count == 0 || size_class_count > i32::MAX as usize {
            let err = ShmMapError::invalid_parameter(
                "size_class_count",
                format!("Size class count must be in 1..={}", i32::MAX),
            );
            log.error(format_args!("[pool init] {}", err));
            return Err(err);
        }

        let class_count = match mode {
            InitMode::Bootstrap => size_class_count,
            InitMode::Attach => {
                let header = space.read::<PoolHeader>(Offset::new(0))?;
                let persisted = usize::try_from(header.size_class_count).unwrap_or(0);
                if persisted == 0 {
                    let err = ShmMapError::corrupt_layout(format!(
                        "persisted size class count is {}",
                        header.size_class_count
                    ));
                    log.error(format_args!("[pool init] {}", err));
                    return Err(err);
                }
                if persisted != size_class_count {
                    log.warn(format_args!(
                        "[pool init] Requested {} size classes, region was laid out with {}; using {}",
                        size_class_count, persisted, persisted
                    ));
                }
                persisted
            }
        };

        let header_len = pool_header_len(class_count);
        if space.len() < header_len {
            let err = ShmMapError::invalid_parameter(
                "pool_size",
                format!(
                    "Pool of {} bytes cannot hold its {} byte header and free-list table",
                    space.len(),
                    header_len
                ),
            );
            log.error(format_args!("[pool init] {}", err));
            return Err(err);
        }

        let cursor_at = Offset::from_usize(offset_of!(PoolHeader, bump_offset))?;
        let bump = BumpArena::new(space, cursor_at, header_len);
        let pool = Self {
            space,
            class_count,
            bump,
            log,
        };

        match mode {
            InitMode::Bootstrap => pool.lay_out()?,
            InitMode::Attach => pool.bump.validate().map_err(|e| pool.report("pool init", e))?,
        }

        pool.log.info(format_args!(
            "[pool init] {} memory pool at {:p}, size {} bytes, {} size classes, arena starts at {}",
            mode,
            pool.space.base(),
            pool.space.len(),
            pool.class_count,
            header_len
        ));

        Ok(pool)
    }

    /// Write a fresh header and empty free lists
    fn lay_out(&self) -> Result<()> {
        let header_len = pool_header_len(self.class_count);
        self.space.write(
            Offset::new(0),
            PoolHeader::new(self.class_count as i32, header_len as i32),
        )?;
        for class in 0..self.class_count {
            self.write_list(class, FreeList::empty(class as i32))?;
        }
        let padding = Offset::from_usize(header_len - SECTION_PADDING)?;
        self.space.write(padding, 0i32)
    }

    /// Number of free lists
    pub fn size_class_count(&self) -> usize {
        self.class_count
    }

    /// First arena byte
    pub fn arena_start(&self) -> usize {
        self.bump.start()
    }

    /// Current bump pointer
    pub fn bump_position(&self) -> Result<usize> {
        self.bump.position()
    }

    /// Size class serving a request of `len` bytes, if any
    pub fn size_class_of(&self, len: usize) -> Option<usize> {
        let class = size_class_for(len);
        (class < self.class_count).then_some(class)
    }

    /// Allocate a payload able to hold `len` bytes
    pub fn allocate(&mut self, len: usize) -> Result<Offset> {
        let class = match self.size_class_of(len) {
            Some(class) => class,
            None => {
                let err = ShmMapError::request_too_large(len, self.max_payload());
                return Err(self.report("allocate", err));
            }
        };

        let mut list = self.read_list(class)?;
        let block = if list.count > 0 {
            let block_at = list.head;
            let mut block = self.read_block(block_at)?;
            if !block.next.is_nil() {
                let mut next = self.read_block(block.next)?;
                next.prev = Offset::NIL;
                self.write_block(block.next, next)?;
            }
            list.head = block.next;
            list.count -= 1;
            if list.count == 0 {
                list.tail = Offset::NIL;
            }
            self.write_list(class, list)?;

            block.prev = Offset::NIL;
            block.next = Offset::NIL;
            self.write_block(block_at, block)?;
            block_at
        } else {
            let block_at = self
                .bump
                .carve(carved_block_len(class))
                .map_err(|e| self.report("allocate", e))?;
            self.write_block(
                block_at,
                BlockHeader {
                    size_class: class as i32,
                    prev: Offset::NIL,
                    next: Offset::NIL,
                    payload_len: 0,
                },
            )?;
            let trailer = block_at.forward(BLOCK_HEADER_LEN + class_payload_size(class))?;
            self.space.write(trailer, 0i32)?;
            block_at
        };

        block.forward(BLOCK_HEADER_LEN)
    }

    /// Park a payload at the tail of its size class
    ///
    /// Offsets that cannot belong to a carved block are reported and
    /// rejected without touching any list.
    pub fn deallocate(&mut self, payload: Offset) -> Result<()> {
        let (block_at, mut block) = self
            .resolve_block(payload)
            .map_err(|e| self.report("deallocate", e))?;
        let class = block.size_class as usize;
        let mut list = self.read_list(class)?;

        if list.count > 0 && list.tail == block_at {
            let err = ShmMapError::invalid_parameter(
                "payload",
                format!("block at {} is already free", block_at),
            );
            return Err(self.report("deallocate", err));
        }

        if list.count == 0 {
            block.prev = Offset::NIL;
            list.head = block_at;
        } else {
            let tail_at = list.tail;
            let mut tail = self.read_block(tail_at)?;
            tail.next = block_at;
            self.write_block(tail_at, tail)?;
            block.prev = tail_at;
        }
        block.next = Offset::NIL;
        list.tail = block_at;
        list.count += 1;

        self.write_block(block_at, block)?;
        self.write_list(class, list)
    }

    /// Copy `bytes` into a payload and record their length
    pub fn write_payload(&mut self, payload: Offset, bytes: &[u8]) -> Result<()> {
        let (block_at, mut block) = self
            .resolve_block(payload)
            .map_err(|e| self.report("write_payload", e))?;
        let capacity = class_payload_size(block.size_class as usize);
        if bytes.len() > capacity {
            let err = ShmMapError::invalid_parameter(
                "bytes",
                format!("{} bytes do not fit a {} byte payload", bytes.len(), capacity),
            );
            return Err(self.report("write_payload", err));
        }
        self.space.copy_in(payload, bytes)?;
        block.payload_len = bytes.len() as i32;
        self.write_block(block_at, block)
    }

    /// Bytes last stored with [`write_payload`](Self::write_payload)
    pub fn read_payload(&self, payload: Offset) -> Result<&[u8]> {
        let (_, block) = self
            .resolve_block(payload)
            .map_err(|e| self.report("read_payload", e))?;
        let capacity = class_payload_size(block.size_class as usize);
        let len = usize::try_from(block.payload_len)
            .ok()
            .filter(|len| *len <= capacity)
            .ok_or_else(|| {
                self.report(
                    "read_payload",
                    ShmMapError::corrupt_layout(format!(
                        "payload length {} at {} exceeds capacity {}",
                        block.payload_len, payload, capacity
                    )),
                )
            })?;
        self.space.bytes(payload, len)
    }

    /// Payload capacity of the block behind `payload`
    pub fn payload_capacity(&self, payload: Offset) -> Result<usize> {
        let (_, block) = self.resolve_block(payload)?;
        Ok(class_payload_size(block.size_class as usize))
    }

    /// Usage snapshot; walks every free-list header
    pub fn stats(&self) -> Result<PoolStats> {
        let pool_size = self.space.len();
        let bump = self.bump.position()?;
        let mut free_size = 0usize;
        for class in 0..self.class_count {
            let list = self.read_list(class)?;
            free_size += class_payload_size(class) * list.count.max(0) as usize;
        }
        Ok(PoolStats {
            pool_size,
            free_area_size: pool_size.saturating_sub(bump),
            allocated_area_size: bump,
            used_size: bump.saturating_sub(free_size),
            free_size,
        })
    }

    /// Every size class with parked blocks, smallest first
    pub fn free_list_info(&self) -> Result<Vec<FreeListInfo>> {
        let mut info = Vec::new();
        for class in 0..self.class_count {
            let list = self.read_list(class)?;
            if list.count > 0 {
                info.push(FreeListInfo {
                    payload_size: class_payload_size(class),
                    count: list.count as usize,
                });
            }
        }
        Ok(info)
    }

    /// Block header owning `payload`, after range and class checks
    fn resolve_block(&self, payload: Offset) -> Result<(Offset, BlockHeader)> {
        let bump = self.bump.position()?;
        let in_arena = payload.as_usize().is_some_and(|at| {
            at >= self.arena_start() + BLOCK_HEADER_LEN && at < bump
        });
        if !in_arena {
            return Err(ShmMapError::offset_out_of_range(payload.raw() as i64, bump));
        }
        let block_at = payload.backward(BLOCK_HEADER_LEN)?;
        let block = self.read_block(block_at)?;
        if block.size_class < 0 || block.size_class as usize >= self.class_count {
            return Err(ShmMapError::corrupt_block(
                block_at.raw() as i64,
                block.size_class,
                self.class_count,
            ));
        }
        Ok((block_at, block))
    }

    fn read_list(&self, class: usize) -> Result<FreeList> {
        self.space.read(Offset::from_usize(free_list_position(class))?)
    }

    fn write_list(&self, class: usize, list: FreeList) -> Result<()> {
        self.space
            .write(Offset::from_usize(free_list_position(class))?, list)
    }

    fn read_block(&self, block_at: Offset) -> Result<BlockHeader> {
        self.space.read(block_at)
    }

    fn write_block(&self, block_at: Offset, block: BlockHeader) -> Result<()> {
        self.space.write(block_at, block)
    }

    /// Log an error under the name of the failing operation and hand it back
    fn report(&self, op: &str, err: ShmMapError) -> ShmMapError {
        self.log.error(format_args!("[{}] {}", op, err));
        err
    }
}

impl OffsetAllocator for SizeClassPool {
    fn allocate(&mut self, len: usize) -> Result<Offset> {
        SizeClassPool::allocate(self, len)
    }

    fn deallocate(&mut self, payload: Offset) -> Result<()> {
        SizeClassPool::deallocate(self, payload)
    }

    fn space(&self) -> &OffsetSpace {
        &self.space
    }

    fn total_size(&self) -> usize {
        self.space.len()
    }

    fn used_size(&self) -> usize {
        self.stats()
            .map(|stats| stats.used_size)
            .unwrap_or_else(|_| self.space.len())
    }

    fn max_payload(&self) -> usize {
        class_payload_size(self.class_count - 1)
    }

    fn owns(&self, payload: Offset) -> bool {
        self.resolve_block(payload).is_ok()
    }
}
