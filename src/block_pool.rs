use std::collections::TryReserveError;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::slice;

use crate::block::{Block, Items};
use crate::error::{PoolError, Result};
use crate::Pool;

const GROWTH_FACTOR: usize = 2;

/// Pool that stores its items in 64-byte aligned blocks.
///
/// A new block is twice as big as the newest block still alive, or `initial_capacity` if every
/// block has been released. Freed indices are reused (most recently freed first) before a new
/// block is allocated. When the last item of a block is removed the block is released on the spot
/// and all of its indices are retired: they stay invalid forever and later blocks are numbered
/// past them.
pub struct BlockPool<T> {
    blocks: Vec<Block<T>>, // live blocks only, sorted by first index
    free_slots: Vec<usize>,
    num_items: usize,
    capacity: usize, // sum of capacities of the blocks that are still alive
    initial_capacity: usize,
    next_index: usize, // smallest index never handed out or burned
    end_index: usize, // one past the last index covered by any block
}

impl <T> BlockPool<T> {
    /// Creates a pool and allocates its first block of `initial_capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `initial_capacity` is zero.
    pub fn with_capacity(initial_capacity: usize) -> Result<Self> {
        assert!(initial_capacity > 0, "BlockPool needs a non-zero initial capacity");

        let mut pool: Self = Self {
            blocks: Vec::new(),
            free_slots: Vec::new(),
            num_items: 0,
            capacity: 0,
            initial_capacity,
            next_index: 0,
            end_index: 0,
        };
        pool.add_block(initial_capacity)?;
        return Ok(pool)
    }

    pub fn len(&self) -> usize {
        return self.num_items
    }

    pub fn is_empty(&self) -> bool {
        return self.num_items == 0
    }

    /// Total number of slots across the blocks that are currently allocated.
    pub fn capacity(&self) -> usize {
        return self.capacity
    }

    pub fn num_blocks(&self) -> usize {
        return self.blocks.len()
    }

    /// Size in bytes of one element slot, always a multiple of [`CACHE_LINE`](crate::CACHE_LINE).
    pub fn element_size() -> usize {
        return Block::<T>::element_size()
    }

    pub fn get(&self, index: usize) -> Result<&T> {
        return self.locate(index)
            .and_then(|(block, offset)| self.blocks[block].get(offset))
            .ok_or(PoolError::OutOfRange { index })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut T> {
        match self.locate(index) {
            Some((block, offset)) => {
                return self.blocks[block].get_mut(offset).ok_or(PoolError::OutOfRange { index })
            },
            None => return Err( PoolError::OutOfRange { index } ),
        }
    }

    pub fn is_alive(&self, index: usize) -> bool {
        return self.get(index).is_ok()
    }

    /// Stores `item` and returns its index.
    ///
    /// Reuses a freed slot if there is one, otherwise takes the next unused slot of the newest
    /// block, allocating a new block first if the newest one is used up. On error the pool is left
    /// exactly as it was.
    pub fn insert(&mut self, item: T) -> Result<usize> {
        if let Some(index) = self.free_slots.pop() {
            let (block, offset): (usize, usize) = match self.locate(index) {
                Some(location) => location,
                None => unreachable!("free slot {} is outside every live block", index),
            };
            self.blocks[block].store(offset, item);
            self.num_items += 1;
            return Ok(index)
        }

        if self.next_index == self.end_index {
            self.grow()?;
        }

        let index: usize = self.next_index;
        let newest: &mut Block<T> = match self.blocks.last_mut() {
            Some(newest) => newest,
            None => unreachable!("unissued slot {} without a live block", index),
        };
        debug_assert!(newest.contains(index));
        let offset: usize = index - newest.first_index();
        newest.store(offset, item);
        self.next_index += 1;
        self.num_items += 1;
        return Ok(index)
    }

    /// Removes the item at `index` and hands it back.
    ///
    /// If this empties the item's block, the block is released and every index it covers is
    /// retired.
    pub fn remove(&mut self, index: usize) -> Result<T> {
        let (block, offset): (usize, usize) = match self.locate(index) {
            Some(location) => location,
            None => return Err( PoolError::OutOfRange { index } ),
        };
        let owner: &mut Block<T> = &mut self.blocks[block];
        let item: T = match owner.take(offset) {
            Some(item) => item,
            None => return Err( PoolError::OutOfRange { index } ),
        };
        let block_is_now_empty: bool = owner.is_empty();
        self.num_items -= 1;

        if block_is_now_empty {
            self.retire(block);
        }
        else {
            self.free_slots.push(index); // room for every live slot is reserved in add_block
        }
        return Ok(item)
    }

    pub fn iter(&self) -> Iter<'_, T> {
        return Iter::new(self.blocks.iter())
    }

    // Position of the live block covering `index` and the offset inside it.
    fn locate(&self, index: usize) -> Option<(usize, usize)> {
        let block: usize = self.blocks.partition_point(|block| block.end_index() <= index);
        let owner: &Block<T> = self.blocks.get(block)?;
        if !owner.contains(index) {
            return None
        }
        return Some((block, index - owner.first_index()))
    }

    fn grow(&mut self) -> Result<()> {
        let new_block_size: usize = match self.blocks.last() {
            Some(newest) => match newest.capacity().checked_mul(GROWTH_FACTOR) {
                Some(size) => size,
                None => return Err( PoolError::AllocationFailure { slots: usize::MAX, source: None } ),
            },
            None => self.initial_capacity,
        };
        return self.add_block(new_block_size)
    }

    // Everything that can fail is done before the first field is touched. The free list gets room
    // for every slot of every live block, so remove never reallocates it.
    fn add_block(&mut self, capacity: usize) -> Result<()> {
        let allocation_failure = |source: Option<TryReserveError>| {
            PoolError::AllocationFailure { slots: capacity, source }
        };

        let end_index: usize = match self.end_index.checked_add(capacity) {
            Some(end_index) => end_index,
            None => return Err( allocation_failure(None) ),
        };
        let total_capacity: usize = match self.capacity.checked_add(capacity) {
            Some(total_capacity) => total_capacity,
            None => return Err( allocation_failure(None) ),
        };
        debug_assert!(self.next_index == self.end_index);
        let missing_free_room: usize = total_capacity.saturating_sub(self.free_slots.len());
        self.free_slots
            .try_reserve(missing_free_room)
            .map_err(|source| allocation_failure(Some(source)))?;
        self.blocks.try_reserve(1).map_err(|source| allocation_failure(Some(source)))?;
        let block: Block<T> = Block::allocate(capacity, self.end_index)?;

        self.blocks.push(block);
        self.capacity = total_capacity;
        self.end_index = end_index;
        return Ok(())
    }

    fn retire(&mut self, block: usize) {
        let retired: Block<T> = self.blocks.remove(block);
        assert!(retired.is_empty());

        self.free_slots.retain(|index| !retired.contains(*index));
        self.capacity -= retired.capacity();
        // never-issued slots of a retired newest block are burned as well
        self.next_index = self.next_index.max(retired.end_index());

        log::debug!(
            "released block of {} slots (indices {}..{})",
            retired.capacity(),
            retired.first_index(),
            retired.end_index(),
        );
        // `retired` drops here and its memory goes back to the allocator
    }
}

impl <T> Pool<T> for BlockPool<T> {
    type Iter<'a> = Iter<'a, T> where Self: 'a, T: 'a;

    fn with_capacity(capacity: usize) -> Result<Self> {
        return BlockPool::with_capacity(capacity)
    }

    fn len(&self) -> usize {
        return BlockPool::len(self)
    }

    fn capacity(&self) -> usize {
        return BlockPool::capacity(self)
    }

    fn get(&self, id: usize) -> Result<&T> {
        return BlockPool::get(self, id)
    }

    fn get_mut(&mut self, id: usize) -> Result<&mut T> {
        return BlockPool::get_mut(self, id)
    }

    fn insert(&mut self, item: T) -> Result<usize> {
        return BlockPool::insert(self, item)
    }

    fn remove(&mut self, id: usize) -> Result<T> {
        return BlockPool::remove(self, id)
    }

    fn is_alive(&self, id: usize) -> bool {
        return BlockPool::is_alive(self, id)
    }

    fn iter<'a>(&'a self) -> Iter<'a, T> {
        return BlockPool::iter(self)
    }
}

impl <T> Index<usize> for BlockPool<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Ok(item) => return item,
            Err(error) => panic!("{}", error),
        }
    }
}

impl <T> IndexMut<usize> for BlockPool<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        match self.get_mut(index) {
            Ok(item) => return item,
            Err(error) => panic!("{}", error),
        }
    }
}

impl <T> fmt::Debug for BlockPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.debug_struct("BlockPool")
            .field("len", &self.num_items)
            .field("capacity", &self.capacity)
            .field("num_blocks", &self.blocks.len())
            .field("num_free_slots", &self.free_slots.len())
            .field("element_size", &Self::element_size())
            .finish()
    }
}

/// Iterator over the live items of a [`BlockPool`], in index order.
pub struct Iter<'a, T> {
    blocks: slice::Iter<'a, Block<T>>,
    items: Items<'a, T>,
}

impl <'a, T> Iter<'a, T> {
    fn new(blocks: slice::Iter<'a, Block<T>>) -> Self {
        return Self {
            blocks,
            items: Items::empty(),
        }
    }
}

impl <'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.items.next() {
                Some(item) => return Some(item),

                None => {
                    match self.blocks.next() {
                        Some(block) => self.items = block.items(),
                        None => return None,
                    }
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(dead_code)]
#[derive(Debug)]
enum InvariantError {
    NumItemsDontMatch,
    CapacitiesDontMatch,
    BlocksOutOfOrder{first_index: usize},
    NextIndexOutsideNewestBlock{next_index: usize},
    FreeSlotNotVacant{index: usize},
    FreeSlotListedTwice{index: usize},
    NumFreeSlotsDontMatch,
}

#[cfg(test)]
impl <T> BlockPool<T> {
    // Walks the whole pool and checks that the bookkeeping agrees with the blocks.
    fn validate(&self) -> std::result::Result<(), InvariantError> {
        use std::collections::HashSet;

        if self.blocks.iter().map(Block::num_live).sum::<usize>() != self.num_items {
            return Err( InvariantError::NumItemsDontMatch )
        }
        if self.blocks.iter().map(Block::capacity).sum::<usize>() != self.capacity {
            return Err( InvariantError::CapacitiesDontMatch )
        }
        for pair in self.blocks.windows(2) {
            if pair[0].end_index() > pair[1].first_index() {
                return Err( InvariantError::BlocksOutOfOrder{ first_index: pair[1].first_index() } )
            }
        }

        // either every slot was handed out, or the newest block is still being filled
        if self.next_index > self.end_index {
            return Err( InvariantError::NextIndexOutsideNewestBlock{ next_index: self.next_index } )
        }
        if self.next_index < self.end_index {
            match self.blocks.last() {
                Some(newest) if newest.contains(self.next_index) => {},
                _ => return Err(
                    InvariantError::NextIndexOutsideNewestBlock{ next_index: self.next_index }
                ),
            }
        }

        let mut free: HashSet<usize> = HashSet::new();
        for index in &self.free_slots {
            if !free.insert(*index) {
                return Err( InvariantError::FreeSlotListedTwice{ index: *index } )
            }
            let vacant: bool = *index < self.next_index
                && self.locate(*index).is_some()
                && self.get(*index).is_err();
            if !vacant {
                return Err( InvariantError::FreeSlotNotVacant{ index: *index } )
            }
        }

        // every issued slot of a live block is either occupied or on the free list
        let mut num_vacant: usize = 0;
        for block in &self.blocks {
            let num_issued: usize = block.end_index().min(self.next_index) - block.first_index();
            num_vacant += num_issued - block.num_live();
        }
        if num_vacant != self.free_slots.len() {
            return Err( InvariantError::NumFreeSlotsDontMatch )
        }

        return Ok(())
    }
}
