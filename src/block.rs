use std::collections::TryReserveError;
use std::mem::{align_of, size_of, MaybeUninit};
use std::slice;
use std::time::Instant;

use crate::error::{PoolError, Result};

pub const CACHE_LINE: usize = 64;

// repr(align) rounds the size up to a multiple of the alignment and repr(C) keeps the item at
// offset 0, so every item starts on its own cache line no matter how big T is.
#[repr(C, align(64))]
pub struct Element<T> {
    item: MaybeUninit<T>,
}

impl <T> Element<T> {
    fn uninit() -> Self {
        return Self { item: MaybeUninit::uninit() }
    }
}

/// One fixed-capacity allocation unit. Covers the global indices
/// `first_index..first_index + capacity`.
pub struct Block<T> {
    elements: Vec<Element<T>>,
    occupied: Vec<bool>, // occupied[i] <=> elements[i].item is initialized
    first_index: usize,
    num_live: usize,
}

impl <T> Block<T> {
    pub fn allocate(capacity: usize, first_index: usize) -> Result<Self> {
        assert!(capacity > 0);
        let start: Instant = Instant::now();
        let allocation_failure = |source: TryReserveError| {
            PoolError::AllocationFailure { slots: capacity, source: Some(source) }
        };

        let mut elements: Vec<Element<T>> = Vec::new();
        let mut occupied: Vec<bool> = Vec::new();
        elements.try_reserve_exact(capacity).map_err(allocation_failure)?;
        occupied.try_reserve_exact(capacity).map_err(allocation_failure)?;
        // both fit in their reservations, no reallocation
        elements.resize_with(capacity, Element::uninit);
        occupied.resize(capacity, false);

        log::debug!(
            "allocated block for {} objects ({} bytes each, aligned to {}) in {} microseconds",
            capacity,
            Self::element_size(),
            align_of::<Element<T>>(),
            start.elapsed().as_micros(),
        );

        return Ok(Self {
            elements,
            occupied,
            first_index,
            num_live: 0,
        })
    }

    pub fn element_size() -> usize {
        return size_of::<Element<T>>()
    }

    pub fn capacity(&self) -> usize {
        return self.elements.len()
    }

    pub fn first_index(&self) -> usize {
        return self.first_index
    }

    pub fn end_index(&self) -> usize {
        return self.first_index + self.capacity()
    }

    pub fn contains(&self, index: usize) -> bool {
        return self.first_index <= index && index < self.end_index()
    }

    pub fn num_live(&self) -> usize {
        return self.num_live
    }

    pub fn is_empty(&self) -> bool {
        return self.num_live == 0
    }

    fn is_occupied(&self, offset: usize) -> bool {
        return self.occupied.get(offset).copied().unwrap_or(false)
    }

    pub fn get(&self, offset: usize) -> Option<&T> {
        if !self.is_occupied(offset) {
            return None
        }
        unsafe {
            return Some(self.elements[offset].item.assume_init_ref())
        }
    }

    pub fn get_mut(&mut self, offset: usize) -> Option<&mut T> {
        if !self.is_occupied(offset) {
            return None
        }
        unsafe {
            return Some(self.elements[offset].item.assume_init_mut())
        }
    }

    pub fn store(&mut self, offset: usize, item: T) {
        assert!(!self.occupied[offset]);
        self.elements[offset].item.write(item);
        self.occupied[offset] = true;
        self.num_live += 1;
    }

    pub fn take(&mut self, offset: usize) -> Option<T> {
        if !self.is_occupied(offset) {
            return None
        }
        self.occupied[offset] = false; // the element is logically uninitialized from here on
        self.num_live -= 1;
        unsafe {
            return Some(self.elements[offset].item.assume_init_read())
        }
    }

    pub fn items(&self) -> Items<'_, T> {
        return Items {
            elements: self.elements.iter(),
            occupied: self.occupied.iter(),
        }
    }
}

impl <T> Drop for Block<T> {
    fn drop(&mut self) {
        if self.num_live == 0 {
            return
        }
        for (element, occupied) in self.elements.iter_mut().zip(self.occupied.iter()) {
            if *occupied {
                unsafe { element.item.assume_init_drop() };
            }
        }
    }
}

pub struct Items<'a, T> {
    elements: slice::Iter<'a, Element<T>>,
    occupied: slice::Iter<'a, bool>,
}

impl <'a, T> Items<'a, T> {
    pub fn empty() -> Self {
        return Self {
            elements: [].iter(),
            occupied: [].iter(),
        }
    }
}

impl <'a, T> Iterator for Items<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let element: &'a Element<T> = self.elements.next()?;
            let occupied: bool = *self.occupied.next()?;
            if occupied {
                unsafe {
                    return Some(element.item.assume_init_ref())
                }
            }
        }
    }
}
