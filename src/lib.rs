//! Growable, index-stable object pools.
//!
//! [`BlockPool`] stores objects in 64-byte aligned blocks, hands out stable `usize` indices, reuses
//! freed slots before growing and releases a whole block as soon as its last object is removed.

mod block;
mod block_pool;
mod error;


pub use block::CACHE_LINE;
pub use block_pool::{BlockPool, Iter};
pub use error::{PoolError, Result};

/// Common interface of index-handle pools.
pub trait Pool<T>: Sized {
    type Iter<'a>: Iterator<Item=&'a T> where Self: 'a, T: 'a;

    fn with_capacity(capacity: usize) -> Result<Self>;
    fn len(&self) -> usize;
    fn capacity(&self) -> usize;
    fn get(&self, id: usize) -> Result<&T>;
    fn get_mut(&mut self, id: usize) -> Result<&mut T>;
    fn insert(&mut self, item: T) -> Result<usize>;
    fn remove(&mut self, id: usize) -> Result<T>;
    fn is_alive(&self, id: usize) -> bool;
    fn iter<'a>(&'a self) -> Self::Iter<'a>;

    fn is_empty(&self) -> bool {
        return self.len() == 0
    }
}
