mod buffer_pool;
mod buffer_slot;
mod page_cache;
mod page_guard;

pub use buffer_pool::*;
pub use buffer_slot::*;
pub use page_cache::PageCache;
pub use page_guard::*;
