mod block_file;
mod file_layout;
mod file_registry;

pub use block_file::*;
pub use file_layout::*;
pub use file_registry::*;
