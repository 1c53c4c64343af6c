pub mod prefetcher;
pub mod write_buffer;

pub use prefetcher::{QueuePrefetcher, QueueSource};
pub use write_buffer::{FlushSink, WriteBuffer};
