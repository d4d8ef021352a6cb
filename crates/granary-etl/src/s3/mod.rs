//! Object-storage staging: the bucket pusher and the sharded buffer writer.

pub mod pusher;
pub mod streamer;

pub use pusher::BucketPusher;
pub use streamer::{ShardedBufferWriter, WriterOptions};

use async_trait::async_trait;
use std::path::PathBuf;

/// Upload seam between the buffer writer and object storage.
///
/// Implemented by [`BucketPusher`]; tests substitute counting mocks.
#[async_trait]
pub trait ObjectPusher: Send + Sync {
    /// Upload `files` under `remote_folder`, returning the uploaded keys.
    async fn push(&self, remote_folder: &str, files: &[PathBuf]) -> anyhow::Result<Vec<String>>;
}
