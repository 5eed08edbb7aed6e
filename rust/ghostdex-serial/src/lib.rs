//! Serialization pipeline for partially materialized trees.
//!
//! Data travels between memory and a backing store as a [`Value`](value::Value):
//! scalars, integer arrays, lists and string-keyed maps. A pipeline is assembled
//! from small stages:
//!
//! - [`Translator`](translate::Translator) converts a rich type to and from a `Value`
//!   shape, without I/O.
//! - [`Archiver`](archive::Archiver) stores one `Value` and hands back an opaque
//!   reference, or loads one given a reference.
//! - [`CompositeSerializer`](composite::CompositeSerializer) chains a translator in
//!   front of an archiver.
//! - [`ParallelSerializer`](parallel::ParallelSerializer) runs batches of pull/push
//!   tasks on a worker pool, deduplicating concurrent requests for the same item and
//!   tracking the progress of each.
//! - [`Packer`](packer::Packer) groups many small keyed payloads into capacity-bounded
//!   bins before they reach the store.

pub mod archive;
pub mod codec;
pub mod composite;
pub mod file;
pub mod memory;
pub mod packer;
pub mod parallel;
pub mod task;
pub mod tracker;
pub mod translate;
pub mod value;

pub use archive::{Archiver, BatchArchiver, Sequential};
pub use composite::CompositeSerializer;
pub use file::FileArchiver;
pub use memory::MemoryArchiver;
pub use packer::{Packer, PackerConfig};
pub use parallel::ParallelSerializer;
pub use task::{PullTask, PushTask, TaskId};
pub use translate::Translator;
pub use value::Value;
