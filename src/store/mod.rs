// SPDX-License-Identifier: GPL-3.0-only
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;
pub use traits::KvStore;
