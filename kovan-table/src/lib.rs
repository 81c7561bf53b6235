#![doc(
    html_logo_url = "https://raw.githubusercontent.com/vertexclique/kovan/master/art/kovan-square.svg"
)]
//! Fixed-bucket hash table with wait-free readers, built on kovan memory reclamation
//!
//! `kovan-table` is a read-mostly table for lookups on hot paths (connection
//! or session indexes and the like). The bucket count is chosen once at
//! creation; there is no resizing.
//!
//! # Features
//!
//! - **Composite Keys**: 32, 64, 128 and 160-bit identifiers in one
//!   192-bit [`CompositeKey`], placed by a folded multiplicative hash
//! - **Wait-Free Reads**: lookups and traversal never block or retry
//! - **Single Writer**: mutation needs `&mut Table`, so writers are
//!   serialized by ownership without any internal lock
//! - **Deferred Reclamation**: removed entries are retired to kovan and stay
//!   readable for in-flight readers until their grace period ends
//! - **Occupancy Statistics**: fixed-point distribution of bucket chain lengths
//!
//! Stored values must be `Send + Sync`. Readers on other threads borrow them,
//! and retired entries are dropped by whichever thread runs reclamation.
//!
//! # `no_std`
//!
//! The crate's own code only uses `core` and `alloc`, but `kovan` keeps
//! per-thread reclamation state and links `std`. Turning off the default
//! `std` feature does not make the dependency tree `no_std`.
//!
//! # Example
//!
//! ```rust
//! use core::ops::ControlFlow;
//! use kovan_table::{CompositeKey, Table};
//!
//! let mut table = Table::new(1024).unwrap();
//! let reader = table.reader();
//!
//! table.add(CompositeKey::from_u32(7), "seven").unwrap();
//! table.add(CompositeKey::from_u128(177, 277), "pair").unwrap();
//!
//! // Readers can live on other threads.
//! std::thread::spawn(move || {
//!     assert_eq!(reader.lookup(&CompositeKey::from_u32(7)), Ok("seven"));
//! })
//! .join()
//! .unwrap();
//!
//! let mut visited = 0;
//! let _ = table.foreach(|_key, _value| {
//!     visited += 1;
//!     ControlFlow::Continue(())
//! });
//! assert_eq!(visited, 2);
//!
//! let stats = table.stats().unwrap();
//! assert_eq!(stats.occupancy_sum, 2);
//!
//! table.terminate();
//! ```

#![warn(missing_docs)]
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod buckets;
mod error;
mod key;
mod stats;
mod table;

pub use buckets::{MAX_BITS, bits_for};
pub use error::TableError;
pub use key::{CompositeKey, GOLDEN64, KEY_WORDS, KeyWidth, mix64};
pub use stats::{MAX_STATISTICAL_MODE, PRECISION, TableStats};
pub use table::{DEFAULT_CAPACITY, Table, TableConfig, TableReader};
