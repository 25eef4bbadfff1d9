// SPDX-License-Identifier: Apache-2.0

//! # segtx: software transactional memory over a segmented byte region
//!
//! A user-space runtime that lets multiple concurrent threads read, write,
//! allocate and free inside a shared memory [`Region`] under ACI semantics
//! (Atomicity, Consistency, Isolation — no Durability: state lives only in
//! process memory).
//!
//! A client opens a [`Transaction`] against a region with [`Region::begin`],
//! performs a sequence of aligned byte-range operations
//! ([`Region::read`], [`Region::write`], [`Region::alloc`], [`Region::free`]),
//! and finishes with [`Region::end`]. Every fallible operation consumes the
//! transaction by value and, on abort, does not hand it back: the type
//! system enforces that an aborted transaction cannot be reused, matching
//! the "handle invalid after either terminal state" rule of the underlying
//! protocol.
//!
//! ```
//! use segtx::Region;
//!
//! let region = Region::create(1024, 8).expect("create region");
//!
//! let tx = region.begin(false);
//! let mut buf = [0u8; 8];
//! let (ok, tx) = region.write(tx, &[1, 2, 3, 4, 5, 6, 7, 8], region.start());
//! assert!(ok);
//! assert!(region.end(tx.unwrap()));
//!
//! let tx = region.begin(true);
//! let (ok, tx) = region.read(tx, region.start(), &mut buf);
//! assert!(ok);
//! assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
//! assert!(region.end(tx.unwrap()));
//! ```

pub mod engine;
pub mod error;
pub mod lock;
pub mod region;
pub mod segment;
pub mod transaction;

pub use engine::AllocOutcome;
pub use error::{EngineError, RegionError};
pub use region::Region;
pub use segment::Segment;
pub use transaction::Transaction;
