//! # vom-core
//!
//! The virtual object manager of one vat.
//!
//! Virtual objects are long-lived objects whose state lives in a durable
//! key/value store rather than in memory. A small LRU cache keeps the state
//! of recently used objects resident; everything else is written back and
//! reloaded on demand, while the object's in-memory representative stays
//! usable throughout. The manager also tracks which references durable data
//! holds, so that an object's records are only deleted once nothing can
//! reach it.
//!
//! ## Architectural Constraints
//!
//! - Single vat, single thread: `Rc`/`RefCell`, nothing is `Send`
//! - Deterministic: `BTreeMap`/`BTreeSet` wherever order is observable
//! - Every fallible operation returns `VomResult`; the core never panics
//! - No async, no network dependencies

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod config;
pub mod containers;
pub mod kind;
pub mod liveness;
pub mod manager;
pub mod marshal;
pub mod primitives;
pub mod slot_table;
pub mod slots;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{CapData, Local, Presence, RefCounts, Reference, Remotable, Value, VomError, VomResult};

// =============================================================================
// RE-EXPORTS: Manager
// =============================================================================

pub use cache::{Cache, CacheStats, InnerSelf};
pub use config::VomConfig;
pub use containers::{VirtualAwareWeakMap, VirtualAwareWeakSet, WeakStore};
pub use kind::{InstanceKit, KindMaker, Representative, State};
pub use liveness::LivenessTracker;
pub use manager::VirtualObjectManager;
pub use slot_table::SlotTable;
pub use slots::{SlotType, VatSlot, parse_vat_slot};

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use store::{MemoryStore, RedbStore, VatStore};
