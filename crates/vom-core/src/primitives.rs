//! # Primitives
//!
//! Fixed constants of the virtual object manager.
//!
//! These are compiled in. Anything an embedder may reasonably want to tune
//! lives in `VomConfig` instead, with these values as its defaults.

/// Default number of virtual objects whose state is kept resident.
///
/// Small on purpose: a vat holds many virtual objects but touches few of
/// them per delivery.
pub const DEFAULT_CACHE_SIZE: usize = 3;

/// First export id handed out when no configuration says otherwise.
///
/// Export ids are shared by kinds (`o+K/I`) and remotables (`o+N`).
pub const FIRST_EXPORT_ID: u64 = 1;

/// Instance numbers of each kind start here.
pub const FIRST_INSTANCE_ID: u64 = 1;

/// Weak store ids start here (`vom.ws<N>.<vref>`).
pub const FIRST_WEAK_STORE_ID: u64 = 1;

/// Name used for keys in weak store error messages unless the store was
/// given one.
pub const DEFAULT_KEY_NAME: &str = "key";

/// Weak tables sweep dead entries once they grow to this many, then again
/// at twice the surviving size.
pub const MIN_PRUNE_THRESHOLD: usize = 16;
