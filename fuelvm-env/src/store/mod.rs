//! Backing storage for the fuel tank and the lock that serializes its
//! read-modify-write cycles. Both are injected into the tank, so a runtime
//! can use process-local state or share a remote key-value store between
//! instances.

pub mod fuel;
pub mod lock;

pub use fuel::{FuelStore, KeyValueStore, KvFuelStore, LocalFuelStore};
pub use lock::{DistributedLock, LocalLock, LockGuard};
