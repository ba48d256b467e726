//! Deadlock avoidance by acquiring shared rows in one global order.
//!
//! Any two scopes that need the same set of rows lock them in ascending key
//! order, so neither can hold a row the other is waiting on while waiting for
//! one the other holds.

/// Returns the pair in acquisition order (smaller key first).
pub fn ordered<K: Ord>(a: K, b: K) -> (K, K) {
    if a <= b { (a, b) } else { (b, a) }
}
