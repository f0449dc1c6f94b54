//! Small shared primitives used by several rules.

use std::sync::atomic::{AtomicU32, Ordering};

/// Atomically increments `counter`, wrapping at `i32::MAX` (L3, spec.md
/// §3) to avoid negative-modulo pathology on overflow, and returns the
/// resulting value modulo `modulo`. Returns `0` if `modulo` is `0`.
pub fn next_cyclic_index(counter: &AtomicU32, modulo: usize) -> usize {
    if modulo == 0 {
        return 0;
    }
    let mut current = counter.load(Ordering::Relaxed);
    loop {
        let next = if current >= i32::MAX as u32 { 0 } else { current + 1 };
        match counter.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(prev) => return (prev as usize) % modulo,
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_at_i32_max() {
        let counter = AtomicU32::new(i32::MAX as u32);
        let idx = next_cyclic_index(&counter, 5);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert_eq!(idx, (i32::MAX as usize) % 5);
    }

    #[test]
    fn cycles_through_all_indices() {
        let counter = AtomicU32::new(0);
        let seen: Vec<usize> = (0..6).map(|_| next_cyclic_index(&counter, 3)).collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }
}
