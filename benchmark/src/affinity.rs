//! Thread-to-core pinning.

use log::warn;

/// Pins the calling thread to the `core_id % nCores`-th available core.
/// Platforms without affinity support get a warning and no pinning.
pub fn pin_current_thread_to_core(core_id: usize) {
    match core_affinity::get_core_ids() {
        Some(ids) if !ids.is_empty() => {
            let id = ids[core_id % ids.len()];
            if !core_affinity::set_for_current(id) {
                warn!("could not pin thread to core {}", id.id);
            }
        }
        _ => warn!("thread affinity is not supported on this platform"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinning_never_panics() {
        // Out-of-range ids must wrap instead of indexing out of bounds.
        pin_current_thread_to_core(0);
        pin_current_thread_to_core(1 << 20);
    }
}
