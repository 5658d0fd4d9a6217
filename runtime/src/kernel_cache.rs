//! Global compiled-binary deduplication cache.
//!
//! Maps (source hash, driver) pairs to compiled binaries. Executors that generate the same
//! source with the same compile options share one compilation, which makes recompiling an
//! executor or building a second executor for an identical fusion cheap.
//!
//! Uses papaya's lock-free HashMap, so lookups and inserts from concurrent executors need no
//! explicit synchronization.

use std::sync::{Arc, OnceLock};

use kfuse_device::{Binary, CompileOptions};
use papaya::HashMap;
use xxhash_rust::xxh64::xxh64;

/// Cache key: (xxh64 of source and options, driver name).
type BinaryKey = (u64, String);

// Binaries live until explicitly cleared via clear_all().
static BINARIES: OnceLock<HashMap<BinaryKey, Arc<Binary>>> = OnceLock::new();

fn binaries() -> &'static HashMap<BinaryKey, Arc<Binary>> {
    BINARIES.get_or_init(HashMap::new)
}

/// Hash identifying a compilation: the full source plus every compiler argument.
pub fn source_hash(source: &str, options: &CompileOptions) -> u64 {
    let mut bytes = Vec::with_capacity(source.len() + 64);
    bytes.extend_from_slice(source.as_bytes());
    for arg in options.to_args() {
        bytes.push(0);
        bytes.extend_from_slice(arg.as_bytes());
    }
    xxh64(&bytes, 0)
}

/// Get or compile a binary for `source` on the driver named `driver`.
///
/// If multiple threads race on the same key, each may compile, but all of them receive
/// the binary that was inserted first.
///
/// # Errors
///
/// Returns the error of `compile_fn` when the binary is not cached.
pub fn get_or_compile_binary<F, E>(
    source: &str,
    options: &CompileOptions,
    driver: &str,
    compile_fn: F,
) -> Result<Arc<Binary>, E>
where
    F: FnOnce() -> Result<Binary, E>,
{
    let key = (source_hash(source, options), driver.to_string());
    let map = binaries();
    let guard = map.guard();

    if let Some(cached) = map.get(&key, &guard) {
        tracing::trace!(binary.hash = key.0, driver, "compiled binary cache hit");
        return Ok(Arc::clone(cached));
    }

    let compiled = Arc::new(compile_fn()?);

    use papaya::{Compute, Operation};
    match map.compute(
        key,
        |entry| match entry {
            Some((_, existing)) => Operation::Abort(Arc::clone(existing)),
            None => Operation::Insert(Arc::clone(&compiled)),
        },
        &guard,
    ) {
        Compute::Inserted(_, binary) => Ok(Arc::clone(binary)),
        Compute::Aborted(binary) => Ok(binary),
        _ => Ok(compiled),
    }
}

/// Number of cached binaries.
pub fn len() -> usize {
    binaries().len()
}

/// Clear all cached binaries.
///
/// Mostly useful in tests that count driver compilations.
pub fn clear_all() {
    let guard = binaries().guard();
    binaries().clear(&guard);
}
