//! Persisted executor state.
//!
//! An executor is saved as one little-endian record so a later process can skip
//! compilation and the per-signature shape work:
//!
//! ```text
//! magic "KFEX" | version u32
//! device smem limit i64 | block size mark i64 | register mark opt<u32> | warp size i64
//! heuristic u8 | fusion id i64 | concrete id i64 | runtime id i64 | group id i64
//! kernel source str | binary opt<kind u8, arch u32 u32, image bytes> | index type opt<u8>
//! entry count u64, then per entry:
//!   cache id u64 | launch dims 6 x opt<i64> | smem i64 | buffer count u64, then per buffer:
//!     is output u8 | position u64 | rank u64 | sizes i64* | strides i64* | dtype u8
//!     zero init u8 | resets to zero u8 | profile buffer u8
//! ```
//!
//! Buffer positions index the fusion outputs or the kernel's global intermediates, so the
//! record stays valid for any lowering of the same fusion. Argument layouts are not saved;
//! they are rebuilt on the first launch of each entry.

use std::collections::HashMap;
use std::sync::Arc;

use kfuse_device::{Binary, BinaryKind, Driver};
use kfuse_dtype::{DType, IndexType};
use kfuse_ir::{LoweredKernel, ParallelType, ScheduleHeuristic};
use snafu::{OptionExt, ensure};
use strum::IntoEnumIterator;

use crate::allocation::GlobalBufferInfo;
use crate::codegen::MAGIC_ZERO_MARKER;
use crate::compiler::{CompiledKernel, KernelIdentity, compile_and_load, compile_options, load_binary};
use crate::config::{CompileParams, ExecutorOptions};
use crate::error::*;
use crate::executor::{ExecutorEntry, FusionExecutor};
use crate::launch_params::LaunchParams;

pub const MAGIC: [u8; 4] = *b"KFEX";
pub const VERSION: u32 = 1;

// ============================================================================
// CURSORS
// ============================================================================

#[derive(Debug, Default)]
struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    fn bool(&mut self, value: bool) {
        self.u8(value as u8);
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn i64(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn len(&mut self, len: usize) {
        self.u64(len as u64);
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.len(bytes.len());
        self.bytes.extend_from_slice(bytes);
    }

    fn opt_i64(&mut self, value: Option<i64>) {
        self.bool(value.is_some());
        self.i64(value.unwrap_or_default());
    }

    fn opt_u32(&mut self, value: Option<u32>) {
        self.bool(value.is_some());
        self.u32(value.unwrap_or_default());
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

fn corrupt<T>(reason: impl Into<String>) -> Result<T> {
    CorruptCacheSnafu { reason: reason.into() }.fail()
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        ensure!(
            len <= self.remaining(),
            CorruptCacheSnafu { reason: format!("truncated at byte {} while reading {what}", self.pos) }
        );
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.array::<1>(what)?[0])
    }

    fn bool(&mut self, what: &str) -> Result<bool> {
        match self.u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            other => corrupt(format!("{what} flag is {other}")),
        }
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array(what)?))
    }

    fn i64(&mut self, what: &str) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array(what)?))
    }

    /// Length prefix, bounded by the bytes left so corrupt lengths cannot trigger huge allocations.
    fn len(&mut self, what: &str, element_bytes: usize) -> Result<usize> {
        let len = self.u64(what)?;
        let fits = usize::try_from(len).ok().filter(|len| len.saturating_mul(element_bytes) <= self.remaining());
        fits.context(CorruptCacheSnafu { reason: format!("{what} length {len} exceeds the record") })
    }

    fn bytes(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.len(what, 1)?;
        self.take(len, what)
    }

    fn string(&mut self, what: &str) -> Result<String> {
        match std::str::from_utf8(self.bytes(what)?) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => corrupt(format!("{what} is not valid UTF-8")),
        }
    }

    fn opt_i64(&mut self, what: &str) -> Result<Option<i64>> {
        let present = self.bool(what)?;
        let value = self.i64(what)?;
        Ok(present.then_some(value))
    }

    fn opt_u32(&mut self, what: &str) -> Result<Option<u32>> {
        let present = self.bool(what)?;
        let value = self.u32(what)?;
        Ok(present.then_some(value))
    }

    fn usize(&mut self, what: &str) -> Result<usize> {
        let value = self.u64(what)?;
        usize::try_from(value).ok().context(CorruptCacheSnafu { reason: format!("{what} {value} out of range") })
    }

    fn opt_u8_enum<T>(&mut self, what: &str, from_repr: impl Fn(u8) -> Option<T>) -> Result<Option<T>> {
        let present = self.bool(what)?;
        let raw = self.u8(what)?;
        if !present {
            return Ok(None);
        }
        from_repr(raw).map(Some).context(CorruptCacheSnafu { reason: format!("unknown {what} {raw}") })
    }
}

// ============================================================================
// ENTRIES
// ============================================================================

fn write_launch_params(w: &mut Writer, params: &LaunchParams) {
    for ptype in ParallelType::iter() {
        w.opt_i64(params.get(ptype));
    }
    w.i64(params.smem());
}

fn read_launch_params(r: &mut Reader<'_>) -> Result<LaunchParams> {
    let mut params = LaunchParams::new();
    for ptype in ParallelType::iter() {
        if let Some(value) = r.opt_i64("launch dimension")? {
            params.bind(ptype, value);
        }
    }
    params.set_smem(r.i64("dynamic shared memory")?);
    Ok(params)
}

fn write_buffer_info(w: &mut Writer, info: &GlobalBufferInfo, position: usize, is_output: bool) {
    w.bool(is_output);
    w.len(position);
    w.len(info.sizes.len());
    info.sizes.iter().for_each(|size| w.i64(*size));
    info.strides.iter().for_each(|stride| w.i64(*stride));
    w.u8(info.dtype as u8);
    w.bool(info.zero_init);
    w.bool(info.resets_to_zero);
    w.bool(info.is_profile_buffer);
}

/// Reads one buffer info, returning whether it describes an output.
fn read_buffer_info(r: &mut Reader<'_>, kernel: &LoweredKernel) -> Result<(bool, GlobalBufferInfo)> {
    let is_output = r.bool("output flag")?;
    let position = r.usize("buffer position")?;
    let tensor = if is_output {
        kernel.outputs().get(position).copied()
    } else {
        kernel.intermediate_allocations().nth(position).map(|alloc| alloc.buffer)
    };
    let tensor = tensor.context(CorruptCacheSnafu {
        reason: format!("{} position {position} does not exist", if is_output { "output" } else { "intermediate" }),
    })?;

    let rank = r.len("buffer rank", 16)?;
    let sizes = (0..rank).map(|_| r.i64("buffer size")).collect::<Result<Vec<_>>>()?;
    let strides = (0..rank).map(|_| r.i64("buffer stride")).collect::<Result<Vec<_>>>()?;
    let raw_dtype = r.u8("dtype")?;
    let dtype =
        DType::from_repr(raw_dtype).context(CorruptCacheSnafu { reason: format!("unknown dtype {raw_dtype}") })?;

    let info = GlobalBufferInfo {
        tensor,
        sizes,
        strides,
        dtype,
        zero_init: r.bool("zero init")?,
        resets_to_zero: r.bool("resets to zero")?,
        is_profile_buffer: r.bool("profile buffer")?,
    };
    Ok((is_output, info))
}

fn write_entry(w: &mut Writer, entry: &ExecutorEntry) {
    write_launch_params(w, &entry.launch_params);
    w.len(entry.outputs.len() + entry.intermediates.len());
    for (position, info) in entry.outputs.iter().enumerate() {
        write_buffer_info(w, info, position, true);
    }
    for (position, info) in entry.intermediates.iter().enumerate() {
        write_buffer_info(w, info, position, false);
    }
}

fn read_entry(r: &mut Reader<'_>, kernel: &LoweredKernel) -> Result<ExecutorEntry> {
    let launch_params = read_launch_params(r)?;
    let count = r.len("buffer count", 1)?;
    let mut entry = ExecutorEntry { launch_params, ..ExecutorEntry::default() };
    for _ in 0..count {
        match read_buffer_info(r, kernel)? {
            (true, info) => entry.outputs.push(info),
            (false, info) => entry.intermediates.push(info),
        }
    }
    Ok(entry)
}

// ============================================================================
// EXECUTOR
// ============================================================================

fn check_identity(field: &'static str, expected: impl ToString, actual: impl ToString) -> Result<()> {
    let (expected, actual) = (expected.to_string(), actual.to_string());
    ensure!(expected == actual, IdentityMismatchSnafu { field, expected, actual });
    Ok(())
}

impl FusionExecutor {
    /// Saves the compiled kernel and every cached entry.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        ensure!(self.is_compiled(), NotCompiledSnafu);

        let mut w = Writer::default();
        w.bytes.extend_from_slice(&MAGIC);
        w.u32(VERSION);

        w.i64(self.device_smem_limit);
        w.i64(self.block_size_high_water_mark);
        w.opt_u32(self.maxrregcount_high_water_mark);
        w.i64(self.warp_size);

        let identity = self.identity;
        w.u8(identity.heuristic as u8);
        for id in [identity.fusion_id, identity.concrete_id, identity.runtime_id, identity.group_id] {
            w.i64(id);
        }

        let compiled = self.compiled.as_ref();
        w.bytes(compiled.map(|compiled| compiled.source.as_bytes()).unwrap_or_default());
        w.bool(compiled.is_some());
        if let Some(binary) = compiled.map(|compiled| &compiled.binary) {
            w.u8(binary.kind as u8);
            w.u32(binary.arch.0);
            w.u32(binary.arch.1);
            w.bytes(&binary.image);
        }
        w.bool(compiled.is_some());
        w.u8(compiled.map_or(0, |compiled| compiled.index_type as u8));

        let mut cache_ids: Vec<u64> = self.entries.keys().copied().collect();
        cache_ids.sort_unstable();
        w.len(cache_ids.len());
        for cache_id in cache_ids {
            w.u64(cache_id);
            write_entry(&mut w, &self.entries[&cache_id]);
        }

        tracing::debug!(kernel.name = %identity, record.bytes = w.bytes.len(), "executor serialized");
        Ok(w.bytes)
    }

    /// Restores an executor saved by [`serialize`](Self::serialize).
    ///
    /// `kernel` is the caller's own lowering of the fusion. The record is only trusted when its
    /// identity matches `identity`. A saved binary is loaded as is; without one the saved source
    /// is compiled again.
    pub fn deserialize(
        bytes: &[u8],
        kernel: Arc<LoweredKernel>,
        driver: Arc<dyn Driver>,
        options: ExecutorOptions,
        identity: KernelIdentity,
    ) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let magic: [u8; 4] = r.array("magic")?;
        ensure!(magic == MAGIC, CorruptCacheSnafu { reason: format!("bad magic {magic:02x?}") });
        let version = r.u32("version")?;
        ensure!(version == VERSION, CorruptCacheSnafu { reason: format!("unsupported version {version}") });

        let device_smem_limit = r.i64("device shared memory limit")?;
        let block_size_high_water_mark = r.i64("block size mark")?;
        let maxrregcount_high_water_mark = r.opt_u32("register mark")?;
        let warp_size = r.i64("warp size")?;

        let raw_heuristic = r.u8("heuristic")?;
        let heuristic = ScheduleHeuristic::from_repr(raw_heuristic)
            .context(CorruptCacheSnafu { reason: format!("unknown heuristic {raw_heuristic}") })?;
        check_identity("heuristic", identity.heuristic, heuristic)?;
        check_identity("fusion_id", identity.fusion_id, r.i64("fusion id")?)?;
        check_identity("concrete_id", identity.concrete_id, r.i64("concrete id")?)?;
        check_identity("runtime_id", identity.runtime_id, r.i64("runtime id")?)?;
        check_identity("group_id", identity.group_id, r.i64("group id")?)?;

        let source = r.string("kernel source")?;
        let binary = if r.bool("binary flag")? {
            let raw_kind = r.u8("binary kind")?;
            let kind = BinaryKind::from_repr(raw_kind)
                .context(CorruptCacheSnafu { reason: format!("unknown binary kind {raw_kind}") })?;
            let arch = (r.u32("binary arch")?, r.u32("binary arch")?);
            Some(Binary { kind, arch, image: r.bytes("binary image")?.to_vec() })
        } else {
            None
        };
        let index_type = r.opt_u8_enum("index type", IndexType::from_repr)?;

        let entry_count = r.len("entry count", 8)?;
        let mut entries = HashMap::with_capacity(entry_count);
        for _ in 0..entry_count {
            let cache_id = r.u64("cache id")?;
            entries.insert(cache_id, read_entry(&mut r, &kernel)?);
        }
        ensure!(r.remaining() == 0, CorruptCacheSnafu { reason: format!("{} trailing bytes", r.remaining()) });

        let mut executor = Self::new(driver, options);
        executor.identity = identity;
        executor.device_smem_limit = device_smem_limit;
        executor.block_size_high_water_mark = block_size_high_water_mark;
        executor.maxrregcount_high_water_mark = maxrregcount_high_water_mark;
        executor.warp_size = warp_size;
        executor.disable_parameter_cache = kernel.output_extents_depend_on_scalar_inputs();

        if !kernel.is_expression_evaluated() {
            let index_type =
                index_type.context(CorruptCacheSnafu { reason: "compiled kernel without an index type" })?;
            let name = identity.kernel_name();
            let enable_magic_zero = source.contains(MAGIC_ZERO_MARKER);
            let (binary, function) = match binary {
                Some(binary) => {
                    let function = load_binary(executor.driver.as_ref(), &binary, &name)?;
                    (Arc::new(binary), function)
                }
                None => {
                    let options = compile_options(executor.driver.properties(), maxrregcount_high_water_mark);
                    compile_and_load(executor.driver.as_ref(), &source, &name, &options)?
                }
            };
            executor.compiled = Some(CompiledKernel {
                name,
                source,
                binary,
                function,
                index_type,
                block_size: Some(block_size_high_water_mark),
                max_register_count: maxrregcount_high_water_mark,
            });
            executor.compile_params = CompileParams {
                index_type: Some(index_type),
                max_register_count: maxrregcount_high_water_mark,
                enable_magic_zero,
            };
        }
        executor.kernel = Some(kernel);
        executor.entries = entries;

        tracing::debug!(
            kernel.name = %identity,
            record.entries = executor.entries.len(),
            "executor deserialized"
        );
        Ok(executor)
    }
}
