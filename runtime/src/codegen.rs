//! Device source assembly: type preamble, index typedef, kernel signature and body.

use std::path::{Path, PathBuf};

use kfuse_dtype::IndexType;
use kfuse_ir::{KernelValue, LoweredKernel};
use snafu::ResultExt;

use crate::error::*;

const INCLUDE_COMPLEX: &str = r#"
#ifdef __NVCC__
#include <complex>
#endif // __NVCC__
"#;

const TYPE_DEFINITIONS: &str = r#"
using int8_t = signed char;
using uint8_t = unsigned char;
using int16_t = short int;
using uint16_t = unsigned short int;
using int32_t = int;
using uint32_t = unsigned int;
using int64_t = long long int;
using uint64_t = unsigned long long int;

struct __align__(2) __half { unsigned short raw; };
struct __align__(2) __bfloat { unsigned short raw; };
struct __align__(1) __e4m3 { unsigned char raw; };
struct __align__(1) __e5m2 { unsigned char raw; };
"#;

/// Tensor argument layout: data pointer, logical sizes, then strides, all at index width.
const KERNEL_PREAMBLE: &str = r#"
template <typename T, int N>
struct Tensor {
  __device__ T& operator[](kfuse_index_t ind) { return data[ind]; };

  T* data;
  kfuse_index_t logical_size[N];
  kfuse_index_t alloc_stride[N];
};

template <typename T>
struct Tensor<T, 0> {
  __device__ T& operator[](kfuse_index_t ind) { return data[ind]; };

  T* data;
};
"#;

/// Zero the compiler cannot prove constant.
const MAGIC_ZERO: &str = r#"
#define KFUSE_DEFINE_MAGIC_ZERO          \
  __shared__ int kfuse_zero_s;           \
  if (threadIdx.x == 0)                  \
    kfuse_zero_s = 0;                    \
  __syncthreads();                       \
  atomicMin(&kfuse_zero_s, threadIdx.x); \
  int kfuse_zero = kfuse_zero_s;

#define KFUSE_UPDATE_MAGIC_ZERO \
  do {                          \
    kfuse_zero <<= 1;           \
  } while (0);
"#;

/// Marker of the magic-zero helper in a structured source.
pub const MAGIC_ZERO_MARKER: &str = "#define KFUSE_DEFINE_MAGIC_ZERO";

pub fn index_typedef(index_type: IndexType) -> &'static str {
    match index_type {
        IndexType::Int32 => "typedef int kfuse_index_t;\n",
        IndexType::Int64 => "typedef int64_t kfuse_index_t;\n",
    }
}

/// Wraps kernel code with everything it needs to compile on its own.
///
/// The magic-zero helper is left out when `magic_zero` is off.
pub fn structured_code(kernel_code: &str, index_type: IndexType, magic_zero: bool) -> String {
    let mut code = String::from(INCLUDE_COMPLEX);
    code.push_str("namespace {\n");
    code.push_str(TYPE_DEFINITIONS);
    code.push_str(index_typedef(index_type));
    code.push_str(KERNEL_PREAMBLE);
    if magic_zero {
        code.push_str(MAGIC_ZERO);
    }
    code.push_str(kernel_code);
    code.push_str("}\n");
    code
}

/// C identifier for a parameter name. Symbols like `T0.size[0]` are not valid C.
fn identifier(name: &str) -> String {
    let mut ident: String = name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect();
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

/// Kernel entry point: `__global__` signature over the kernel parameters followed by the body.
pub fn kernel_code(kernel: &LoweredKernel, name: &str) -> String {
    let params: Vec<String> = kernel
        .parameters()
        .iter()
        .map(|param| match param {
            KernelValue::Tensor(id) => {
                let tv = kernel.tensor(*id);
                format!("Tensor<{}, {}> {}", tv.dtype.c_style(), tv.domain.rank(), identifier(&tv.name))
            }
            KernelValue::Scalar { name, dtype } => format!("{} {}", dtype.c_style(), identifier(name)),
        })
        .collect();

    let mut code = format!("\n__global__ void {name}({}) {{\n", params.join(", "));
    for line in kernel.body().lines() {
        code.push_str("  ");
        code.push_str(line);
        code.push('\n');
    }
    code.push_str("}\n");
    code
}

/// Replacement source for the `fusion_count`-th fusion compiled in this process.
///
/// Returns `None` when no file is configured for that count, so generated code is used.
pub fn external_source(paths: &[PathBuf], fusion_count: i64) -> Result<Option<String>> {
    if fusion_count < 1 {
        return Ok(None);
    }
    let Some(path) = paths.get(fusion_count as usize - 1) else {
        tracing::debug!(
            fusion.count = fusion_count,
            external.files = paths.len(),
            "no external source for this fusion, using generated code"
        );
        return Ok(None);
    };

    let code = std::fs::read_to_string(path).context(IoSnafu { path: path.display().to_string() })?;
    tracing::debug!(external.path = %path.display(), "compiling external source");
    Ok(Some(code))
}

/// Writes `code` to `{dir}/{name}.cu`.
pub fn dump_source(dir: &Path, name: &str, code: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{name}.cu"));
    std::fs::create_dir_all(dir).context(IoSnafu { path: dir.display().to_string() })?;
    std::fs::write(&path, code).context(IoSnafu { path: path.display().to_string() })?;
    tracing::debug!(kernel.name = name, dump.path = %path.display(), "kernel source written");
    Ok(path)
}
