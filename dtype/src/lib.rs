pub mod ext;

#[cfg(feature = "proptest")]
pub mod proptest_gen;


use smallvec::{SmallVec, smallvec};

/// Element types a fused kernel can read, write or receive as a scalar argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DType {
    Bool = 0,

    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Int64 = 7,
    UInt64 = 8,

    Float8E4M3 = 9,
    Float8E5M2 = 10,
    Float16 = 11,
    BFloat16 = 12,
    Float32 = 13,
    Float64 = 14,

    ComplexFloat = 15,
    ComplexDouble = 16,

    /// Index-typed values. Width is decided per kernel, see [`IndexType`].
    Index = 17,
}

/// Width of the integer type kernels use for sizes, strides and offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(strum::EnumCount, strum::EnumIter, strum::FromRepr, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum IndexType {
    Int32 = 0,
    #[default]
    Int64 = 1,
}

impl IndexType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Int32 => 4,
            Self::Int64 => 8,
        }
    }

    pub const fn dtype(&self) -> DType {
        match self {
            Self::Int32 => DType::Int32,
            Self::Int64 => DType::Int64,
        }
    }

    /// Narrowest index type able to address every element offset up to `max_offset`.
    pub const fn smallest_for(max_offset: i64) -> Self {
        if max_offset < i32::MAX as i64 { Self::Int32 } else { Self::Int64 }
    }
}

impl DType {
    /// Element size in bytes. [`DType::Index`] is reported as 64-bit; use [`DType::size_with`]
    /// when the kernel index width is known.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 | Self::Float8E4M3 | Self::Float8E5M2 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::ComplexFloat | Self::Index => 8,
            Self::ComplexDouble => 16,
        }
    }

    pub const fn size_with(&self, index: IndexType) -> usize {
        match self {
            Self::Index => index.bytes(),
            _ => self.bytes(),
        }
    }

    /// Replaces [`DType::Index`] with the concrete integer type of `index`.
    pub const fn resolve_index(self, index: IndexType) -> Self {
        match self {
            Self::Index => index.dtype(),
            other => other,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned() || matches!(self, Self::Index)
    }

    pub const fn is_float(&self) -> bool {
        matches!(
            self,
            Self::Float8E4M3 | Self::Float8E5M2 | Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64
        )
    }

    pub const fn is_complex(&self) -> bool {
        matches!(self, Self::ComplexFloat | Self::ComplexDouble)
    }

    /// Type name used in generated device code.
    pub const fn c_style(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8_t",
            Self::UInt8 => "uint8_t",
            Self::Int16 => "int16_t",
            Self::UInt16 => "uint16_t",
            Self::Int32 => "int",
            Self::UInt32 => "uint32_t",
            Self::Int64 => "int64_t",
            Self::UInt64 => "uint64_t",
            Self::Float8E4M3 => "__e4m3",
            Self::Float8E5M2 => "__e5m2",
            Self::Float16 => "__half",
            Self::BFloat16 => "__bfloat",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::ComplexFloat => "std::complex<float>",
            Self::ComplexDouble => "std::complex<double>",
            Self::Index => "kfuse_index_t",
        }
    }

    /// Byte pattern of a single poisoned element.
    ///
    /// Floating types get a quiet NaN. Signed integers get their maximum value and
    /// unsigned integers all ones, so reads of uninitialized memory stand out in results.
    pub fn poison(&self) -> SmallVec<[u8; 16]> {
        match self {
            Self::Bool => smallvec![1],
            Self::Int8 => SmallVec::from_slice(&i8::MAX.to_le_bytes()),
            Self::UInt8 => SmallVec::from_slice(&u8::MAX.to_le_bytes()),
            Self::Int16 => SmallVec::from_slice(&i16::MAX.to_le_bytes()),
            Self::UInt16 => SmallVec::from_slice(&u16::MAX.to_le_bytes()),
            Self::Int32 => SmallVec::from_slice(&i32::MAX.to_le_bytes()),
            Self::UInt32 => SmallVec::from_slice(&u32::MAX.to_le_bytes()),
            Self::Int64 | Self::Index => SmallVec::from_slice(&i64::MAX.to_le_bytes()),
            Self::UInt64 => SmallVec::from_slice(&u64::MAX.to_le_bytes()),
            Self::Float8E4M3 | Self::Float8E5M2 => smallvec![0x7F],
            Self::Float16 => SmallVec::from_slice(&0x7E00u16.to_le_bytes()),
            Self::BFloat16 => SmallVec::from_slice(&0x7FC0u16.to_le_bytes()),
            Self::Float32 => SmallVec::from_slice(&f32::NAN.to_le_bytes()),
            Self::Float64 => SmallVec::from_slice(&f64::NAN.to_le_bytes()),
            Self::ComplexFloat => f32::NAN.to_le_bytes().into_iter().cycle().take(8).collect(),
            Self::ComplexDouble => f64::NAN.to_le_bytes().into_iter().cycle().take(16).collect(),
        }
    }
}
