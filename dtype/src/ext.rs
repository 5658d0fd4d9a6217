use super::*;

/// Host types with a matching element type, used to read and write buffers from the host.
pub trait HasDType: Copy + Default + 'static {
    const DTYPE: DType;

    fn to_le(self, out: &mut Vec<u8>);
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_dtype_ext {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(impl HasDType for $ty {
            const DTYPE: DType = $dtype;

            fn to_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn from_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                <$ty>::from_le_bytes(raw)
            }
        })*
    };
}

impl_dtype_ext! {
    i8 => DType::Int8, i16 => DType::Int16, i32 => DType::Int32, i64 => DType::Int64,
    u8 => DType::UInt8, u16 => DType::UInt16, u32 => DType::UInt32, u64 => DType::UInt64,
    f32 => DType::Float32, f64 => DType::Float64,
}

impl HasDType for bool {
    const DTYPE: DType = DType::Bool;

    fn to_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn from_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}
