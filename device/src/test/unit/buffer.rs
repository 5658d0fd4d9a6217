use std::sync::Arc;

use kfuse_dtype::DType;

use crate::{Allocator, Buffer, BufferOptions, Error, HostAllocator};

fn allocator() -> Arc<dyn Allocator> {
    Arc::new(HostAllocator)
}

#[test]
fn from_slice_roundtrips_in_logical_order() {
    let buffer = Buffer::from_slice(&allocator(), &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    assert_eq!(buffer.strides(), &[3, 1]);
    assert_eq!(buffer.storage_bytes(), 24);

    let transposed = buffer.permute(&[1, 0]).unwrap();
    assert_eq!(transposed.to_vec::<f32>().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    assert!(transposed.is_alias_of(&buffer));
}

#[test]
fn empty_strided_allocates_only_addressable_elements() {
    let alloc = allocator();
    let buffer = Buffer::empty_strided(&alloc, DType::Float32, &[4, 3], &[1, 4], BufferOptions::default()).unwrap();
    assert_eq!(buffer.storage_bytes(), 12 * 4);

    let expanded = Buffer::empty_strided(&alloc, DType::Float32, &[4, 3], &[0, 1], BufferOptions::default()).unwrap();
    assert_eq!(expanded.storage_bytes(), 3 * 4);

    let empty = Buffer::empty_strided(&alloc, DType::Float32, &[0, 3], &[3, 1], BufferOptions::default()).unwrap();
    assert_eq!(empty.storage_bytes(), 0);
}

#[test]
fn poison_fills_every_element() {
    let buffer = Buffer::empty(&allocator(), DType::Float32, &[8]).unwrap();
    buffer.fill_poison().unwrap();
    assert!(buffer.to_vec::<f32>().unwrap().iter().all(|v| v.is_nan()));

    let ints = Buffer::empty(&allocator(), DType::Int32, &[3]).unwrap();
    ints.fill_poison().unwrap();
    assert_eq!(ints.to_vec::<i32>().unwrap(), vec![i32::MAX; 3]);
}

#[test]
fn view_shares_storage() {
    let buffer = Buffer::from_slice(&allocator(), &[0i64, 1, 2, 3, 4, 5], &[6]).unwrap();
    let view = buffer.view(&[2, 3]).unwrap();
    assert!(view.is_alias_of(&buffer));
    assert_eq!(view.storage_id(), buffer.storage_id());
    assert_eq!(view.device_ptr(), buffer.device_ptr());
    assert_eq!(view.to_vec::<i64>().unwrap(), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn out_of_bounds_strided_view_is_rejected() {
    let buffer = Buffer::from_slice(&allocator(), &[0u8; 6], &[6]).unwrap();
    assert!(matches!(buffer.as_strided(&[2, 3], &[3, 1], 1), Err(Error::InvalidView { .. })));
    let shifted = buffer.as_strided(&[5], &[1], 1).unwrap();
    assert_eq!(shifted.device_ptr(), buffer.device_ptr() + 1);
}

#[test]
fn independent_allocations_do_not_alias() {
    let alloc = allocator();
    let lhs = Buffer::zeros(&alloc, DType::Float32, &[4]).unwrap();
    let rhs = Buffer::zeros(&alloc, DType::Float32, &[4]).unwrap();
    assert!(!lhs.is_alias_of(&rhs));
    assert_eq!(lhs.to_vec::<f32>().unwrap(), vec![0.0; 4]);
}
