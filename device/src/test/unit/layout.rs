use test_case::test_case;

use crate::{Error, Layout, contiguous_strides};

#[test_case(&[2, 3, 4], &[12, 4, 1]; "row major")]
#[test_case(&[2, 0, 4], &[4, 4, 1]; "zero extent keeps running product")]
#[test_case(&[0, 3], &[3, 1]; "zero extent outer")]
#[test_case(&[], &[]; "scalar")]
fn contiguous(sizes: &[i64], expected: &[i64]) {
    assert_eq!(contiguous_strides(sizes).as_slice(), expected);
}

#[test]
fn split_then_merge_restores_layout() {
    let layout = Layout::contiguous(&[6, 5]);
    let split = layout.split(0, 3).unwrap();
    assert_eq!(split.sizes.as_slice(), &[2, 3, 5]);
    assert_eq!(split.strides.as_slice(), &[15, 5, 1]);
    assert_eq!(split.merge(0).unwrap(), layout);
}

#[test]
fn split_requires_divisible_factor() {
    assert!(matches!(Layout::contiguous(&[7]).split(0, 2), Err(Error::IncompatibleView { .. })));
}

#[test]
fn merging_non_adjacent_memory_fails() {
    // Column-major [4, 3]: rows are not contiguous with each other.
    let layout = Layout::new(&[4, 3], &[1, 4]);
    assert!(matches!(layout.merge(0), Err(Error::IncompatibleView { .. })));
    let transposed = layout.permute(&[1, 0]).unwrap();
    assert_eq!(transposed.merge(0).unwrap(), Layout::new(&[12], &[1]));
}

#[test]
fn expand_zeroes_broadcast_strides() {
    let layout = Layout::contiguous(&[1, 3]);
    let expanded = layout.expand(&[4, 3]).unwrap();
    assert_eq!(expanded.strides.as_slice(), &[0, 1]);
    assert_eq!(expanded.storage_extent(), 3);
    assert!(matches!(layout.expand(&[4, 5]), Err(Error::InvalidExpand { dim: 1, .. })));
}

#[test]
fn permute_rejects_duplicates() {
    let layout = Layout::contiguous(&[2, 3]);
    assert!(matches!(layout.permute(&[0, 0]), Err(Error::InvalidPermutation { .. })));
    assert!(matches!(layout.permute(&[0]), Err(Error::InvalidPermutation { .. })));
}

#[test]
fn view_through_size_one_dims() {
    let layout = Layout::new(&[2, 1, 3], &[3, 100, 1]);
    let viewed = layout.view(&[6]).unwrap();
    assert_eq!(viewed.strides.as_slice(), &[1]);
    assert!(layout.is_contiguous());
}
