use crate::*;

#[test]
fn split_records_transform_and_extents() {
    let mut domain = TensorDomain::symbolic("T0", 1);
    let i0 = domain.logical()[0];
    let (outer, inner) = domain.split(i0, 4i64);

    let mut ee = ExpressionEvaluator::new();
    ee.bind("T0.size[0]", 10);
    assert_eq!(ee.evaluate(&domain.id(outer).extent), Some(3));
    assert_eq!(ee.evaluate(&domain.id(inner).extent), Some(4));
    assert_eq!(domain.transforms().len(), 1);
}

#[test]
fn exprs_between_follows_the_path() {
    let mut domain = TensorDomain::symbolic("T0", 3);
    let [i0, i1, i2] = [domain.logical()[0], domain.logical()[1], domain.logical()[2]];
    let merged = domain.merge(i1, i0);
    let (outer, inner) = domain.split(merged, 2i64);
    // Dead end hanging off i2.
    domain.split(i2, 8i64);
    domain.set_allocation(vec![outer, i2, inner]);

    let forward = domain.exprs_between(domain.logical(), domain.allocation().unwrap());
    assert_eq!(forward.len(), 2);
    assert!(matches!(forward[0], Transform::Merge { output, .. } if *output == merged));
    assert!(matches!(forward[1], Transform::Split { input, .. } if *input == merged));

    let backward = domain.exprs_between(domain.allocation().unwrap(), domain.logical());
    assert!(backward.is_empty());
}

#[test]
fn merge_of_expanded_broadcasts_keeps_expansion() {
    let mut domain = TensorDomain::new([IterDomain::expanded(3i64), IterDomain::expanded(5i64)]);
    let merged = domain.merge(domain.logical()[0], domain.logical()[1]);
    let id = domain.id(merged);
    assert!(id.is_broadcast());
    assert!(id.has_expanded_extent());
    assert_eq!(ExpressionEvaluator::new().evaluate(id.maybe_expanded_extent()), Some(15));
}

#[test]
fn rank_ignores_reductions() {
    let domain = TensorDomain::new([IterDomain::new(4i64), IterDomain::reduction(8i64), IterDomain::new(2i64)]);
    assert_eq!(domain.rank(), 2);
    assert_eq!(domain.maybe_allocation(), domain.logical());
}
