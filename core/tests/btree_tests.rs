use flatdb_core::btree::{NameKey, OrderedIndex, PairKey};
use std::collections::BTreeSet;
use tempfile::tempdir;

/// Small deterministic generator so runs are reproducible without a rand dependency.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u32) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) % bound as u64) as u32
    }
}

fn churn(order: usize, seed: u64) {
    let dir = tempdir().unwrap();
    let mut tree = OrderedIndex::<PairKey>::open(dir.path().join("pairs.db"), order).unwrap();
    let mut model = BTreeSet::new();
    let mut rng = Lcg(seed);

    for step in 0..600 {
        let key = PairKey::new(rng.next(20) + 1, rng.next(30) + 1);
        if rng.next(3) == 0 && !model.is_empty() {
            let victim = *model.iter().nth(rng.next(model.len() as u32) as usize).unwrap();
            tree.delete(&victim).unwrap();
            model.remove(&victim);
        } else {
            let inserted = tree.create(key).unwrap();
            assert_eq!(inserted, model.insert(key), "step {step}: duplicate detection");
        }
        tree.check_invariants().unwrap_or_else(|e| panic!("order {order}, step {step}: {e}"));
    }

    assert_eq!(tree.all_keys().unwrap(), model.iter().copied().collect::<Vec<_>>());
    for primary in 1..=20 {
        let expected: Vec<PairKey> = model.iter().filter(|k| k.primary == primary).copied().collect();
        assert_eq!(tree.read(&PairKey::group(primary)).unwrap(), expected);
    }
}

#[test]
fn random_churn_matches_a_model_at_order_3() {
    churn(3, 7);
}

#[test]
fn random_churn_matches_a_model_at_order_4() {
    churn(4, 42);
}

#[test]
fn random_churn_matches_a_model_at_order_5() {
    churn(5, 1234);
}

#[test]
fn height_grows_with_splits_and_shrinks_with_merges() {
    let dir = tempdir().unwrap();
    let mut tree = OrderedIndex::open(dir.path().join("pairs.db"), 5).unwrap();
    assert_eq!(tree.height(), 1);

    for i in 1..=200 {
        assert!(tree.create(PairKey::new(i, i)).unwrap());
    }
    assert!(tree.height() >= 3);
    tree.check_invariants().unwrap();

    for i in 1..=200 {
        tree.delete(&PairKey::new(i, i)).unwrap();
        tree.check_invariants().unwrap();
    }
    assert_eq!(tree.height(), 1);
    assert!(tree.is_empty().unwrap());
}

#[test]
fn freed_nodes_are_reused() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pairs.db");
    let mut tree = OrderedIndex::open(&path, 4).unwrap();
    for i in 1..=100 {
        tree.create(PairKey::new(1, i)).unwrap();
    }
    let grown = std::fs::metadata(&path).unwrap().len();
    for i in 1..=100 {
        tree.delete(&PairKey::new(1, i)).unwrap();
    }
    for i in 1..=100 {
        tree.create(PairKey::new(2, i)).unwrap();
    }
    assert_eq!(std::fs::metadata(&path).unwrap().len(), grown);
    tree.check_invariants().unwrap();
}

#[test]
fn group_reads_return_every_dependent() {
    let dir = tempdir().unwrap();
    let mut tree = OrderedIndex::open(dir.path().join("series_episodes.db"), 5).unwrap();
    for episode in [10, 3, 7, 1] {
        tree.create(PairKey::new(2, episode)).unwrap();
    }
    tree.create(PairKey::new(1, 99)).unwrap();
    tree.create(PairKey::new(3, 50)).unwrap();

    let dependents: Vec<u32> = tree.read(&PairKey::group(2)).unwrap().iter().map(|k| k.dependent).collect();
    assert_eq!(dependents, vec![1, 3, 7, 10]);
    assert!(tree.read(&PairKey::group(4)).unwrap().is_empty());
}

#[test]
fn duplicates_and_missing_keys() {
    let dir = tempdir().unwrap();
    let mut tree = OrderedIndex::open(dir.path().join("pairs.db"), 3).unwrap();
    assert!(tree.create(PairKey::new(1, 1)).unwrap());
    assert!(!tree.create(PairKey::new(1, 1)).unwrap());
    assert_eq!(tree.len().unwrap(), 1);

    let err = tree.delete(&PairKey::new(1, 2)).unwrap_err();
    assert!(err.is_not_found());
    tree.delete(&PairKey::new(1, 1)).unwrap();
    assert!(tree.delete(&PairKey::new(1, 1)).unwrap_err().is_not_found());
}

#[test]
fn name_prefix_reads_ignore_case_and_accents() {
    let dir = tempdir().unwrap();
    let mut tree = OrderedIndex::open(dir.path().join("series.name.db"), 5).unwrap();
    for (name, id) in [("Breaking Bad", 1), ("Better Call Saul", 2), ("Black Mirror", 3), ("Bréaking Point", 4), ("Dark", 5)] {
        tree.create(NameKey::new(name, id)).unwrap();
    }

    let ids = |prefix: &str| -> Vec<u32> { tree.read(&NameKey::prefix(prefix).unwrap()).unwrap().iter().map(|k| k.id).collect() };
    assert_eq!(ids("BREAKING"), vec![1, 4]);
    assert_eq!(ids("b"), vec![2, 3, 1, 4]);
    assert_eq!(ids("dark"), vec![5]);
    assert!(ids("lost").is_empty());
}

#[test]
fn equal_names_are_told_apart_by_id() {
    let dir = tempdir().unwrap();
    let mut tree = OrderedIndex::open(dir.path().join("actors.name.db"), 3).unwrap();
    for id in 1..=12 {
        tree.create(NameKey::new("John Smith", id)).unwrap();
    }
    tree.delete(&NameKey::new("john smith", 6)).unwrap();
    let ids: Vec<u32> = tree.read(&NameKey::prefix("John Smith").unwrap()).unwrap().iter().map(|k| k.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 7, 8, 9, 10, 11, 12]);
    tree.check_invariants().unwrap();
}

#[test]
fn contents_and_stored_order_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pairs.db");
    {
        let mut tree = OrderedIndex::open(&path, 4).unwrap();
        for i in 1..=50 {
            tree.create(PairKey::new(i % 5, i)).unwrap();
        }
        tree.delete(&PairKey::new(0, 5)).unwrap();
    }
    let tree = OrderedIndex::<PairKey>::open(&path, 9).unwrap();
    assert_eq!(tree.order(), 4);
    assert_eq!(tree.len().unwrap(), 49);
    assert!(!tree.contains(&PairKey::new(0, 5)).unwrap());
    assert!(tree.contains(&PairKey::new(0, 10)).unwrap());
    tree.check_invariants().unwrap();
}

#[test]
fn order_below_three_is_rejected() {
    let dir = tempdir().unwrap();
    assert!(OrderedIndex::<PairKey>::open(dir.path().join("pairs.db"), 2).is_err());
}
