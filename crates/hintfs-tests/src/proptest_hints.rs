//! Property tests: the hint merge lattice and consumption semantics.

use std::path::PathBuf;

use proptest::prelude::*;

use hintfs_core::hints::Hint;

use crate::harness::TestEnv;

/// Reference model of the merge lattice: agreement keeps the hint,
/// disagreement is Ambiguous, and Ambiguous absorbs everything after it.
fn model_fold(records: &[bool]) -> Option<Hint> {
    let mut state: Option<Hint> = None;
    for &created in records {
        let incoming = if created { Hint::Created } else { Hint::Deleted };
        state = Some(match state {
            None => incoming,
            Some(existing) if existing == incoming => existing,
            Some(_) => Hint::Ambiguous,
        });
    }
    state
}

proptest! {
    #[test]
    fn prop_sequential_records_match_model(records in prop::collection::vec(any::<bool>(), 0..32)) {
        let env = TestEnv::new();
        let p = PathBuf::from("/prop/target");
        for &created in &records {
            if created {
                env.observer.about_to_write(&p, None).unwrap();
            } else {
                env.observer.about_to_delete(&p, None).unwrap();
            }
        }
        prop_assert_eq!(env.observer.cache().peek(&p), model_fold(&records));
    }

    #[test]
    fn prop_take_hint_consumes_exactly_once(records in prop::collection::vec(any::<bool>(), 1..16),
                                            assumed in any::<bool>()) {
        let env = TestEnv::new();
        let p = PathBuf::from("/prop/target");
        for &created in &records {
            if created {
                env.observer.about_to_write(&p, None).unwrap();
            } else {
                env.observer.about_to_delete(&p, None).unwrap();
            }
        }
        let expected = match model_fold(&records) {
            Some(Hint::Ambiguous) => true,
            Some(hint) => hint.implied_exists() != Some(assumed),
            None => false,
        };
        prop_assert_eq!(env.observer.distrust(&p, assumed), expected);
        // Consumed: nothing left to distrust.
        prop_assert!(!env.observer.distrust(&p, assumed));
    }

    #[test]
    fn prop_probe_never_lies(on_disk in any::<bool>(), records in prop::collection::vec(any::<bool>(), 0..8)) {
        let env = TestEnv::new();
        let p = PathBuf::from("/prop/target");
        if on_disk {
            env.disk.add_file("/prop/target");
        }
        // Hints may say anything; the probe answers from the disk.
        for &created in &records {
            if created {
                env.observer.about_to_write(&p, None).unwrap();
            } else {
                env.observer.about_to_delete(&p, None).unwrap();
            }
        }
        prop_assert_eq!(env.observer.exists(&p, None).unwrap(), on_disk);
        // And the republished hint reflects the observed truth.
        let refreshed = if on_disk { Hint::Created } else { Hint::Deleted };
        prop_assert_eq!(env.observer.cache().peek(&p), Some(refreshed));
    }

    #[test]
    fn prop_distinct_paths_do_not_interfere(n in 1usize..24) {
        let env = TestEnv::new();
        for i in 0..n {
            let p = PathBuf::from(format!("/prop/f{i}"));
            env.observer.about_to_write(&p, None).unwrap();
        }
        for i in 0..n {
            let p = PathBuf::from(format!("/prop/f{i}"));
            prop_assert_eq!(env.observer.cache().peek(&p), Some(Hint::Created));
        }
    }
}
