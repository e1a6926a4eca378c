use peatflux::folds::FoldAssignment;
use peatflux::table::{Observation, ObservationTable, Source};
use proptest::prelude::*;

fn table_with_weeks(weeks: &[u8]) -> ObservationTable {
    let rows = weeks
        .iter()
        .map(|w| Observation {
            features: vec![f64::from(*w)],
            target: 1.0,
            source: Source::Airborne,
            week: *w,
        })
        .collect();
    ObservationTable::new(vec!["x".to_string()], rows).unwrap()
}

proptest! {
    #[test]
    fn folds_partition_the_configured_rows(
        weeks in prop::collection::vec(1u8..=53, 1..200),
        n_folds in 1usize..8,
        first in 1u8..=30,
        len in 0u8..=22,
    ) {
        let configured: Vec<u8> = (first..=first + len).collect();
        let assignment = FoldAssignment::from_weeks(&configured, n_folds, &[]).unwrap();
        let table = table_with_weeks(&weeks);
        let folds = assignment.partition(&table);

        let mut seen = vec![0usize; table.len()];
        for f in 0..folds.n_folds() {
            for r in folds.fold(f) {
                seen[*r] += 1;
            }
        }
        for (i, w) in weeks.iter().enumerate() {
            prop_assert_eq!(seen[i], usize::from(configured.contains(w)));
        }
        let outside = weeks.iter().filter(|w| !configured.contains(w)).count();
        prop_assert_eq!(folds.excluded(), outside);
        prop_assert_eq!(folds.sizes().iter().sum::<usize>() + outside, weeks.len());
    }

    #[test]
    fn consecutive_weeks_never_share_a_fold(n_folds in 2usize..8, first in 1u8..=40) {
        let configured: Vec<u8> = (first..=53).collect();
        let assignment = FoldAssignment::from_weeks(&configured, n_folds, &[]).unwrap();
        for pair in configured.windows(2) {
            prop_assert_ne!(assignment.fold_of(pair[0]), assignment.fold_of(pair[1]));
        }
        let pairs: Vec<(u8, usize)> = assignment.pairs().collect();
        prop_assert_eq!(pairs.len(), configured.len());
        prop_assert!(pairs.iter().all(|(_, f)| *f < n_folds));
    }
}
