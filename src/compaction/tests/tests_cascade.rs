//! Overflow cascading into deeper levels and the shadowing rule.

#[cfg(test)]
mod tests {
    use crate::compaction::compact;
    use crate::compaction::tests::helpers::*;
    use crate::levels::{LevelIndex, capacity};
    use tempfile::TempDir;

    #[test]
    fn full_level_evicts_oldest_tables_downward() {
        let tmp = TempDir::new().unwrap();
        let mut levels = LevelIndex::open(tmp.path()).unwrap();
        levels.ensure_level(1).unwrap();
        levels
            .splice(
                1,
                0..0,
                vec![
                    table(3, &[1, 2]),
                    table(1, &[10, 11]),
                    table(4, &[20, 21]),
                    table(2, &[30, 31]),
                ],
            )
            .unwrap();
        levels.push(0, table(5, &[40])).unwrap();
        levels.push(0, table(6, &[41])).unwrap();

        // Rebuilt: [40,41] and [42] → level 1 would hold 6 tables.
        let report = compact(&mut levels, table(7, &[42]), &config_with_cap(2)).unwrap();

        assert_eq!(report.rounds, 2);
        assert_eq!(report.deepest_level, 2);
        assert_eq!(levels.table_counts(), vec![0, 4, 2]);

        // Generations 1 and 2 were evicted.
        assert_eq!(ranges(&levels, 1), vec![(1, 2), (20, 21), (40, 41), (42, 42)]);
        assert_eq!(ranges(&levels, 2), vec![(10, 11), (30, 31)]);
        assert!(levels.level(2).iter().all(|t| t.generation() == 7));

        for key in [1, 2, 10, 11, 20, 21, 30, 31, 40, 41, 42] {
            assert!(read(&levels, key).is_some(), "key {key} lost");
        }
        assert_eq!(read(&levels, 10), Some(value(1, 10)));
        assert_eq!(read(&levels, 42), Some(value(7, 42)));
    }

    #[test]
    fn shallower_copy_shadows_stale_deeper_copy() {
        let tmp = TempDir::new().unwrap();
        let mut levels = LevelIndex::open(tmp.path()).unwrap();
        levels.ensure_level(2).unwrap();
        levels.push(2, table(1, &[5, 50])).unwrap();
        levels
            .splice(
                1,
                0..0,
                vec![
                    table(1, &[1, 2]),
                    table(3, &[5, 6]),
                    table(2, &[40, 50]),
                    table(4, &[60, 61]),
                ],
            )
            .unwrap();
        levels.push(0, table(5, &[100])).unwrap();
        levels.push(0, table(6, &[101])).unwrap();

        let report = compact(&mut levels, table(7, &[102]), &config_with_cap(2)).unwrap();

        // Evicting the tables stamped 1 and 2 merges them with the level-2
        // table; its key 5 must not be rewritten under stamp 7.
        assert_eq!(report.shadowed, 1);
        assert_eq!(ranges(&levels, 2), vec![(1, 2), (40, 50)]);

        let hit = levels.lookup(5).unwrap();
        assert_eq!(hit.level, 1);
        assert_eq!(levels.read(&hit).unwrap(), value(3, 5));
        assert_eq!(read(&levels, 50), Some(value(2, 50)));
    }

    #[test]
    fn capacity_holds_after_many_compactions() {
        let tmp = TempDir::new().unwrap();
        let mut levels = LevelIndex::open(tmp.path()).unwrap();
        let config = config_with_cap(4);

        let mut generation = 1;
        for round in 0..60u64 {
            let keys: Vec<u64> = (0..4).map(|i| round * 7 + i * 13).collect::<Vec<_>>();
            let mut keys = keys;
            keys.sort_unstable();
            keys.dedup();
            let t = table(generation, &keys);
            if levels.level(0).len() < capacity(0) {
                levels.push(0, t).unwrap();
            } else {
                compact(&mut levels, t, &config).unwrap();
            }
            generation += 1;

            for (level, count) in levels.table_counts().into_iter().enumerate() {
                assert!(count <= capacity(level), "level {level} holds {count}");
            }
            for level in 1..levels.depth() {
                let r = ranges(&levels, level);
                assert!(r.windows(2).all(|w| w[0].1 < w[1].0), "level {level}: {r:?}");
            }
        }
        assert!(levels.depth() >= 3);
    }
}
