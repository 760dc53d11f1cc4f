use dtable::{Blob, Cursor, DTable, Dtype, KeyType, Lookup, MemDTable, OverlayDTable};
use rand::Rng;
use std::collections::BTreeMap;
use test_log::test;

/// Differential test: an overlay over randomly filled layers must agree with
/// a reference model that applies the layers in priority order.
#[test]
fn overlay_agrees_with_reference_model() -> dtable::Result<()> {
    let mut rng = rand::rng();

    for _ in 0..20 {
        let layer_count = rng.random_range(1..=4);
        let key_space = 60_u32;

        let mut layers = Vec::new();
        let mut model = BTreeMap::<u32, Option<u8>>::new();

        // lowest index = highest priority, so build the model back to front
        let mut raw_layers = Vec::new();
        for _ in 0..layer_count {
            let mut entries = BTreeMap::new();
            for _ in 0..rng.random_range(0..40) {
                let key = rng.random_range(0..key_space);
                let value = if rng.random_bool(0.25) {
                    None
                } else {
                    Some(rng.random::<u8>())
                };
                entries.insert(key, value);
            }
            raw_layers.push(entries);
        }

        for entries in raw_layers.iter().rev() {
            for (key, value) in entries {
                model.insert(*key, *value);
            }
        }

        for entries in &raw_layers {
            let mut table = MemDTable::new(KeyType::UInt32);
            for (key, value) in entries {
                table.insert(
                    Dtype::from(*key),
                    value.map(|v| Blob::from([v])),
                    true,
                )?;
            }
            layers.push(Box::new(table) as Box<dyn DTable>);
        }

        let overlay = OverlayDTable::new(layers)?;

        // point lookups
        for key in 0..key_space {
            let expected = match model.get(&key) {
                None => Lookup::Absent,
                Some(None) => Lookup::Tombstone,
                Some(Some(v)) => Lookup::Value(Blob::from([*v])),
            };
            assert_eq!(expected, overlay.lookup(&key.into())?, "key {key}");
        }

        // ordered traversal, forward
        let mut cursor = overlay.iter();
        let mut walked = Vec::new();
        while cursor.valid() {
            let key = match cursor.key() {
                Dtype::UInt32(k) => k,
                other => panic!("unexpected key {other:?}"),
            };
            walked.push((key, cursor.value()?.map(|v| v[0])));
            cursor.next()?;
        }

        let expected = model
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect::<Vec<_>>();
        assert_eq!(expected, walked);

        // and backward
        let mut reversed = Vec::new();
        if cursor.last()? {
            loop {
                let key = match cursor.key() {
                    Dtype::UInt32(k) => k,
                    other => panic!("unexpected key {other:?}"),
                };
                reversed.push((key, cursor.value()?.map(|v| v[0])));
                if !cursor.prev()? {
                    break;
                }
            }
        }
        reversed.reverse();

        assert_eq!(expected, reversed);
    }

    Ok(())
}
