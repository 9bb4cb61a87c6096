//! Property-based checks for the cache maps, codecs and delta decoding.

use std::collections::{BTreeMap, HashMap};

use geo::{Coord, Geometry, LineString, Point};
use mapsync_data::pbf::delta_decode;
use mapsync_data::store::{
    CoordinateCodec, DenseDataMap, GeometryCodec, HeapMemory, LongListCodec, MonotonicDataMap,
    PairedDataMap, StoreError, VariableSizeCodec,
};
use proptest::prelude::*;

/// Small segments so that a handful of writes exercises growth.
const SEGMENT_SIZE: usize = 256;

fn heap() -> HeapMemory {
    HeapMemory::new(SEGMENT_SIZE).expect("segment size is a power of two")
}

fn coordinate_writes() -> impl Strategy<Value = Vec<(i64, f64, f64)>> {
    prop::collection::vec((0_i64..4_096, -180.0_f64..180.0, -90.0_f64..90.0), 0..64)
}

fn sparse_coordinates() -> impl Strategy<Value = BTreeMap<i64, (f64, f64)>> {
    prop::collection::btree_map(
        0_i64..20_000_000_000,
        (-180.0_f64..180.0, -90.0_f64..90.0),
        0..64,
    )
}

fn ordered_lists() -> impl Strategy<Value = BTreeMap<i64, Vec<i64>>> {
    prop::collection::btree_map(
        -1_000_i64..1_000,
        prop::collection::vec(any::<i64>(), 0..20),
        0..48,
    )
}

fn geometries() -> impl Strategy<Value = Geometry<f64>> {
    let coord = (-180.0_f64..180.0, -90.0_f64..90.0).prop_map(|(x, y)| Coord { x, y });
    prop_oneof![
        coord.clone().prop_map(|c| Geometry::Point(Point(c))),
        prop::collection::vec(coord, 2..32)
            .prop_map(|coords| Geometry::LineString(LineString::new(coords))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn dense_maps_behave_like_a_hash_map(writes in coordinate_writes(), lookup in 0_i64..8_192) {
        let mut map = DenseDataMap::new(CoordinateCodec, heap()).expect("dense map");
        let mut model = HashMap::new();
        for (key, x, y) in writes {
            let coord = Coord { x, y };
            map.put(key, &coord).expect("non-negative key");
            model.insert(key, coord);
        }
        for (key, coord) in &model {
            prop_assert_eq!(map.get(*key), Some(*coord));
        }
        prop_assert_eq!(map.get(lookup), model.get(&lookup).copied());
    }

    #[test]
    fn monotonic_maps_hold_sparse_sorted_keys(coords in sparse_coordinates(), lookup in 0_i64..20_000_000_000) {
        let mut map = MonotonicDataMap::new(CoordinateCodec, heap(), heap()).expect("monotonic map");
        for (key, (x, y)) in &coords {
            map.put(*key, &Coord { x: *x, y: *y }).expect("keys arrive in order");
        }
        prop_assert_eq!(map.len(), u64::try_from(coords.len()).expect("fits"));
        for (key, (x, y)) in &coords {
            prop_assert_eq!(map.get(*key), Some(Coord { x: *x, y: *y }));
        }
        let expected = coords.get(&lookup).map(|(x, y)| Coord { x: *x, y: *y });
        prop_assert_eq!(map.get(lookup), expected);
    }

    #[test]
    fn paired_maps_return_what_was_appended(lists in ordered_lists(), lookup in -2_000_i64..2_000) {
        let mut map = PairedDataMap::new(LongListCodec, heap(), heap()).expect("paired map");
        for (key, list) in &lists {
            map.put(*key, list).expect("keys arrive in order");
        }
        prop_assert_eq!(map.len(), lists.len() as u64);
        for (key, list) in &lists {
            prop_assert_eq!(map.get(*key).expect("readable"), Some(list.clone()));
        }
        prop_assert_eq!(map.get(lookup).expect("readable"), lists.get(&lookup).cloned());
    }

    #[test]
    fn paired_maps_reject_keys_below_the_last(lists in ordered_lists(), gap in 1_i64..100) {
        let mut map = PairedDataMap::new(LongListCodec, heap(), heap()).expect("paired map");
        for (key, list) in &lists {
            map.put(*key, list).expect("keys arrive in order");
        }
        if let Some((&first, _)) = lists.iter().next() {
            let last = *lists.keys().last().expect("non-empty");
            let key = first - gap;
            let result = map.put(key, &Vec::new());
            prop_assert!(
                matches!(result, Err(StoreError::UnorderedKey { key: k, last: l }) if k == key && l == last),
                "unexpected result {:?}",
                result
            );
        }
    }

    #[test]
    fn delta_decoding_restores_absolute_values(values in prop::collection::vec(-1_000_000_i64..1_000_000, 0..64)) {
        let deltas: Vec<i64> = values
            .iter()
            .scan(0_i64, |previous, value| {
                let delta = value - *previous;
                *previous = *value;
                Some(delta)
            })
            .collect();
        let decoded: Vec<i64> = delta_decode(&deltas).collect();
        prop_assert_eq!(decoded, values);
    }

    #[test]
    fn geometry_codec_reports_its_encoded_length(geometry in geometries()) {
        let mut out = Vec::new();
        GeometryCodec.encode(&geometry, &mut out);
        prop_assert_eq!(out.len(), GeometryCodec.encoded_len(&geometry));
        prop_assert_eq!(GeometryCodec.decode(&out).expect("decodes"), geometry);
    }
}
