//! Property tests for the two quantified laws in spec.md §8 that are
//! naturally generative rather than example-based: parameter
//! normalization idempotence and range expansion.

use fleetctl::addr::iter_ip_ranges;
use fleetctl::Param;
use proptest::prelude::*;

proptest! {
    #[test]
    fn normalize_is_idempotent(values in proptest::collection::vec("[a-zA-Z0-9_]{1,12}", 0..8)) {
        let once = Param::list(values.clone()).normalize();
        let twice = Param::list(once.clone()).normalize();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn range_expansion_covers_every_address_in_order(
        start_octet in 0u8..200,
        span in 0u8..20,
    ) {
        let end_octet = start_octet.saturating_add(span);
        let expr = format!("10.0.0.{start_octet}-10.0.0.{end_octet}");
        let result = iter_ip_ranges(&expr, None).unwrap();

        prop_assert_eq!(result.len(), (end_octet - start_octet) as usize + 1);
        for (i, (host, port)) in result.iter().enumerate() {
            prop_assert_eq!(host, &format!("10.0.0.{}", start_octet as u32 + i as u32));
            prop_assert_eq!(*port, None);
        }
    }
}
