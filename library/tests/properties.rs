use netstack::codec::{base64_decode, base64_encode, url_decode, url_encode};
use netstack::ethernet::{mac_to_string, string_to_mac};
use netstack::router::RouteTable;
use netstack::utils::checksum;
use proptest::prelude::*;
use std::net::Ipv4Addr;

proptest! {
    #[test]
    fn checksum_of_data_plus_checksum_is_zero(mut data in prop::collection::vec(any::<u8>(), 0..256)) {
        if data.len() % 2 == 1 {
            data.push(0);
        }
        let sum = checksum(&data);
        data.extend_from_slice(&sum.to_be_bytes());
        prop_assert_eq!(checksum(&data), 0);
    }

    #[test]
    fn mac_text_round_trips(mac in any::<[u8; 6]>()) {
        prop_assert_eq!(string_to_mac(&mac_to_string(&mac)).unwrap(), mac);
    }

    #[test]
    fn base64_round_trips(data in prop::collection::vec(any::<u8>(), 0..128)) {
        prop_assert_eq!(base64_decode(&base64_encode(&data)).unwrap(), data);
    }

    #[test]
    fn url_encoding_round_trips(text in ".{0,64}") {
        prop_assert_eq!(url_decode(&url_encode(&text)).unwrap(), text);
    }

    #[test]
    fn routes_never_duplicate(prefixes in prop::collection::vec((any::<u8>(), 8u8..=24), 1..40)) {
        let table = RouteTable::new();
        table.init().unwrap();
        let mut distinct = std::collections::HashSet::new();
        for (a, len) in prefixes {
            let mask = Ipv4Addr::from(u32::MAX << (32 - len as u32));
            let dst = Ipv4Addr::new(10, a, 0, 0);
            let dst = Ipv4Addr::from(u32::from(dst) & u32::from(mask));
            table.add_route(dst, mask, Ipv4Addr::UNSPECIFIED, "if0").unwrap();
            distinct.insert((dst, mask));
        }
        prop_assert_eq!(table.len(), distinct.len());
    }
}
