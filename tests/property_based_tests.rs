mod common;

use cache_sync_core::cache::{KeySpace, PayloadCodec};
use cache_sync_core::store::GlobPattern;
use cache_sync_core::tags_for_path;
use common::memory_service;
use common::standalone_config;
use common::strategies::*;
use proptest::prelude::*;

proptest! {
    /// Property: any JSON document survives the codec unchanged
    #[test]
    fn codec_preserves_documents(value in json_value_strategy(), threshold in 0usize..4096) {
        let codec = PayloadCodec::new(threshold);
        let encoded = codec.encode(&value).unwrap();
        prop_assert_eq!(codec.decode(&encoded.bytes).unwrap(), value);
    }

    /// Property: compression kicks in exactly above the threshold
    #[test]
    fn large_documents_are_compressed(value in large_document_strategy()) {
        let codec = PayloadCodec::new(1024);
        let encoded = codec.encode(&value).unwrap();
        let json_len = serde_json::to_vec(&value).unwrap().len();
        prop_assert_eq!(encoded.compressed, json_len > 1024);
        prop_assert_eq!(encoded.bytes[0], u8::from(encoded.compressed));
    }

    /// Property: a literal key (no metacharacters) only matches itself
    #[test]
    fn literal_globs_match_only_themselves(key in cache_key_strategy(), other in cache_key_strategy()) {
        let pattern = GlobPattern::new(&key);
        prop_assert!(pattern.matches(&key));
        prop_assert_eq!(pattern.matches(&other), key == other);
    }

    /// Property: a trailing star matches every extension of the prefix
    #[test]
    fn prefix_globs_match_extensions(prefix in cache_key_strategy(), suffix in "[a-z0-9:]{0,16}") {
        let pattern = GlobPattern::new(&format!("{prefix}*"));
        let extended = format!("{prefix}{suffix}");
        prop_assert!(pattern.matches(&extended));
    }

    /// Property: entry keys for one version never collide with another version's pattern
    #[test]
    fn version_patterns_are_disjoint(key in cache_key_strategy()) {
        let keys = KeySpace::new("cache");
        let v1 = uuid::Uuid::new_v4().simple().to_string();
        let v2 = uuid::Uuid::new_v4().simple().to_string();
        let entry = keys.entry(&v1, &key);
        prop_assert!(GlobPattern::new(&keys.entry_pattern(&v1, "*")).matches(&entry));
        prop_assert!(!GlobPattern::new(&keys.entry_pattern(&v2, "*")).matches(&entry));
    }

    /// Property: every path segment yields exactly one segment tag and one hierarchy tag
    #[test]
    fn path_tags_cover_each_segment(segments in prop::collection::vec("[a-z0-9_-]{1,12}", 0..6)) {
        let path = format!("/{}?q=1", segments.join("/"));
        let tags = tags_for_path(&path);
        prop_assert_eq!(tags.len(), segments.len() * 2);
        if let Some(last) = segments.last() {
            let last_tag = format!("path:{}", last);
            prop_assert!(tags.contains(&last_tag));
            let full_tag = format!("path_hierarchy:{}", segments.join("/"));
            prop_assert!(tags.contains(&full_tag));
        }
    }

    /// Property: set then get returns the same document through the whole stack
    #[test]
    fn service_round_trips_documents(key in cache_key_strategy(), value in json_value_strategy()) {
        let round_tripped = tokio_test::block_on(async {
            let (cache, _store) = memory_service(standalone_config());
            cache.set(&key, &value, None).await;
            cache.get::<serde_json::Value>(&key).await
        });
        prop_assert_eq!(round_tripped, Some(value));
    }
}
