#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{fields, harness};
use proptest::prelude::*;
use recorrido_admin::blob::relocate_key;
use recorrido_admin::migration::{run_migration, MigrationOptions};
use serde_json::json;

proptest! {
    #[test]
    fn rewrite_swaps_only_the_collection_segment(
        doc in "[A-Za-z0-9_-]{1,20}",
        file in "[A-Za-z0-9_. -]{1,24}",
    ) {
        let suffix = format!("{doc}/{file}");
        let rewritten = relocate_key(&format!("places/{suffix}"), "places", "estaciones");
        prop_assert_eq!(rewritten, Some(format!("estaciones/{suffix}")));
    }

    #[test]
    fn paths_outside_the_source_prefix_are_untouched(path in "[a-z]{1,12}/[a-z0-9/]{0,20}") {
        prop_assume!(!path.starts_with("places/"));
        prop_assert_eq!(relocate_key(&path, "places", "estaciones"), None);
    }

    #[test]
    fn sibling_collections_sharing_a_prefix_do_not_match(suffix in "[a-z0-9]{1,10}/x.jpg") {
        let path = format!("places_old/{suffix}");
        prop_assert_eq!(relocate_key(&path, "places", "estaciones"), None);
    }
}

#[tokio::test]
async fn every_image_path_in_a_record_is_rewritten() {
    let h = harness();
    h.documents.insert(
        "places",
        "B",
        fields(json!({
            "imagenes": [
                {"url": "u1", "path": "places/B/one.jpg", "alt": "1"},
                {"url": "u2", "path": "places/B/nested/two.png", "alt": "2", "width": 640}
            ]
        })),
    );
    run_migration(&h.session, &MigrationOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(
        h.documents.fields("estaciones", "B").unwrap()["imagenes"],
        json!([
            {"url": "u1", "path": "estaciones/B/one.jpg", "alt": "1"},
            {"url": "u2", "path": "estaciones/B/nested/two.png", "alt": "2", "width": 640}
        ])
    );
}
