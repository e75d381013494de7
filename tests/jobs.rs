#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{documents_only, fields, harness, signer, BUCKET, FIXED_NOW};
use recorrido_admin::backfill::{run_backfill, BackfillOptions};
use recorrido_admin::blob::UrlExpiry;
use recorrido_admin::display_name::{sync_display_names, FALLBACK_DISPLAY_NAME};
use recorrido_admin::seed::{builtin_fixtures, seed_estaciones};
use recorrido_admin::storage_sync::sync_storage_urls;
use recorrido_admin::uploads::{upload_badges, upload_place_images, BadgeUpload, PlaceImageUpload};
use serde_json::{json, Value};
use tempfile::tempdir;

#[tokio::test]
async fn backfill_adds_missing_field_only() {
    let (documents, session) = documents_only();
    documents.insert("estaciones", "A", fields(json!({"name": "Plaza"})));
    documents.insert("estaciones", "B", fields(json!({"insigniaID": null})));
    documents.insert("estaciones", "C", fields(json!({"insigniaID": "gold"})));

    let report = run_backfill(&session, &BackfillOptions::default()).await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(
        documents.fields("estaciones", "A").unwrap(),
        fields(json!({"name": "Plaza", "insigniaID": null}))
    );
    assert_eq!(documents.fields("estaciones", "C").unwrap()["insigniaID"], json!("gold"));

    let again = run_backfill(&session, &BackfillOptions::default()).await.unwrap();
    assert_eq!(again.updated, 0);
}

#[tokio::test]
async fn backfill_dry_run_writes_nothing() {
    let (documents, session) = documents_only();
    documents.insert("estaciones", "A", fields(json!({})));
    let options = BackfillOptions {
        dry_run: true,
        ..BackfillOptions::default()
    };
    let report = run_backfill(&session, &options).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(documents.write_count(), 0);
}

#[tokio::test]
async fn display_names_follow_nombre() {
    let (documents, session) = documents_only();
    documents.insert("users", "u1", fields(json!({"displayName": "Old", "nombre": "Ana"})));
    documents.insert("users", "u2", fields(json!({"displayName": "Luis", "nombre": "Luis"})));
    documents.insert("users", "u3", fields(json!({})));

    let report = sync_display_names(&session, false).await.unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.updated, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.batches, 1);

    let u1 = documents.fields("users", "u1").unwrap();
    assert_eq!(u1["displayName"], json!("Ana"));
    assert_eq!(u1["updatedAt"], json!(FIXED_NOW));
    assert_eq!(
        documents.fields("users", "u3").unwrap()["displayName"],
        json!(FALLBACK_DISPLAY_NAME)
    );
    assert!(!documents.fields("users", "u2").unwrap().contains_key("updatedAt"));
}

#[tokio::test]
async fn display_names_commit_in_bounded_batches() {
    let (documents, session) = documents_only();
    for i in 0..1_001 {
        documents.insert("users", &format!("u{i:04}"), fields(json!({"nombre": format!("N{i}")})));
    }
    let report = sync_display_names(&session, false).await.unwrap();
    assert_eq!(report.updated, 1_001);
    assert_eq!(report.batches, 3);
    assert_eq!(documents.commit_count(), 3);
}

#[tokio::test]
async fn display_name_dry_run_and_empty_collection() {
    let (documents, session) = documents_only();
    let empty = sync_display_names(&session, false).await.unwrap();
    assert_eq!(empty.total, 0);

    documents.insert("users", "u1", fields(json!({"nombre": "Ana"})));
    let report = sync_display_names(&session, true).await.unwrap();
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].display_name, "Ana");
    assert_eq!(documents.commit_count(), 0);
    assert!(!documents.fields("users", "u1").unwrap().contains_key("displayName"));
}

#[tokio::test]
async fn storage_urls_point_at_public_media_endpoint() {
    let h = harness();
    h.blobs.put("users/u1/profile.jpg", b"p");
    h.blobs.put("users/u1/background.jpg", b"b");
    h.blobs.put("users/u2/other.jpg", b"o");
    h.blobs.put("users/u3/profile.jpg", b"p");
    h.documents.insert("users", "u1", fields(json!({"nombre": "Ana"})));
    h.documents.insert("users", "u2", fields(json!({})));

    let report = sync_storage_urls(&h.session, None).await.unwrap();
    assert_eq!(report.users, 3);
    assert_eq!(report.updated, 1);
    assert_eq!(report.without_images, 1);
    // u3 has a profile image but no user document
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].uid, "u3");
    assert_eq!(report.errors[0].code, "STORE/NOT_FOUND");

    let u1 = h.documents.fields("users", "u1").unwrap();
    assert_eq!(
        u1["photoURL"],
        json!(format!(
            "https://firebasestorage.googleapis.com/v0/b/{BUCKET}/o/users%2Fu1%2Fprofile.jpg?alt=media"
        ))
    );
    assert!(u1["backgroundURL"].as_str().unwrap().contains("background.jpg"));
    assert_eq!(u1["nombre"], json!("Ana"));
}

#[tokio::test]
async fn storage_sync_single_user() {
    let h = harness();
    h.blobs.put("users/u1/profile.jpg", b"p");
    h.blobs.put("users/u2/profile.jpg", b"p");
    h.documents.insert("users", "u1", fields(json!({})));
    h.documents.insert("users", "u2", fields(json!({})));

    let report = sync_storage_urls(&h.session, Some("u2")).await.unwrap();
    assert_eq!(report.users, 1);
    assert!(h.documents.fields("users", "u1").unwrap().get("photoURL").is_none());
    assert!(h.documents.fields("users", "u2").unwrap().get("photoURL").is_some());
}

#[tokio::test]
async fn place_images_are_uploaded_and_appended() {
    let h = harness();
    h.documents.insert(
        "estaciones",
        "P1",
        fields(json!({"name": "Plaza", "imagenes": [{"url": "u", "path": "estaciones/P1/old.jpg", "alt": "old"}]})),
    );
    let dir = tempdir().unwrap();
    let png = dir.path().join("front.png");
    std::fs::write(&png, b"png-bytes").unwrap();

    let request = PlaceImageUpload {
        collection: "estaciones".into(),
        place_id: "P1".into(),
        files: vec![png.clone(), dir.path().join("missing.jpg")],
        url_expiry: UrlExpiry::far_future(),
        dry_run: false,
    };
    let report = upload_place_images(&h.session, &request).await.unwrap();
    assert_eq!(report.uploaded.len(), 1);
    assert_eq!(report.missing.len(), 1);

    let uploaded = &report.uploaded[0];
    assert!(uploaded.path.starts_with("estaciones/P1/img_"));
    assert!(uploaded.path.ends_with("_0.png"));
    assert_eq!(h.blobs.object(&uploaded.path).as_deref(), Some(&b"png-bytes"[..]));
    assert_eq!(h.blobs.content_type(&uploaded.path).as_deref(), Some("image/png"));
    assert!(signer().verify(&uploaded.url));

    let doc = h.documents.fields("estaciones", "P1").unwrap();
    let images = doc["imagenes"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[1]["path"], json!(uploaded.path));
    assert_eq!(images[1]["alt"], json!("front.png"));
    assert_eq!(doc["updatedAt"], json!(FIXED_NOW));
    assert_eq!(doc["name"], json!("Plaza"));
}

#[tokio::test]
async fn badges_follow_mapping_and_skip_missing_files() {
    let h = harness();
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.png"), b"a").unwrap();

    let request = BadgeUpload::new(
        vec![("P1".into(), "a.png".into()), ("P2".into(), "missing.png".into())],
        dir.path(),
    );
    let report = upload_badges(&h.session, &request).await.unwrap();
    assert_eq!(report.uploaded.len(), 1);
    assert_eq!(report.missing.len(), 1);

    let doc = h.documents.fields("estaciones", "P1").unwrap();
    let image = &doc["imagenes"][0];
    assert_eq!(image["alt"], json!(""));
    assert!(image["path"].as_str().unwrap().starts_with("estaciones/P1/img_"));
    assert!(image["path"].as_str().unwrap().ends_with(".png"));
    assert!(h.documents.fields("estaciones", "P2").is_none());
}

#[tokio::test]
async fn badge_folder_must_exist() {
    let h = harness();
    let request = BadgeUpload::new(vec![], "/definitely/not/here");
    let err = upload_badges(&h.session, &request).await.unwrap_err();
    assert_eq!(err.code(), "INPUT/FOLDER_NOT_FOUND");
}

#[tokio::test]
async fn upload_dry_run_touches_nothing() {
    let h = harness();
    let dir = tempdir().unwrap();
    let file = dir.path().join("a.jpg");
    std::fs::write(&file, b"a").unwrap();
    let request = PlaceImageUpload {
        collection: "estaciones".into(),
        place_id: "P1".into(),
        files: vec![file],
        url_expiry: UrlExpiry::far_future(),
        dry_run: true,
    };
    let report = upload_place_images(&h.session, &request).await.unwrap();
    assert_eq!(report.uploaded.len(), 1);
    assert!(h.blobs.keys().is_empty());
    assert_eq!(h.documents.write_count(), 0);
}

#[tokio::test]
async fn seeding_creates_fixture_stations() {
    let (documents, session) = documents_only();
    let report = seed_estaciones(&session, None, builtin_fixtures().unwrap(), false)
        .await
        .unwrap();
    assert_eq!(report.created.len(), 3);

    let stations = documents.collection("estaciones");
    assert_eq!(stations.len(), 3);
    for station in stations.values() {
        assert_eq!(station["createdAt"], json!(FIXED_NOW));
        assert_eq!(station["updatedAt"], json!(FIXED_NOW));
        assert!(station["imagenes"].is_array());
    }
    let mut names: Vec<_> = stations
        .values()
        .filter_map(|s| s.get("name").and_then(Value::as_str))
        .collect();
    names.sort();
    assert_eq!(names, ["Cerro San Cristóbal", "La Moneda", "Plaza de Armas"]);
}

#[tokio::test]
async fn seeding_dry_run_creates_nothing() {
    let (documents, session) = documents_only();
    let report = seed_estaciones(&session, None, builtin_fixtures().unwrap(), true)
        .await
        .unwrap();
    assert_eq!(report.created.len(), 3);
    assert!(report.created.iter().all(|c| c.id.is_none()));
    assert!(documents.collection("estaciones").is_empty());
}
