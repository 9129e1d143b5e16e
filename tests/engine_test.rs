//! End-to-end tests of [`AssetEngine`] over the local file system.

mod common;

use assettrack_core::{
    cache::DocumentInfoCache,
    codec::asset_doc::{read_transform_stamp, write_transform_stamp},
    engine::AssetEngine,
    event::AssetEvent,
    hash::hash_bytes,
    properties::{AssetGuid, ExistenceState, FileStat, TransformState},
};
use common::*;
use tempfile::TempDir;
use test_log::test;

#[test]
fn scan_registers_documents_and_hashes_dependencies() {
    let (_temp, root) = create_data_dir();
    let x = AssetGuid::new();
    let y = AssetGuid::new();
    write_file(&root, "textures/rock.png", b"pixels");
    write_asset(&root, "x.asset", &asset_doc(Some(&x), "quality = 1", &[], &[]));
    write_asset(
        &root,
        "meshes/y.asset",
        &asset_doc(
            Some(&y),
            "lod = 2",
            &[guid_dep(&x), path_dep("textures/rock.png")],
            &[],
        ),
    );
    write_asset(&root, ".trash/z.asset", &asset_doc(Some(&AssetGuid::new()), "", &[], &[]));
    write_file(&root, "readme.txt", b"not an asset");

    let (engine, _rx) = open_engine(&root);
    assert_eq!(engine.scan_data_directories(), 2);
    engine.process_all();

    let x_info = engine.get_asset(&x).unwrap();
    let y_info = engine.get_asset(&y).unwrap();
    assert_eq!(y_info.path, "meshes/y.asset");
    assert_eq!(
        y_info.asset_hash,
        y_info
            .info
            .settings_hash
            .wrapping_add(x_info.asset_hash)
            .wrapping_add(hash_bytes(b"pixels"))
    );
    assert_eq!(
        engine.assets_in_state(TransformState::NeedsTransform),
        [x, y].into_iter().collect()
    );
    assert!(engine.check_invariants().is_empty());
    engine.shutdown().unwrap();
}

#[test]
fn stamped_asset_is_up_to_date_until_its_inputs_change() {
    let (_temp, root) = create_data_dir();
    let x = AssetGuid::new();
    let texture = write_file(&root, "rock.png", b"v1");
    let path = write_asset(
        &root,
        "x.asset",
        &asset_doc(Some(&x), "quality = 1", &[path_dep("rock.png")], &[]),
    );

    let (engine, _rx) = open_engine(&root);
    engine.scan_data_directories();
    engine.process_all();
    let info = engine.get_asset(&x).unwrap();
    assert_eq!(info.transform_state, TransformState::NeedsTransform);

    write_transform_stamp(&path, info.asset_hash, info.thumb_hash).unwrap();
    assert_eq!(
        read_transform_stamp(&path).unwrap().asset_hash,
        info.asset_hash
    );
    assert_eq!(
        engine.report_transform_result(&x, Ok(())).unwrap(),
        TransformState::UpToDate
    );

    write_file(&root, "rock.png", b"v2");
    engine.notify_file_changed(&texture).unwrap();
    engine.process_all();
    assert_eq!(engine.get_transform_state(&x), TransformState::NeedsTransform);
    engine.shutdown().unwrap();
}

#[test]
fn copied_document_is_rewritten_with_a_new_identity() {
    let (_temp, root) = create_data_dir();
    let x = AssetGuid::new();
    let doc = asset_doc(Some(&x), "quality = 1", &[], &[]);
    write_asset(&root, "x.asset", &doc);

    let (engine, _rx) = open_engine(&root);
    engine.scan_data_directories();
    let copy = write_asset(&root, "x_copy.asset", &doc);
    engine.notify_file_changed(&copy).unwrap();

    let replacement = x.derive_replacement("x_copy.asset");
    let rewritten = std::fs::read_to_string(&copy).unwrap();
    assert!(rewritten.contains(&replacement.to_string()));
    assert!(rewritten.contains("quality = 1"));
    assert!(engine.asset_at(&copy).is_none());

    assert_eq!(engine.process_pending_changes(), 1);
    assert_eq!(engine.asset_at(&copy).unwrap().guid, replacement);
    assert_eq!(engine.asset_at(&root.join("x.asset")).unwrap().guid, x);
    engine.shutdown().unwrap();
}

#[test]
fn renamed_document_keeps_its_dependents() {
    let (_temp, root) = create_data_dir();
    let x = AssetGuid::new();
    let y = AssetGuid::new();
    let old_path = write_asset(&root, "x.asset", &asset_doc(Some(&x), "", &[], &[]));
    write_asset(&root, "y.asset", &asset_doc(Some(&y), "", &[], &[guid_dep(&x)]));

    let (engine, mut rx) = open_engine(&root);
    engine.scan_data_directories();
    engine.process_all();
    drain_events(&mut rx);

    let new_path = root.join("moved").join("x.asset");
    std::fs::create_dir_all(new_path.parent().unwrap()).unwrap();
    std::fs::rename(&old_path, &new_path).unwrap();
    // Watchers commonly report the removal before the creation.
    engine.handle_file_removed(&old_path);
    engine.notify_file_changed(&new_path).unwrap();

    let info = engine.get_asset(&x).unwrap();
    assert_eq!(info.path, "moved/x.asset");
    assert_eq!(info.existence_state, ExistenceState::FileMoved);
    assert!(engine.dependents_of(&new_path).contains(&y));
    let events = drain_events(&mut rx);
    assert!(events.contains(&AssetEvent::ExistenceChanged(x, ExistenceState::FileRemoved)));
    assert!(events.contains(&AssetEvent::ExistenceChanged(x, ExistenceState::FileMoved)));

    engine.process_all();
    assert_eq!(engine.get_transform_state(&y), TransformState::NeedsTransform);
    assert!(engine.check_invariants().is_empty());
    engine.shutdown().unwrap();
}

#[test]
fn rescan_retires_vanished_documents() {
    let (_temp, root) = create_data_dir();
    let x = AssetGuid::new();
    let y = AssetGuid::new();
    let x_path = write_asset(&root, "x.asset", &asset_doc(Some(&x), "", &[], &[]));
    let y_path = write_asset(&root, "y.asset", &asset_doc(Some(&y), "", &[guid_dep(&x)], &[]));

    let (engine, _rx) = open_engine(&root);
    engine.scan_data_directories();
    engine.process_all();

    std::fs::remove_file(&x_path).unwrap();
    assert_eq!(engine.scan_data_directories(), 1);
    assert!(engine.get_asset(&x).unwrap().is_removed());
    engine.process_all();
    assert_eq!(
        engine.get_transform_state(&y),
        TransformState::MissingTransformDependency
    );
    assert!(engine.reap_removed().is_empty());

    std::fs::remove_file(&y_path).unwrap();
    engine.scan_data_directories();
    let mut reaped = engine.reap_removed();
    reaped.sort();
    let mut expected = vec![x, y];
    expected.sort();
    assert_eq!(reaped, expected);
    assert!(engine.assets().is_empty());
    engine.shutdown().unwrap();
}

#[test]
fn injected_identity_is_stable_across_sessions() {
    let (_temp, root) = create_data_dir();
    let path = write_asset(&root, "anon.asset", &asset_doc(None, "quality = 3", &[], &[]));

    let (engine, _rx) = open_engine(&root);
    engine.scan_data_directories();
    let guid = engine.asset_at(&path).unwrap().guid;
    assert!(!guid.is_nil());
    assert!(std::fs::read_to_string(&path)
        .unwrap()
        .contains(&guid.to_string()));
    engine.shutdown().unwrap();

    let (engine, _rx) = open_engine(&root);
    engine.scan_data_directories();
    assert_eq!(engine.asset_at(&path).unwrap().guid, guid);
    engine.shutdown().unwrap();
}

#[test]
fn document_cache_is_persisted_on_shutdown() {
    let (_temp, root) = create_data_dir();
    let x = AssetGuid::new();
    let y = AssetGuid::new();
    write_asset(&root, "x.asset", &asset_doc(Some(&x), "", &[], &[]));
    write_asset(&root, "y.asset", &asset_doc(Some(&y), "", &[guid_dep(&x)], &[]));
    let cache_path = root.join(".assettrack").join("documents.json");

    let (engine, _rx) = open_engine(&root);
    engine.scan_data_directories();
    engine.shutdown().unwrap();
    // A second shutdown is a no-op.
    engine.shutdown().unwrap();
    assert!(engine.get_next_to_update().is_none());

    let cache = DocumentInfoCache::load(&cache_path).unwrap();
    assert_eq!(cache.len(), 2);

    let (engine, _rx) = open_engine(&root);
    engine.scan_data_directories();
    engine.process_all();
    assert_eq!(engine.get_transform_state(&y), TransformState::NeedsTransform);
    engine.shutdown().unwrap();
}

#[test]
fn corrupt_document_cache_is_discarded() {
    let (_temp, root) = create_data_dir();
    let x = AssetGuid::new();
    write_asset(&root, "x.asset", &asset_doc(Some(&x), "", &[], &[]));
    write_file(&root, ".assettrack/documents.json", b"{ not json");

    let (engine, _rx) = open_engine(&root);
    assert_eq!(engine.scan_data_directories(), 1);
    assert!(engine.get_asset(&x).is_some());
    engine.shutdown().unwrap();
}

#[test]
fn path_dependencies_match_the_file_in_any_data_directory() {
    let temp = TempDir::new().unwrap();
    let roots = ["first", "second"].map(|name| {
        let root = temp.path().join(name);
        std::fs::create_dir(&root).unwrap();
        root.canonicalize().unwrap()
    });
    let [first, second] = roots.clone();
    let a = AssetGuid::new();
    let a_path = write_asset(
        &first,
        "a.asset",
        &asset_doc(Some(&a), "", &[path_dep("tex/a.png")], &[]),
    );
    let mut config = test_config(&first);
    config.data_dirs = roots.to_vec();
    let engine = AssetEngine::open(config, None).unwrap();
    engine.scan_data_directories();
    engine.process_all();
    assert_eq!(
        engine.get_transform_state(&a),
        TransformState::MissingTransformDependency
    );

    let texture = write_file(&second, "tex/a.png", b"pixels");
    engine.notify_file_changed(&texture).unwrap();
    assert!(engine.stale_assets().contains(&a));
    engine.process_all();
    let info = engine.get_asset(&a).unwrap();
    assert_eq!(info.transform_state, TransformState::NeedsTransform);
    assert_eq!(
        info.asset_hash,
        info.info.settings_hash.wrapping_add(hash_bytes(b"pixels"))
    );
    assert!(engine.dependents_of(&texture).contains(&a));
    assert!(engine.dependents_of(&first.join("tex/a.png")).contains(&a));

    let stat = FileStat::from(&std::fs::metadata(&a_path).unwrap());
    engine.ensure_asset_updated(&a_path, stat, true).unwrap();
    std::fs::remove_file(&a_path).unwrap();
    engine.handle_file_removed(&a_path);
    assert_eq!(engine.reap_removed(), vec![a]);
    assert!(engine.dependents_of(&texture).is_empty());
    assert!(engine.dependents_of(&first.join("tex/a.png")).is_empty());
    assert!(engine.check_invariants().is_empty());
    engine.shutdown().unwrap();
}

#[test]
fn scan_continues_past_unreadable_documents() {
    let (_temp, root) = create_data_dir();
    let x = AssetGuid::new();
    let broken = write_file(&root, "broken.asset", b"guid = [unterminated");
    write_asset(&root, "x.asset", &asset_doc(Some(&x), "", &[], &[]));

    let (engine, _rx) = open_engine(&root);
    assert_eq!(engine.scan_data_directories(), 2);
    assert!(engine.asset_at(&broken).is_none());
    assert!(engine.get_asset(&x).is_some());
    engine.shutdown().unwrap();
}
