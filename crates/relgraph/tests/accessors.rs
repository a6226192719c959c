mod common;

use common::{declare_all, find, id, ids, music, music_with};
use relgraph::prelude::*;
use relgraph::same_record;

#[test]
fn load_is_idempotent_without_reload() {
    let (registry, db) = music();
    declare_all(&registry);
    let albums = registry.dataset("Album").unwrap().all(&db).unwrap();
    let album = find(&albums, 1);
    let tracks = registry.association("Album", "tracks").unwrap();
    db.clear_log();

    let first = tracks.load(&album, &db, LoadOptions::new()).unwrap();
    assert_eq!(ids(&first), vec![10, 11]);
    assert_eq!(db.query_count(), 1);

    let second = tracks.load(&album, &db, LoadOptions::new()).unwrap();
    assert_eq!(db.query_count(), 1);
    assert!(first.same_as(&second));

    let reloaded = tracks
        .load(&album, &db, LoadOptions::new().reload(true))
        .unwrap();
    assert_eq!(db.query_count(), 2);
    assert_eq!(ids(&reloaded), vec![10, 11]);
}

#[test]
fn filtered_load_is_not_cached() {
    let (registry, db) = music();
    declare_all(&registry);
    let albums = registry.dataset("Album").unwrap().all(&db).unwrap();
    let album = find(&albums, 1);
    let tracks = registry.association("Album", "tracks").unwrap();

    let value = tracks
        .load(
            &album,
            &db,
            LoadOptions::new().filter(|ds| ds.where_eq("position", 2i64)),
        )
        .unwrap();
    assert_eq!(ids(&value), vec![11]);
    assert!(tracks.get(&album).is_none());
}

#[test]
fn many_to_one_load_and_dataset() {
    let (registry, db) = music();
    declare_all(&registry);
    let albums = registry.dataset("Album").unwrap().all(&db).unwrap();
    let band = registry.association("Album", "band").unwrap();

    let ds = band.dataset(&find(&albums, 2)).unwrap();
    assert_eq!(ds.query().limit, Some(1));
    let loaded = ds.all(&db).unwrap();
    assert_eq!(loaded.iter().map(id).collect::<Vec<_>>(), vec![2]);

    let value = band.load(&find(&albums, 3), &db, LoadOptions::new()).unwrap();
    assert!(value.is_none());
    assert!(band.get(&find(&albums, 3)).is_some());
}

#[test]
fn many_to_many_dataset_goes_through_join_table() {
    let (registry, db) = music();
    declare_all(&registry);
    let albums = registry.dataset("Album").unwrap().all(&db).unwrap();
    let genres = registry.association("Album", "genres").unwrap();

    let ds = genres.dataset(&find(&albums, 1)).unwrap();
    let (sql, _) = ds.to_sql();
    assert!(sql.contains("INNER JOIN \"albums_genres\""), "{sql}");
    let found = ds.all(&db).unwrap();
    assert_eq!(found.iter().map(id).collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn set_wires_and_unwires_reciprocal() {
    let (registry, db) = music();
    declare_all(&registry);
    let albums = registry.dataset("Album").unwrap().all(&db).unwrap();
    let tracks = registry.dataset("Track").unwrap().all(&db).unwrap();
    let album = find(&albums, 1);
    let track = find(&tracks, 10);

    let handle = registry.association("Track", "album").unwrap();
    assert!(handle.set(&track, Some(album.clone())).unwrap());
    let current = handle.get(&track).unwrap().one().unwrap();
    assert!(same_record(&current, &album));

    assert!(handle.set(&track, None).unwrap());
    assert!(handle.get(&track).unwrap().is_none());
}

#[test]
fn add_and_remove_on_loaded_collection() {
    let (registry, db) = music();
    declare_all(&registry);
    let albums = registry.dataset("Album").unwrap().eager("tracks").all(&db).unwrap();
    let tracks = registry.dataset("Track").unwrap().all(&db).unwrap();
    let album = find(&albums, 2);
    let handle = registry.association("Album", "tracks").unwrap();

    let stray = find(&tracks, 10);
    assert!(handle.add(&album, &stray).unwrap());
    let ids_after_add = ids(&handle.get(&album).unwrap());
    assert_eq!(ids_after_add, vec![12, 10]);
    let back = stray.association("album").unwrap().one().unwrap();
    assert!(same_record(&back, &album));

    assert!(handle.remove(&album, &stray).unwrap());
    assert_eq!(ids(&handle.get(&album).unwrap()), vec![12]);
}

#[test]
fn scalar_ops_are_rejected_on_collections() {
    let (registry, db) = music();
    declare_all(&registry);
    let albums = registry.dataset("Album").unwrap().all(&db).unwrap();
    let handle = registry.association("Album", "tracks").unwrap();

    let err = handle.set(&albums[0], None).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn vetoing_callback_raises_by_default() {
    let (registry, db) = music();
    registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "tracks",
            AssociationOptions::new().before_add(|_, _| false),
        )
        .unwrap();
    let albums = registry.dataset("Album").unwrap().eager("tracks").all(&db).unwrap();
    let tracks = registry.dataset("Track").unwrap().all(&db).unwrap();
    let album = find(&albums, 3);
    let handle = registry.association("Album", "tracks").unwrap();

    let err = handle.add(&album, &tracks[0]).unwrap_err();
    assert!(err.is_callback_abort());
    assert!(handle.get(&album).unwrap().is_empty());
}

#[test]
fn vetoing_callback_can_return_false() {
    let (registry, db) = music_with(EngineConfig::new().abort_policy(AbortPolicy::ReturnFalse));
    registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "tracks",
            AssociationOptions::new().before_add(|_, _| false),
        )
        .unwrap();
    let albums = registry.dataset("Album").unwrap().eager("tracks").all(&db).unwrap();
    let tracks = registry.dataset("Track").unwrap().all(&db).unwrap();
    let album = find(&albums, 3);
    let handle = registry.association("Album", "tracks").unwrap();

    assert!(!handle.add(&album, &tracks[0]).unwrap());
    assert!(handle.get(&album).unwrap().is_empty());
}

#[test]
fn clear_associations_forces_a_new_query() {
    let (registry, db) = music();
    declare_all(&registry);
    let albums = registry.dataset("Album").unwrap().eager("band").all(&db).unwrap();
    let album = find(&albums, 1);
    let band = registry.association("Album", "band").unwrap();
    db.clear_log();

    band.load(&album, &db, LoadOptions::new()).unwrap();
    assert_eq!(db.query_count(), 0);

    album.clear_associations();
    assert!(band.get(&album).is_none());
    band.load(&album, &db, LoadOptions::new()).unwrap();
    assert_eq!(db.query_count(), 1);
}

#[test]
fn registration_by_kind_name() {
    let (registry, _db) = music();
    registry
        .register("Album", "one_to_many", "tracks", AssociationOptions::new())
        .unwrap();
    assert_eq!(
        registry.resolve("Album", "tracks").unwrap().kind(),
        AssociationKind::OneToMany
    );

    let err = registry
        .register("Album", "has_many", "songs", AssociationOptions::new())
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(registry.resolve("Album", "songs").is_none());
}
