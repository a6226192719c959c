mod common;

use common::{declare_all, find, id, ids, int, loaded, music, music_with};
use relgraph::prelude::*;
use relgraph::{Error, same_record};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn one_to_many_groups_tracks_by_album() {
    let (registry, db) = music();
    declare_all(&registry);

    let albums = registry
        .dataset("Album")
        .unwrap()
        .order_by(OrderBy::asc("id"))
        .eager("tracks")
        .all(&db)
        .unwrap();

    assert_eq!(db.query_count(), 2);
    assert_eq!(loaded(&albums, "tracks"), vec![vec![10, 11], vec![12], vec![]]);
    let empty = albums[2].association("tracks").unwrap();
    assert!(empty.is_many());
}

#[test]
fn many_to_one_shares_one_instance() {
    let (registry, db) = music();
    declare_all(&registry);

    let albums = registry
        .dataset("Album")
        .unwrap()
        .order_by(OrderBy::asc("id"))
        .eager("band")
        .all(&db)
        .unwrap();

    let first = albums[0].association("band").unwrap().one().unwrap();
    let second = albums[1].association("band").unwrap().one().unwrap();
    assert!(same_record(&first, &second));
    assert_eq!(id(&first), 2);
    // Band 9 does not exist.
    assert!(albums[2].association("band").unwrap().is_none());
}

#[test]
fn composite_key_with_null_gets_empty_list() {
    let registry = Registry::new();
    registry
        .register_model(ModelDef::new("Rack").columns(["a", "b", "label"]).primary_key(["a", "b"]))
        .unwrap();
    registry
        .register_model(ModelDef::new("Slot").columns(["id", "rack_a", "rack_b"]))
        .unwrap();
    registry
        .associate(
            "Rack",
            AssociationKind::OneToMany,
            "slots",
            AssociationOptions::new().keys(["rack_a", "rack_b"]),
        )
        .unwrap();
    let db = MemoryDatabase::new()
        .with_table(
            "racks",
            ["a", "b", "label"],
            vec![
                vec![int(5), Value::Null, Value::from("loose")],
                vec![int(5), int(1), Value::from("top")],
            ],
        )
        .with_table(
            "slots",
            ["id", "rack_a", "rack_b"],
            vec![vec![int(100), int(5), int(1)], vec![int(101), int(5), Value::Null]],
        );

    let racks = registry.dataset("Rack").unwrap().eager("slots").all(&db).unwrap();

    assert_eq!(loaded(&racks, "slots"), vec![vec![], vec![100]]);
    let sql = db.queries().pop().unwrap();
    assert!(sql.contains("(\"slots\".\"rack_a\", \"slots\".\"rack_b\") IN"), "{sql}");
}

#[test]
fn slice_limit_is_applied_per_owner() {
    let (registry, db) = music();
    registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "opener",
            AssociationOptions::new()
                .target("Track")
                .order(OrderBy::asc("position"))
                .limit(1),
        )
        .unwrap();

    let albums = registry
        .dataset("Album")
        .unwrap()
        .order_by(OrderBy::asc("id"))
        .eager("opener")
        .all(&db)
        .unwrap();

    // One batch query without a LIMIT; the window is applied per album.
    let sql = db.queries().pop().unwrap();
    assert!(!sql.contains("LIMIT"), "{sql}");
    assert_eq!(loaded(&albums, "opener"), vec![vec![10], vec![12], vec![]]);
}

#[test]
fn window_function_limit() {
    let (registry, db) = music();
    registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "closer",
            AssociationOptions::new()
                .target("Track")
                .order(OrderBy::desc("position"))
                .limit(1)
                .eager_limit_strategy(EagerLimitStrategy::WindowFunction),
        )
        .unwrap();

    let albums = registry
        .dataset("Album")
        .unwrap()
        .order_by(OrderBy::asc("id"))
        .eager("closer")
        .all(&db)
        .unwrap();

    let sql = db.queries().pop().unwrap();
    assert!(sql.contains("ROW_NUMBER() OVER (PARTITION BY \"tracks\".\"album_id\""), "{sql}");
    assert_eq!(loaded(&albums, "closer"), vec![vec![11], vec![12], vec![]]);
}

#[test]
fn distinct_on_for_one_to_one() {
    let (registry, db) = music();
    registry
        .associate(
            "Album",
            AssociationKind::OneToOne,
            "first_track",
            AssociationOptions::new()
                .target("Track")
                .order(OrderBy::asc("position"))
                .eager_limit_strategy(EagerLimitStrategy::DistinctOn),
        )
        .unwrap();

    let albums = registry
        .dataset("Album")
        .unwrap()
        .order_by(OrderBy::asc("id"))
        .eager("first_track")
        .all(&db)
        .unwrap();

    let sql = db.queries().pop().unwrap();
    assert!(sql.contains("DISTINCT ON (\"tracks\".\"album_id\")"), "{sql}");
    assert_eq!(loaded(&albums, "first_track"), vec![vec![10], vec![12], vec![]]);
}

#[test]
fn distinct_on_is_rejected_for_collections() {
    let (registry, _db) = music();
    let err = registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "tracks",
            AssociationOptions::new()
                .limit(1)
                .eager_limit_strategy(EagerLimitStrategy::DistinctOn),
        )
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(registry.resolve("Album", "tracks").is_none());
}

#[test]
fn many_to_many_pairs_are_unique() {
    let (registry, db) = music();
    declare_all(&registry);

    let albums = registry
        .dataset("Album")
        .unwrap()
        .order_by(OrderBy::asc("id"))
        .eager("genres")
        .all(&db)
        .unwrap();

    // albums_genres repeats (2, 1).
    assert_eq!(loaded(&albums, "genres"), vec![vec![1, 2], vec![1], vec![]]);
    let krautrock_a = albums[0].association("genres").unwrap().records()[0].clone();
    let krautrock_b = albums[1].association("genres").unwrap().records()[0].clone();
    assert!(same_record(&krautrock_a, &krautrock_b));
    assert!(krautrock_a.get("x_foreign_key_0_x").is_none());
}

#[test]
fn nested_includes_load_one_query_per_level() {
    let (registry, db) = music();
    declare_all(&registry);

    let bands = registry
        .dataset("Band")
        .unwrap()
        .eager_path("albums.tracks")
        .all(&db)
        .unwrap();

    assert_eq!(db.query_count(), 3);
    let can = find(&bands, 2);
    let albums = can.association("albums").unwrap().records();
    assert_eq!(loaded(&albums, "tracks"), vec![vec![10, 11], vec![12]]);
    assert!(find(&bands, 5).association("albums").unwrap().is_empty());
}

#[test]
fn reciprocal_points_back_to_owner() {
    let (registry, db) = music();
    declare_all(&registry);

    let albums = registry.dataset("Album").unwrap().eager("tracks").all(&db).unwrap();
    let album = find(&albums, 1);
    for track in album.association("tracks").unwrap().records() {
        let back = track.association("album").unwrap().one().unwrap();
        assert!(same_record(&back, &album));
    }
}

#[test]
fn undefined_association_fails_before_eager_queries() {
    let (registry, db) = music();
    declare_all(&registry);

    let err = registry
        .dataset("Album")
        .unwrap()
        .eager("tracks")
        .eager("producers")
        .all(&db)
        .unwrap_err();

    assert!(err.is_undefined_association());
    // Only the albums query ran.
    assert_eq!(db.query_count(), 1);
}

#[test]
fn eager_can_be_disallowed() {
    let (registry, db) = music();
    registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "tracks",
            AssociationOptions::new().allow_eager(false),
        )
        .unwrap();

    let err = registry.dataset("Album").unwrap().eager("tracks").all(&db).unwrap_err();
    match err {
        Error::UndefinedAssociation(e) => assert!(e.eager_disallowed),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failed_association_leaves_cache_unset() {
    let (registry, db) = music();
    declare_all(&registry);
    let albums = registry.dataset("Album").unwrap().all(&db).unwrap();
    db.fail_when_sql_contains("FROM \"tracks\"");

    let album = registry.model("Album").unwrap();
    let err = relgraph::load_includes(
        &registry,
        &album,
        &albums,
        &[Include::new("band"), Include::new("tracks")],
        &db,
    )
    .unwrap_err();

    assert!(matches!(err, Error::Query(_)));
    for album in &albums {
        assert!(album.association("band").is_some());
        assert!(album.association("tracks").is_none());
    }
}

#[test]
fn after_load_runs_once_per_owner() {
    let (registry, db) = music();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "tracks",
            AssociationOptions::new().after_load(move |_, value| {
                assert!(value.is_many());
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    registry.dataset("Album").unwrap().eager("tracks").all(&db).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn configured_default_strategy_applies() {
    let config = EngineConfig::from_json(
        r#"{"default_limit_strategy": "window_function", "abort_policy": "return_false"}"#,
    )
    .unwrap();
    assert_eq!(config.abort_policy, AbortPolicy::ReturnFalse);
    let (registry, db) = music_with(config);
    registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "opener",
            AssociationOptions::new()
                .target("Track")
                .order(OrderBy::asc("position"))
                .limit(1),
        )
        .unwrap();

    let albums = registry
        .dataset("Album")
        .unwrap()
        .order_by(OrderBy::asc("id"))
        .eager("opener")
        .all(&db)
        .unwrap();

    assert!(db.queries().pop().unwrap().contains("ROW_NUMBER()"));
    assert_eq!(loaded(&albums, "opener"), vec![vec![10], vec![12], vec![]]);
    assert_eq!(ids(&albums[0].association("opener").unwrap()), vec![10]);
}

#[test]
fn nested_includes_skip_sliced_away_records() {
    let (registry, db) = music();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "opener",
            AssociationOptions::new()
                .target("Track")
                .order(OrderBy::asc("position"))
                .limit(1),
        )
        .unwrap();
    registry
        .associate(
            "Track",
            AssociationKind::ManyToOne,
            "album",
            AssociationOptions::new().after_load(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    let albums = registry
        .dataset("Album")
        .unwrap()
        .order_by(OrderBy::asc("id"))
        .eager(Include::new("opener").nest(Include::new("album")))
        .all(&db)
        .unwrap();

    assert_eq!(loaded(&albums, "opener"), vec![vec![10], vec![12], vec![]]);
    // Track 11 is sliced away, so only tracks 10 and 12 load their album.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
