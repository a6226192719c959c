#![allow(dead_code)]

use relgraph::prelude::*;

pub fn int(v: i64) -> Value {
    Value::BigInt(v)
}

/// Bands, albums, tracks and genres, with every model registered but no
/// associations declared.
pub fn music() -> (Registry, MemoryDatabase) {
    music_with(EngineConfig::default())
}

pub fn music_with(config: EngineConfig) -> (Registry, MemoryDatabase) {
    let registry = Registry::with_config(config);
    registry
        .register_model(ModelDef::new("Band").columns(["id", "name"]))
        .unwrap();
    registry
        .register_model(ModelDef::new("Album").columns(["id", "band_id", "title"]))
        .unwrap();
    registry
        .register_model(ModelDef::new("Track").columns(["id", "album_id", "position"]))
        .unwrap();
    registry
        .register_model(ModelDef::new("Genre").columns(["id", "name"]))
        .unwrap();

    let db = MemoryDatabase::new()
        .with_table(
            "bands",
            ["id", "name"],
            vec![vec![int(2), Value::from("Can")], vec![int(5), Value::from("Neu!")]],
        )
        .with_table(
            "albums",
            ["id", "band_id", "title"],
            vec![
                vec![int(1), int(2), Value::from("Tago Mago")],
                vec![int(2), int(2), Value::from("Ege Bamyasi")],
                vec![int(3), int(9), Value::from("Future Days")],
            ],
        )
        .with_table(
            "tracks",
            ["id", "album_id", "position"],
            vec![
                vec![int(10), int(1), int(1)],
                vec![int(11), int(1), int(2)],
                vec![int(12), int(2), int(1)],
            ],
        )
        .with_table(
            "genres",
            ["id", "name"],
            vec![
                vec![int(1), Value::from("krautrock")],
                vec![int(2), Value::from("experimental")],
            ],
        )
        .with_table(
            "albums_genres",
            ["album_id", "genre_id"],
            vec![
                vec![int(1), int(1)],
                vec![int(1), int(2)],
                vec![int(2), int(1)],
                vec![int(2), int(1)],
            ],
        );
    (registry, db)
}

/// Album -> tracks, Album -> band, Band -> albums, Track -> album and
/// Album <-> genres.
pub fn declare_all(registry: &Registry) {
    registry
        .associate(
            "Album",
            AssociationKind::OneToMany,
            "tracks",
            AssociationOptions::new().order(OrderBy::asc("position")),
        )
        .unwrap();
    registry
        .associate("Album", AssociationKind::ManyToOne, "band", AssociationOptions::new())
        .unwrap();
    registry
        .associate("Band", AssociationKind::OneToMany, "albums", AssociationOptions::new())
        .unwrap();
    registry
        .associate("Track", AssociationKind::ManyToOne, "album", AssociationOptions::new())
        .unwrap();
    registry
        .associate("Album", AssociationKind::ManyToMany, "genres", AssociationOptions::new())
        .unwrap();
    registry
        .associate("Genre", AssociationKind::ManyToMany, "albums", AssociationOptions::new())
        .unwrap();
}

pub fn id(record: &RecordRef) -> i64 {
    record
        .get("id")
        .and_then(|v| v.as_i64())
        .expect("record has an integer id")
}

pub fn ids(value: &AssociationValue) -> Vec<i64> {
    value.records().iter().map(id).collect()
}

/// Loaded ids of `association` on each record, in order.
pub fn loaded(records: &[RecordRef], association: &str) -> Vec<Vec<i64>> {
    records
        .iter()
        .map(|r| {
            ids(&r
                .association(association)
                .expect("association is loaded"))
        })
        .collect()
}

pub fn find(records: &[RecordRef], wanted: i64) -> RecordRef {
    records
        .iter()
        .find(|r| id(r) == wanted)
        .cloned()
        .expect("record present")
}
