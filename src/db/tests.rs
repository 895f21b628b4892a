use std::collections::HashMap;

use super::*;
use crate::engine::ONE_SHOT;
use crate::error::KvtError;
use crate::model::{NewTag, NewVertex, Value, Vid};

fn store() -> GraphStore {
    GraphStore::new(Config::default())
}

fn one_vertex(id: &str) -> Vec<NewVertex> {
    vec![NewVertex {
        id: Vid::from(id),
        tags: vec![NewTag {
            tag_id: 1,
            props: vec![Value::Str(id.to_owned())],
        }],
    }]
}

fn name_props() -> HashMap<u32, Vec<String>> {
    HashMap::from([(1, vec!["name".to_string()])])
}

#[test]
fn space_provisioning_is_idempotent() {
    let store = store();
    let first = store.ensure_space(9).expect("provision space");
    // A second store over the same engine sees the tables as already
    // existing and resolves the same ids.
    let other = GraphStore::with_engine(store.engine().clone(), Config::default());
    let second = other.ensure_space(9).expect("re-provision space");
    assert_eq!(first.vertices, second.vertices);
    assert_eq!(first.edges, second.edges);
    assert_eq!(first.indices, second.indices);

    let tables = store.engine().list_tables();
    let names: Vec<&str> = tables.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["vertices_space_9", "edges_space_9", "indices_space_9"]
    );
}

#[test]
fn add_vertices_writes_one_row_per_tag() {
    let store = store();
    let ctx = RequestContext::new(1);
    let resp = store
        .add_vertices(&ctx, &one_vertex("a"), &name_props(), false, false)
        .expect("add vertices");
    assert_eq!(resp.result.code, ResultCode::Succeeded);
    assert_eq!((resp.written, resp.skipped, resp.failed), (1, 0, 0));

    let tables = store.ensure_space(1).unwrap();
    assert!(store
        .engine()
        .get(ONE_SHOT, tables.vertices, b"v:1:0:a:1")
        .is_ok());
}

#[test]
fn if_not_exists_skips_present_rows() {
    let store = store();
    let ctx = RequestContext::new(1);
    store
        .add_vertices(&ctx, &one_vertex("a"), &name_props(), false, false)
        .expect("seed vertex");
    let resp = store
        .add_vertices(&ctx, &one_vertex("a"), &name_props(), true, false)
        .expect("retry with if_not_exists");
    assert_eq!((resp.written, resp.skipped, resp.failed), (0, 1, 0));
}

#[test]
fn unimplemented_surfaces_are_acknowledged() {
    let store = store();
    let ctx = RequestContext::new(1);
    assert!(matches!(
        store.update_vertex(&ctx, &Vid::from("a"), 1, &Default::default()),
        Err(KvtError::Unsupported("update_vertex"))
    ));
    assert!(matches!(
        store.lookup_index(&ctx, 1, "value"),
        Err(KvtError::Unsupported("lookup_index"))
    ));
}
