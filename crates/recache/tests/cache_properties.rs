//! Read-through, invalidation, prefetch and error behavior of the cache.

mod common;

use common::{Shop, float, order_with_lines};
use recache::prelude::*;
use recache::Values;
use std::sync::atomic::Ordering;

fn row(name: &str) -> Values {
    Values::from([("name".to_string(), Value::from(name))])
}

// ============================================================================
// Read-through
// ============================================================================

#[test]
fn test_repeated_read_does_not_touch_the_store() {
    let shop = Shop::new();
    let id = shop.store.insert("res.partner", row("Azure")).unwrap();
    let scope = shop.scope();
    let partner = scope.record("res.partner", id).unwrap();

    assert_eq!(scope.get(&partner, "name").unwrap(), Value::from("Azure"));
    assert_eq!(shop.store.stats().reads, 1);
    assert_eq!(scope.get(&partner, "name").unwrap(), Value::from("Azure"));
    assert_eq!(shop.store.stats().reads, 1);
}

#[test]
fn test_first_read_prefetches_cached_siblings() {
    let shop = Shop::new();
    let first = shop.store.insert("res.partner", row("Azure")).unwrap();
    let second = shop.store.insert("res.partner", row("Deco")).unwrap();
    let scope = shop.scope();
    let partners = scope.browse("res.partner", [first, second]).unwrap();

    let names: Vec<Value> = partners
        .iter()
        .map(|partner| scope.get(&partner, "name").unwrap())
        .collect();
    assert_eq!(names, vec![Value::from("Azure"), Value::from("Deco")]);
    assert_eq!(shop.store.stats().reads, 1);
}

#[test]
fn test_prefetch_can_be_disabled() {
    let shop = Shop::with_config(EngineConfig::new().prefetch(false));
    let first = shop.store.insert("res.partner", row("Azure")).unwrap();
    let second = shop.store.insert("res.partner", row("Deco")).unwrap();
    let scope = shop.scope();
    let partners = scope.browse("res.partner", [first, second]).unwrap();

    for partner in partners.iter() {
        scope.get(&partner, "name").unwrap();
    }
    assert_eq!(shop.store.stats().reads, 2);
}

#[test]
fn test_cached_value_survives_until_invalidated() {
    let shop = Shop::new();
    let id = shop.store.insert("res.partner", row("Azure")).unwrap();
    let scope = shop.scope();
    let partner = scope.record("res.partner", id).unwrap();
    assert_eq!(scope.get(&partner, "name").unwrap(), Value::from("Azure"));

    shop.store.set("res.partner", id, "name", "Deco").unwrap();
    assert_eq!(scope.get(&partner, "name").unwrap(), Value::from("Azure"));

    scope.invalidate("res.partner", "name", Some(&[id])).unwrap();
    assert_eq!(scope.get(&partner, "name").unwrap(), Value::from("Deco"));
}

#[test]
fn test_invalidate_all_forces_fresh_reads() {
    let shop = Shop::new();
    let scope = shop.scope();
    let (order, _) = order_with_lines(&scope, "A", &[3.0]);

    shop.store.set("sale.order", order.id(), "note", "changed").unwrap();
    scope.invalidate_all();
    assert_eq!(scope.get(&order, "note").unwrap(), Value::from("changed"));
    assert_eq!(float(&scope.get(&order, "total").unwrap()), 3.0);
}

// ============================================================================
// Non-stored computed fields
// ============================================================================

#[test]
fn test_non_stored_field_is_computed_for_cached_siblings_in_one_pass() {
    let shop = Shop::new();
    let scope = shop.scope();
    let (first, _) = order_with_lines(&scope, "A", &[1.0, 2.0]);
    let (second, _) = order_with_lines(&scope, "B", &[3.0]);
    shop.reset_counters();

    assert_eq!(scope.get(&first, "line_count").unwrap(), Value::BigInt(2));
    assert_eq!(scope.get(&second, "line_count").unwrap(), Value::BigInt(1));
    assert_eq!(shop.count_passes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_non_stored_field_is_recomputed_after_a_dependency_changes() {
    let shop = Shop::new();
    let scope = shop.scope();
    let (order, _) = order_with_lines(&scope, "A", &[1.0]);
    assert_eq!(scope.get(&order, "line_count").unwrap(), Value::BigInt(1));

    scope
        .create("sale.line", &[("order_id", order.id().into()), ("amount", 2.0.into())])
        .unwrap();
    assert_eq!(scope.get(&order, "line_count").unwrap(), Value::BigInt(2));
}

#[test]
fn test_compute_that_assigns_nothing_is_an_error() {
    let registry = Registry::builder()
        .model(
            ModelBuilder::new("lazy")
                .field(FieldBuilder::integer("value").compute_with(&[], |_, _, _| Ok(()))),
        )
        .build()
        .unwrap();
    let store = Arc::new(MemoryStore::new(registry.schema().clone()));
    let scope = Connection::open(registry, store).scope(SUPERUSER_ID);
    let record = scope.create("lazy", &[]).unwrap();

    assert!(matches!(scope.get(&record, "value"), Err(Error::Unassigned(_))));
    assert!(matches!(scope.get(&record, "value"), Err(Error::Unassigned(_))));
}

#[test]
fn test_failed_stored_compute_stays_pending() {
    let registry = Registry::builder()
        .model(
            ModelBuilder::new("square")
                .field(FieldBuilder::integer("side"))
                .field(FieldBuilder::integer("area").store(true).compute_with(
                    &["side"],
                    |scope, field, records| {
                        for record in records.iter() {
                            let side = scope.get(&record, "side")?.as_i64().unwrap_or(0);
                            if side < 0 {
                                return Err(Error::Custom(format!("negative side {side}")));
                            }
                            scope.set_field(&record, field.id(), Value::from(side * side))?;
                        }
                        Ok(())
                    },
                )),
        )
        .build()
        .unwrap();
    let area = registry.field_by_name("square", "area").unwrap().id();
    let store = Arc::new(MemoryStore::new(registry.schema().clone()));
    let connection = Connection::with_config(
        registry,
        store,
        EngineConfig::new().recompute_on_write(false),
    );
    let scope = connection.scope(SUPERUSER_ID);

    let record = scope.create("square", &[("side", (-1).into())]).unwrap();
    assert!(matches!(scope.get(&record, "area"), Err(Error::Custom(_))));
    assert!(scope.recomputation().is_pending(area, record.id()));

    scope.set(&record, "side", 3).unwrap();
    assert_eq!(scope.get(&record, "area").unwrap(), Value::BigInt(9));
    assert!(!scope.recomputation().is_pending(area, record.id()));
}

// ============================================================================
// Access and consistency
// ============================================================================

#[test]
fn test_refused_record_raises_access_error_and_caches_nothing() {
    let shop = Shop::new();
    let visible = shop.store.insert("res.partner", row("Azure")).unwrap();
    let hidden = shop.store.insert("res.partner", row("Deco")).unwrap();
    shop.store.deny("res.partner", [hidden]);

    let scope = shop.scope();
    let partners = scope.browse("res.partner", [visible, hidden]).unwrap();
    let records: Vec<Record> = partners.iter().collect();

    assert_eq!(scope.get(&records[0], "name").unwrap(), Value::from("Azure"));
    let err = scope.get(&records[1], "name").unwrap_err();
    assert!(err.is_access(), "unexpected error: {err}");

    let dump = scope.dump();
    let cached = dump.get("res.partner").and_then(|records| records.get(&hidden));
    assert!(cached.is_none_or(|fields| !fields.contains_key("name")));

    // the superuser is not subject to the refusal
    let sudo = scope.sudo();
    assert_eq!(sudo.get(&records[1], "name").unwrap(), Value::from("Deco"));
}

#[test]
fn test_field_of_another_model_is_a_lookup_error() {
    let shop = Shop::new();
    let scope = shop.scope();
    let order = scope.create("sale.order", &[("note", "initial".into())]).unwrap();
    let partner_name = shop.registry.field_by_name("res.partner", "name").unwrap().id();
    shop.store.reset_stats();

    let read = scope.get_field(&order, partner_name);
    assert!(matches!(read, Err(Error::Lookup(_))), "unexpected result: {read:?}");
    let written = scope.set_field(&order, partner_name, "Azure".into());
    assert!(matches!(written, Err(Error::Lookup(_))), "unexpected result: {written:?}");

    assert_eq!(shop.store.stats().reads, 0);
    assert_eq!(shop.store.stats().writes, 0);
    assert_eq!(scope.get(&order, "note").unwrap(), Value::from("initial"));
}

#[test]
fn test_check_cache_reports_values_changed_behind_its_back() {
    let shop = Shop::new();
    let scope = shop.scope();
    let (order, _) = order_with_lines(&scope, "A", &[7.0]);
    scope.get(&order, "name").unwrap();
    scope.get(&order, "line_count").unwrap();

    scope.check_cache().unwrap();

    shop.store.set("sale.order", order.id(), "name", "renamed").unwrap();
    match scope.check_cache() {
        Err(Error::CacheInconsistency(err)) => {
            assert_eq!(err.entries.len(), 1);
            let entry = &err.entries[0];
            assert_eq!(entry.model, "sale.order");
            assert_eq!(entry.id, order.id());
            assert_eq!(entry.field, "name");
            assert_eq!(entry.cached, Value::from("A"));
            assert_eq!(entry.fetched, Value::from("renamed"));
        }
        other => panic!("expected an inconsistency, got {other:?}"),
    }
}

#[test]
fn test_dump_serializes_to_json() {
    let shop = Shop::new();
    let scope = shop.scope();
    let partner = scope.create("res.partner", &[("name", "Azure".into())]).unwrap();

    let json = serde_json::to_value(scope.dump()).unwrap();
    let name = &json["res.partner"][partner.id().to_string()]["name"];
    assert_eq!(name, &serde_json::json!({ "Text": "Azure" }));
}
