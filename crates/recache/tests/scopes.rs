//! Scopes, cross-scope invalidation and registry setup.

mod common;

use common::{Shop, USER};
use recache::prelude::*;
use recache::SetupErrorKind;
use std::thread;

// ============================================================================
// Scopes
// ============================================================================

#[test]
fn test_equal_identity_shares_one_scope() {
    let shop = Shop::new();
    let scope = shop.scope();
    assert!(Arc::ptr_eq(&scope, &shop.scope()));

    let sudo = scope.sudo();
    assert_eq!(sudo.uid(), SUPERUSER_ID);
    assert!(!Arc::ptr_eq(&scope, &sudo));
    assert!(Arc::ptr_eq(&sudo, &sudo.sudo()));

    let french = scope.with_option("lang", "fr_FR");
    assert_eq!(french.option("lang"), Some(&Value::from("fr_FR")));
    assert_eq!(french.uid(), USER);
    assert!(Arc::ptr_eq(&french, &scope.with_option("lang", "fr_FR")));
}

#[test]
fn test_entered_scopes_form_a_stack() {
    let shop = Shop::new();
    let scope = shop.scope();
    assert!(Scope::current().is_none());

    {
        let _outer = scope.enter();
        let sudo = scope.sudo();
        {
            let _inner = sudo.enter();
            assert_eq!(Scope::depth(), 2);
            assert!(Arc::ptr_eq(&Scope::current().unwrap(), &sudo));
        }
        assert_eq!(Scope::depth(), 1);
        assert!(Arc::ptr_eq(&Scope::current().unwrap(), &scope));
    }

    assert!(Scope::current().is_none());
    assert_eq!(Scope::depth(), 0);
}

#[test]
fn test_write_in_one_scope_invalidates_the_others() {
    let shop = Shop::new();
    let scope = shop.scope();
    let order = scope.create("sale.order", &[("note", "initial".into())]).unwrap();
    let sudo = scope.sudo();
    assert_eq!(sudo.get(&order, "note").unwrap(), Value::from("initial"));

    scope.set(&order, "note", "changed").unwrap();
    assert_eq!(sudo.get(&order, "note").unwrap(), Value::from("changed"));
}

#[test]
fn test_write_on_another_thread_invalidates_this_thread() {
    let shop = Shop::new();
    let scope = shop.scope();
    let order = scope.create("sale.order", &[("note", "initial".into())]).unwrap();
    assert_eq!(scope.get(&order, "note").unwrap(), Value::from("initial"));

    let connection = Arc::clone(&shop.connection);
    let id = order.id();
    thread::spawn(move || {
        let other = connection.scope(USER);
        let order = other.record("sale.order", id).unwrap();
        other.set(&order, "note", "from elsewhere").unwrap();
    })
    .join()
    .unwrap();

    shop.store.reset_stats();
    assert_eq!(scope.get(&order, "note").unwrap(), Value::from("from elsewhere"));
    assert_eq!(shop.store.stats().reads, 1);
}

#[test]
fn test_scopes_of_other_registries_are_untouched() {
    let first = Shop::new();
    let second = Shop::new();
    let here = first.scope();
    let there = second.scope();

    let mine = here.create("sale.order", &[("note", "mine".into())]).unwrap();
    let theirs = there.create("sale.order", &[("note", "theirs".into())]).unwrap();
    assert_eq!(there.get(&theirs, "note").unwrap(), Value::from("theirs"));

    second.store.reset_stats();
    here.set(&mine, "note", "changed").unwrap();
    assert_eq!(there.get(&theirs, "note").unwrap(), Value::from("theirs"));
    assert_eq!(second.store.stats().reads, 0);
}

// ============================================================================
// Registry setup
// ============================================================================

#[test]
fn test_related_field_of_another_type_is_rejected() {
    let result = Registry::builder()
        .model(ModelBuilder::new("res.partner").field(FieldBuilder::char("name")))
        .model(
            ModelBuilder::new("sale.order")
                .field(FieldBuilder::many2one("partner_id", "res.partner"))
                .field(FieldBuilder::integer("partner_name").related("partner_id.name")),
        )
        .build();

    match result {
        Err(Error::TypeConsistency(err)) => {
            assert_eq!(err.field, "sale.order.partner_name");
            assert_eq!(err.target, "res.partner.name");
        }
        other => panic!("expected a type consistency error, got {other:?}"),
    }
}

#[test]
fn test_unknown_dependency_is_rejected() {
    let result = Registry::builder()
        .model(
            ModelBuilder::new("sale.order").field(
                FieldBuilder::float("total").compute_with(&["line_ids.amount"], |_, _, _| Ok(())),
            ),
        )
        .build();

    assert!(matches!(result, Err(Error::Setup(ref e)) if e.kind == SetupErrorKind::UnknownField));
}

#[test]
fn test_field_description_serializes_to_json() {
    let shop = Shop::new();
    let registry = &shop.registry;

    let related = registry.field_by_name("sale.order", "partner_name").unwrap();
    let json = serde_json::to_value(related.description()).unwrap();
    assert_eq!(json["type"], "char");
    assert_eq!(json["store"], false);
    assert_eq!(json["related"], "partner_id.name");
    assert_eq!(json["depends"], serde_json::json!(["partner_id.name"]));
    assert_eq!(json["help"], "Display name");

    let lines = registry.field_by_name("sale.order", "line_ids").unwrap();
    let json = serde_json::to_value(lines.description()).unwrap();
    assert_eq!(json["type"], "one2many");
    assert_eq!(json["relation"], "sale.line");
    assert_eq!(json["relation_field"], "order_id");
    assert!(json.get("related").is_none());
}
