//! Scopes obtained without being entered are freed with their last handle.
//!
//! The live-scope count is process-wide, so this file holds a single test.

mod common;

use common::Shop;
use recache::prelude::*;
use recache::live_scope_count;

#[test]
fn test_dropped_derived_scopes_leave_the_live_count() {
    let shop = Shop::new();
    let scope = shop.scope();
    let order = scope.create("sale.order", &[("note", "initial".into())]).unwrap();
    let before = live_scope_count();

    for i in 0..200i64 {
        let request = scope.with_option("req", i);
        assert_eq!(request.get(&order, "note").unwrap(), Value::from("initial"));
    }
    assert_eq!(live_scope_count(), before);

    let held: Vec<Arc<Scope>> = (0..3i64).map(|i| scope.with_option("req", i)).collect();
    assert_eq!(live_scope_count(), before + held.len());
    drop(held);
    assert_eq!(live_scope_count(), before);
}
