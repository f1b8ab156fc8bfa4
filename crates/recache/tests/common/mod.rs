//! Shared models for the integration tests: partners, orders and lines.

#![allow(dead_code)]

use recache::prelude::*;
use recache::{RecordId, Uid};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A regular (non-superuser) principal.
pub const USER: Uid = 2;

pub struct Shop {
    pub registry: Arc<Registry>,
    pub store: Arc<MemoryStore>,
    pub connection: Arc<Connection>,
    /// Records passed to each run of `compute_total`
    pub total_batches: Arc<Mutex<Vec<Vec<RecordId>>>>,
    /// Runs of the `line_count` compute
    pub count_passes: Arc<AtomicUsize>,
}

impl Shop {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let total_batches = Arc::new(Mutex::new(Vec::new()));
        let count_passes = Arc::new(AtomicUsize::new(0));

        let batches = Arc::clone(&total_batches);
        let passes = Arc::clone(&count_passes);
        let registry = Registry::builder()
            .model(
                ModelBuilder::new("res.partner")
                    .field(FieldBuilder::char("name").help("Display name"))
                    .field(FieldBuilder::one2many("order_ids", "sale.order", "partner_id")),
            )
            .model(
                ModelBuilder::new("sale.order")
                    .field(FieldBuilder::char("name"))
                    .field(FieldBuilder::selection("state").default("draft"))
                    .field(FieldBuilder::char("note"))
                    .field(FieldBuilder::many2one("partner_id", "res.partner"))
                    .field(FieldBuilder::char("partner_name").related("partner_id.name"))
                    .field(FieldBuilder::char("partner_label").compute_with(&["partner_id.name"], partner_label))
                    .field(FieldBuilder::one2many("line_ids", "sale.line", "order_id"))
                    .field(FieldBuilder::float("total").compute("compute_total").store(true))
                    .field(FieldBuilder::integer("line_count").compute_with(
                        &["line_ids"],
                        move |scope, field, records| {
                            passes.fetch_add(1, Ordering::SeqCst);
                            for order in records.iter() {
                                let count = scope.relation(&order, "line_ids")?.len();
                                scope.set_field(&order, field.id(), Value::from(count as i64))?;
                            }
                            Ok(())
                        },
                    ))
                    .method("compute_total", &["line_ids.amount"], move |scope, _field, records| {
                        batches.lock().unwrap().push(records.ids());
                        for order in records.iter() {
                            let mut total = 0.0;
                            for line in scope.relation(&order, "line_ids")?.iter() {
                                total += scope.get(&line, "amount")?.as_f64().unwrap_or(0.0);
                            }
                            scope.set(&order, "total", total)?;
                        }
                        Ok(())
                    }),
            )
            .model(
                ModelBuilder::new("sale.line")
                    .field(FieldBuilder::many2one("order_id", "sale.order"))
                    .field(FieldBuilder::float("amount")),
            )
            .build()
            .expect("shop registry");

        let store = Arc::new(MemoryStore::new(registry.schema().clone()));
        let connection = Connection::with_config(Arc::clone(&registry), store.clone(), config);
        Self {
            registry,
            store,
            connection,
            total_batches,
            count_passes,
        }
    }

    /// The scope of [`USER`] on this shop's connection.
    pub fn scope(&self) -> Arc<Scope> {
        self.connection.scope(USER)
    }

    pub fn total_passes(&self) -> usize {
        self.total_batches.lock().unwrap().len()
    }

    pub fn last_total_batch(&self) -> Vec<RecordId> {
        self.total_batches
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }

    pub fn reset_counters(&self) {
        self.total_batches.lock().unwrap().clear();
        self.count_passes.store(0, Ordering::SeqCst);
        self.store.reset_stats();
    }
}

fn partner_label(scope: &Scope, field: &FieldDescriptor, records: &Records) -> Result<()> {
    for order in records.iter() {
        let name = match scope.relation(&order, "partner_id")?.first() {
            Some(partner) => scope
                .get(&partner, "name")?
                .as_str()
                .unwrap_or_default()
                .to_string(),
            None => String::new(),
        };
        scope.set_field(&order, field.id(), Value::from(format!("Order for {name}")))?;
    }
    Ok(())
}

pub fn float(value: &Value) -> f64 {
    value.as_f64().expect("float value")
}

/// An order with one line per amount.
pub fn order_with_lines(scope: &Scope, name: &str, amounts: &[f64]) -> (Record, Vec<Record>) {
    let order = scope
        .create("sale.order", &[("name", name.into())])
        .expect("create order");
    let lines = amounts
        .iter()
        .map(|amount| {
            scope
                .create(
                    "sale.line",
                    &[("order_id", order.id().into()), ("amount", (*amount).into())],
                )
                .expect("create line")
        })
        .collect();
    (order, lines)
}
