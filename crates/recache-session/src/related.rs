//! Hooks of related fields.
//!
//! A related field mirrors the field at the end of a chain such as
//! `partner_id.name`. Setup installs these three functions as its compute,
//! inverse and search hooks.

use crate::field::FieldDescriptor;
use crate::record::Records;
use crate::scope::Scope;
use recache_core::{Condition, Domain, Error, FieldId, Operator, Result, SetupErrorKind, Value};

#[allow(clippy::result_large_err)]
fn chain(field: &FieldDescriptor) -> Result<(&FieldId, &[FieldId])> {
    field.related_chain.split_last().ok_or_else(|| {
        Error::setup(
            SetupErrorKind::InvalidPath,
            format!("field {field} has no related chain"),
        )
    })
}

/// Follow the relational `steps` from `records`.
#[allow(clippy::result_large_err)]
fn follow(scope: &Scope, records: Records, steps: &[FieldId]) -> Result<Records> {
    let registry = scope.registry();
    let mut current = records;
    for step in steps {
        let step = registry.field(*step);
        let Some(comodel) = step.comodel_id() else {
            return Err(Error::invalid_path(format!(
                "related chain goes through non-relational field {step}"
            )));
        };
        let mut next = Records::empty(comodel);
        for record in current.iter() {
            next = next.union(&scope.related_records(&record, step)?);
        }
        current = next;
    }
    Ok(current)
}

/// Copy the target value onto each record.
#[allow(clippy::result_large_err)]
pub(crate) fn compute_related(scope: &Scope, field: &FieldDescriptor, records: &Records) -> Result<()> {
    let (last, steps) = chain(field)?;
    let target = scope.registry().field(*last);
    for record in records.iter() {
        let reached = follow(scope, Records::from(&record), steps)?;
        let value = if target.kind().is_x2many() {
            let mut ids = Vec::new();
            for other in reached.iter() {
                let value = scope.get_field(&other, *last)?;
                ids.extend(value.as_ids().unwrap_or_default().iter().copied());
            }
            Value::records(ids)
        } else {
            match reached.first() {
                Some(other) => scope.get_field(&other, *last)?,
                None => target.null_value(),
            }
        };
        scope.set_field(&record, field.id(), value)?;
    }
    Ok(())
}

/// Write each record's value back on the target field of the records its
/// chain reaches.
#[allow(clippy::result_large_err)]
pub(crate) fn inverse_related(scope: &Scope, field: &FieldDescriptor, records: &Records) -> Result<()> {
    let (last, steps) = chain(field)?;
    // collect first: writing a target invalidates this field on every record
    let mut writes = Vec::with_capacity(records.len());
    for record in records.iter() {
        let value = scope.get_field(&record, field.id())?;
        let targets = follow(scope, Records::from(&record), steps)?;
        if !targets.is_empty() {
            writes.push((targets, value));
        }
    }
    for (targets, value) in writes {
        tracing::debug!(field = %field, targets = targets.len(), "Related write-back");
        scope.assign(&targets, vec![(*last, value)])?;
    }
    Ok(())
}

/// A condition on the related field is a condition on its full path.
#[allow(clippy::result_large_err)]
pub(crate) fn search_related(
    _scope: &Scope,
    field: &FieldDescriptor,
    operator: Operator,
    value: &Value,
) -> Result<Domain> {
    let path = field.related().map(|path| path.join(".")).ok_or_else(|| {
        Error::setup(
            SetupErrorKind::InvalidPath,
            format!("field {field} is not related"),
        )
    })?;
    Ok(Domain::from(Condition::new(path, operator, value.clone())))
}
