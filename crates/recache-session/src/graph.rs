//! Field graph setup.
//!
//! Building a registry runs, in order:
//!
//! 1. arena allocation of models and fields (declaration order)
//! 2. hook resolution: method names become [`Hook::NamedMethod`]
//! 3. inverse-field resolution for relational fields
//! 4. per-field setup: related fields are type-checked against their target,
//!    every dependency path is walked and triggers are registered on the
//!    fields it reaches
//! 5. the store schema export

use crate::field::{FieldBuilder, FieldDescriptor, FieldKind, Hook, HookRef, Trigger};
use crate::registry::{ModelBuilder, ModelDescriptor, Registry, RegistryBuilder};
use crate::related;
use recache_core::{
    ColumnKind, ColumnSchema, Error, FieldId, ModelId, ModelSchema, Result, SetupErrorKind,
    StoreSchema, TypeConsistencyError,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Valid dependency path segment: an identifier or the `*` wildcard.
fn segment_regex() -> Option<&'static Regex> {
    static SEGMENT: OnceLock<Option<Regex>> = OnceLock::new();
    SEGMENT
        .get_or_init(|| Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_]*|\*)$").ok())
        .as_ref()
}

/// Split and validate a dot-separated dependency path.
#[allow(clippy::result_large_err)]
pub(crate) fn parse_path(path: &str, allow_wildcard: bool) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    for segment in path.split('.') {
        let valid = segment_regex().is_some_and(|re| re.is_match(segment));
        if !valid || (segment == "*" && !allow_wildcard) {
            return Err(Error::invalid_path(format!(
                "invalid segment '{segment}' in path '{path}'"
            )));
        }
        segments.push(segment.to_string());
    }
    Ok(segments)
}

#[allow(clippy::result_large_err)]
fn arena_index(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::Custom(format!("registry too large ({n} entries)")))
}

/// Per-field declarations that are consumed during setup.
struct Declared {
    compute: Option<HookRef<crate::field::ComputeFn>>,
    inverse: Option<HookRef<crate::field::ComputeFn>>,
    search: Option<HookRef<crate::field::SearchFn>>,
    related: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SetupState {
    Pending,
    Ready,
}

#[allow(clippy::result_large_err)]
pub(crate) fn build(builder: RegistryBuilder) -> Result<Registry> {
    let mut models = Vec::new();
    let mut fields = Vec::new();
    let mut declared = Vec::new();
    let mut by_name = HashMap::new();

    for (model_index, model) in builder.models.into_iter().enumerate() {
        let model_id = ModelId(arena_index(model_index)?);
        allocate_model(
            model_id,
            model,
            &mut models,
            &mut fields,
            &mut declared,
            &mut by_name,
        )?;
    }

    let mut setup = Setup {
        models,
        fields,
        by_name,
        declared,
        state: Vec::new(),
    };
    setup.state = vec![SetupState::Pending; setup.fields.len()];

    setup.check_comodels()?;
    setup.resolve_hooks()?;
    setup.resolve_inverse_fields()?;
    for index in 0..setup.fields.len() {
        setup.complete_setup(FieldId(arena_index(index)?))?;
    }

    let schema = setup.schema();
    tracing::info!(
        models = setup.models.len(),
        fields = setup.fields.len(),
        triggers = setup.fields.iter().map(|f| f.triggers.len()).sum::<usize>(),
        "Registry built"
    );

    Ok(Registry {
        models: setup.models,
        fields: setup.fields,
        by_name: setup.by_name,
        schema,
    })
}

#[allow(clippy::result_large_err)]
fn allocate_model(
    model_id: ModelId,
    model: ModelBuilder,
    models: &mut Vec<ModelDescriptor>,
    fields: &mut Vec<FieldDescriptor>,
    declared: &mut Vec<Declared>,
    by_name: &mut HashMap<String, ModelId>,
) -> Result<()> {
    if by_name.insert(model.name.clone(), model_id).is_some() {
        return Err(Error::duplicate(format!(
            "model '{}' is registered twice",
            model.name
        )));
    }

    let mut descriptor = ModelDescriptor {
        id: model_id,
        name: model.name.clone(),
        fields: Vec::new(),
        by_name: HashMap::new(),
        methods: HashMap::new(),
        search_methods: HashMap::new(),
    };

    for method in model.methods {
        let name = method.name.clone();
        if descriptor.methods.insert(name.clone(), method).is_some() {
            return Err(Error::duplicate(format!(
                "method '{name}' is registered twice on model '{}'",
                model.name
            )));
        }
    }
    for (name, func) in model.search_methods {
        if descriptor.search_methods.insert(name.clone(), func).is_some() {
            return Err(Error::duplicate(format!(
                "search method '{name}' is registered twice on model '{}'",
                model.name
            )));
        }
    }

    for field in model.fields {
        let field_id = FieldId(arena_index(fields.len())?);
        if descriptor
            .by_name
            .insert(field.name.clone(), field_id)
            .is_some()
        {
            return Err(Error::duplicate(format!(
                "field '{}' is declared twice on model '{}'",
                field.name, model.name
            )));
        }
        descriptor.fields.push(field_id);
        let (field, decl) = allocate_field(field_id, model_id, &model.name, field);
        fields.push(field);
        declared.push(decl);
    }

    models.push(descriptor);
    Ok(())
}

fn allocate_field(
    id: FieldId,
    model: ModelId,
    model_name: &str,
    builder: FieldBuilder,
) -> (FieldDescriptor, Declared) {
    let derived = builder.compute.is_some() || builder.related.is_some();
    let field = FieldDescriptor {
        id,
        model,
        model_name: model_name.to_string(),
        string: builder
            .string
            .unwrap_or_else(|| FieldBuilder::default_label(&builder.name)),
        name: builder.name,
        kind: builder.kind,
        comodel_id: None,
        store: builder.store.unwrap_or(!derived),
        compute: None,
        inverse: None,
        search: None,
        depends: builder.depends,
        related: None,
        related_chain: Vec::new(),
        default: builder.default,
        help: builder.help,
        readonly: builder.readonly,
        required: builder.required,
        inverse_field: None,
        triggers: Vec::new(),
    };
    let declared = Declared {
        compute: builder.compute,
        inverse: builder.inverse,
        search: builder.search,
        related: builder.related,
    };
    (field, declared)
}

struct Setup {
    models: Vec<ModelDescriptor>,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, ModelId>,
    declared: Vec<Declared>,
    state: Vec<SetupState>,
}

impl Setup {
    fn model_named(&self, name: &str) -> Result<ModelId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::unknown_model(name))
    }

    fn field_named(&self, model: ModelId, name: &str) -> Result<FieldId> {
        let descriptor = &self.models[model.index()];
        descriptor
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::unknown_field(&descriptor.name, name))
    }

    fn check_comodels(&mut self) -> Result<()> {
        for index in 0..self.fields.len() {
            let comodel = match self.fields[index].kind.comodel() {
                Some(comodel) => Some(self.model_named(comodel)?),
                None => None,
            };
            self.fields[index].comodel_id = comodel;
        }
        Ok(())
    }

    /// Turn every declared hook into a resolved [`Hook`].
    fn resolve_hooks(&mut self) -> Result<()> {
        for index in 0..self.fields.len() {
            let model = &self.models[self.fields[index].model.index()];
            let declared = &mut self.declared[index];
            let field = &mut self.fields[index];

            match declared.compute.take() {
                Some(HookRef::Named(name)) => {
                    let method = model
                        .methods
                        .get(&name)
                        .ok_or_else(|| Error::unknown_method(&model.name, &name))?;
                    if field.depends.is_empty() {
                        field.depends.clone_from(&method.depends);
                    }
                    field.compute = Some(Hook::NamedMethod {
                        name,
                        func: Arc::clone(&method.func),
                    });
                }
                Some(HookRef::Closure(func)) => field.compute = Some(Hook::Closure(func)),
                None => {}
            }

            match declared.inverse.take() {
                Some(HookRef::Named(name)) => {
                    let method = model
                        .methods
                        .get(&name)
                        .ok_or_else(|| Error::unknown_method(&model.name, &name))?;
                    field.inverse = Some(Hook::NamedMethod {
                        name,
                        func: Arc::clone(&method.func),
                    });
                }
                Some(HookRef::Closure(func)) => field.inverse = Some(Hook::Closure(func)),
                None => {}
            }

            match declared.search.take() {
                Some(HookRef::Named(name)) => {
                    let func = model
                        .search_methods
                        .get(&name)
                        .ok_or_else(|| Error::unknown_method(&model.name, &name))?;
                    field.search = Some(Hook::NamedMethod {
                        name,
                        func: Arc::clone(func),
                    });
                }
                Some(HookRef::Closure(func)) => field.search = Some(Hook::Closure(func)),
                None => {}
            }

            if !field.store && field.compute.is_none() && declared.related.is_none() {
                return Err(Error::setup(
                    SetupErrorKind::MissingCompute,
                    format!("field {field} is not stored and has no way to be computed"),
                ));
            }
        }
        Ok(())
    }

    /// Pair relational fields with the field mirroring them on the comodel.
    fn resolve_inverse_fields(&mut self) -> Result<()> {
        for index in 0..self.fields.len() {
            let field = &self.fields[index];
            let inverse = match &field.kind {
                FieldKind::Many2one { comodel } => {
                    let comodel = self.model_named(comodel)?;
                    self.models[comodel.index()]
                        .fields
                        .iter()
                        .copied()
                        .find(|candidate| {
                            let other = &self.fields[candidate.index()];
                            matches!(
                                &other.kind,
                                FieldKind::One2many { comodel, inverse_name }
                                    if *comodel == field.model_name && *inverse_name == field.name
                            )
                        })
                }
                FieldKind::One2many {
                    comodel,
                    inverse_name,
                } => {
                    let comodel = self.model_named(comodel)?;
                    let inverse = self.field_named(comodel, inverse_name)?;
                    let target = &self.fields[inverse.index()];
                    match &target.kind {
                        FieldKind::Many2one { comodel } if *comodel == field.model_name => {}
                        _ => {
                            return Err(Error::invalid_path(format!(
                                "inverse field {target} of {field} must be a many2one to '{}'",
                                field.model_name
                            )));
                        }
                    }
                    Some(inverse)
                }
                FieldKind::Many2many {
                    comodel,
                    relation,
                    column1,
                    column2,
                } if field.compute.is_none() => {
                    let comodel = self.model_named(comodel)?;
                    self.models[comodel.index()]
                        .fields
                        .iter()
                        .copied()
                        .find(|candidate| {
                            let other = &self.fields[candidate.index()];
                            other.id != field.id
                                && other.compute.is_none()
                                && matches!(
                                    &other.kind,
                                    FieldKind::Many2many {
                                        comodel: c,
                                        relation: r,
                                        column1: c1,
                                        column2: c2,
                                    } if *c == field.model_name
                                        && r == relation
                                        && c1 == column2
                                        && c2 == column1
                                )
                        })
                }
                _ => None,
            };
            self.fields[index].inverse_field = inverse;
        }
        Ok(())
    }

    /// Set up a field once: related attributes, then dependency triggers.
    ///
    /// The field is flagged ready before any work so that a related chain
    /// coming back to it does not recurse.
    fn complete_setup(&mut self, id: FieldId) -> Result<()> {
        if self.state[id.index()] == SetupState::Ready {
            return Ok(());
        }
        self.state[id.index()] = SetupState::Ready;

        if let Some(path) = self.declared[id.index()].related.take() {
            self.setup_related(id, &path)?;
        }

        let model = self.fields[id.index()].model;
        for path in self.fields[id.index()].depends.clone() {
            let segments = parse_path(&path, true)?;
            self.depends_on_model(id, model, &[], &segments)?;
        }
        Ok(())
    }

    fn setup_related(&mut self, id: FieldId, path: &str) -> Result<()> {
        let segments = parse_path(path, false)?;
        let mut model = self.fields[id.index()].model;
        let mut chain = Vec::with_capacity(segments.len());
        for (position, name) in segments.iter().enumerate() {
            let step = self.field_named(model, name)?;
            chain.push(step);
            if position + 1 < segments.len() {
                let step_field = &self.fields[step.index()];
                let comodel = step_field.kind.comodel().ok_or_else(|| {
                    Error::invalid_path(format!(
                        "related path '{path}' continues through non-relational field {step_field}"
                    ))
                })?;
                model = self.model_named(comodel)?;
            }
        }
        let Some(&target) = chain.last() else {
            return Err(Error::invalid_path(format!("empty related path on field {}", self.fields[id.index()])));
        };

        {
            let field = &self.fields[id.index()];
            let target_field = &self.fields[target.index()];
            if field.kind.type_name() != target_field.kind.type_name()
                || field.kind.comodel() != target_field.kind.comodel()
            {
                return Err(Error::TypeConsistency(TypeConsistencyError {
                    field: field.to_string(),
                    target: target_field.to_string(),
                    expected: field.kind.describe(),
                    found: target_field.kind.describe(),
                }));
            }
        }

        self.complete_setup(target)?;

        let (help, readonly, required) = {
            let target_field = &self.fields[target.index()];
            (
                target_field.help.clone(),
                target_field.readonly,
                target_field.required,
            )
        };
        let field = &mut self.fields[id.index()];
        if field.help.is_none() {
            field.help = help;
        }
        field.readonly |= readonly;
        field.required |= required;
        field.depends = vec![segments.join(".")];
        field.related = Some(segments);
        field.related_chain = chain;
        field.compute = Some(Hook::Closure(Arc::new(related::compute_related)));
        if field.inverse.is_none() {
            field.inverse = Some(Hook::Closure(Arc::new(related::inverse_related)));
        }
        if field.search.is_none() {
            field.search = Some(Hook::Closure(Arc::new(related::search_related)));
        }
        tracing::debug!(field = %field, path = %path, "Related field set up");
        Ok(())
    }

    /// `path0 + path1` is a dependency of `dependent`, and `path0` leads
    /// from the dependent's model to `model`.
    fn depends_on_model(
        &mut self,
        dependent: FieldId,
        model: ModelId,
        path0: &[String],
        path1: &[String],
    ) -> Result<()> {
        let Some((head, tail)) = path1.split_first() else {
            return Err(Error::invalid_path(format!(
                "empty dependency path on field {}",
                self.fields[dependent.index()]
            )));
        };
        if head == "*" {
            for field in self.models[model.index()].fields.clone() {
                if field == dependent && path0.is_empty() {
                    continue;
                }
                self.add_trigger_for(field, dependent, path0, tail, false)?;
            }
            Ok(())
        } else {
            let field = self.field_named(model, head)?;
            self.add_trigger_for(field, dependent, path0, tail, true)
        }
    }

    /// Register on `field` a trigger recomputing `dependent`. Relational
    /// fields also register on their inverse field and follow the rest of
    /// the path into the comodel.
    fn add_trigger_for(
        &mut self,
        field: FieldId,
        dependent: FieldId,
        path0: &[String],
        path1: &[String],
        strict: bool,
    ) -> Result<()> {
        let path = if path0.is_empty() {
            "id".to_string()
        } else {
            path0.join(".")
        };
        self.push_trigger(field, Trigger { field: dependent, path });

        let (comodel, inverse, name) = {
            let descriptor = &self.fields[field.index()];
            (
                descriptor.kind.comodel().map(str::to_string),
                descriptor.inverse_field,
                descriptor.name.clone(),
            )
        };

        match comodel {
            Some(comodel) => {
                let mut next = path0.to_vec();
                next.push(name);
                if let Some(inverse) = inverse {
                    self.push_trigger(
                        inverse,
                        Trigger {
                            field: dependent,
                            path: next.join("."),
                        },
                    );
                }
                if !path1.is_empty() {
                    let comodel = self.model_named(&comodel)?;
                    self.depends_on_model(dependent, comodel, &next, path1)?;
                }
                Ok(())
            }
            None if strict && !path1.is_empty() => Err(Error::invalid_path(format!(
                "dependency of {} continues through non-relational field {}",
                self.fields[dependent.index()],
                self.fields[field.index()]
            ))),
            None => Ok(()),
        }
    }

    fn push_trigger(&mut self, field: FieldId, trigger: Trigger) {
        let triggers = &mut self.fields[field.index()].triggers;
        if triggers.contains(&trigger) {
            return;
        }
        tracing::debug!(
            field = %self.fields[field.index()],
            dependent = %self.fields[trigger.field.index()],
            path = %trigger.path,
            "Add trigger"
        );
        self.fields[field.index()].triggers.push(trigger);
    }

    fn schema(&self) -> StoreSchema {
        let mut schema = StoreSchema::default();
        for model in &self.models {
            let columns = model
                .fields
                .iter()
                .map(|id| {
                    let field = &self.fields[id.index()];
                    let kind = match &field.kind {
                        FieldKind::Many2one { comodel } => ColumnKind::ManyToOne {
                            comodel: comodel.clone(),
                        },
                        FieldKind::One2many {
                            comodel,
                            inverse_name,
                        } => ColumnKind::OneToMany {
                            comodel: comodel.clone(),
                            inverse: inverse_name.clone(),
                        },
                        FieldKind::Many2many {
                            comodel,
                            relation,
                            column1,
                            column2,
                        } => ColumnKind::ManyToMany {
                            comodel: comodel.clone(),
                            relation: relation.clone(),
                            column1: column1.clone(),
                            column2: column2.clone(),
                        },
                        _ => ColumnKind::Scalar,
                    };
                    ColumnSchema {
                        name: field.name.clone(),
                        kind,
                        stored: field.store,
                    }
                })
                .collect();
            schema.models.insert(
                model.name.clone(),
                ModelSchema {
                    name: model.name.clone(),
                    columns,
                },
            );
        }
        schema
    }
}
