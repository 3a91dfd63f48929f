//! Read planning.
//!
//! [`ReadArgs`] is the caller-facing projection: which properties to read,
//! nested projections for relations and jointables, a where-clause and
//! paging. [`Session::plan`] turns it into the [`QueryPlan`] a storage
//! driver executes.
//!
//! A plan is a flat `select` until it needs nested rows: any relation,
//! jointable, or calculated property without a loader switches it to
//! `include`. Jointables are planned through their intermediate rows, so
//! `Activity.tags` is read as `activityTags { tag { .. } }` with the joined
//! columns of each intermediate row alongside. Soft-deleted rows are
//! filtered out of every to-many level unless asked for.
//!
//! # Examples
//!
//! ```
//! use unitwork_rs_db::query::filter::Filter;
//! use unitwork_rs_db::query::planner::ReadArgs;
//!
//! let args = ReadArgs::new()
//!     .field("title")
//!     .nested("tags", ReadArgs::new().field("name"))
//!     .filter(Filter::eq("title", "Kickoff"))
//!     .limit(10);
//! assert_eq!(args.take, Some(10));
//! ```

use std::collections::BTreeMap;

use unitwork_rs_core::{OrmError, OrmResult};

use crate::query::filter::Filter;
use crate::registry::{JointableDef, PropertyType};
use crate::session::Session;

/// The projection of one property.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// The property as a whole; relations read their default projection.
    All,
    /// A relation or jointable with its own projection.
    Nested(ReadArgs),
}

/// What to read for one kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadArgs {
    /// Requested properties. Empty means every persisted property.
    pub select: BTreeMap<String, Selection>,
    /// Where-clause.
    pub filter: Option<Filter>,
    /// Keep soft-deleted rows.
    pub include_deleted: bool,
    /// Maximum number of rows.
    pub take: Option<usize>,
    /// Rows to skip.
    pub skip: Option<usize>,
    /// Relations to count into the `_count` side-channel.
    pub count: Vec<String>,
}

impl ReadArgs {
    /// An empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a property.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.select.entry(name.into()).or_insert(Selection::All);
        self
    }

    /// Requests a relation or jointable with a nested projection.
    #[must_use]
    pub fn nested(mut self, name: impl Into<String>, args: Self) -> Self {
        self.select.insert(name.into(), Selection::Nested(args));
        self
    }

    /// Adds a condition, AND-ed with any existing one.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing & filter,
            None => filter,
        });
        self
    }

    /// Keeps soft-deleted rows.
    #[must_use]
    pub const fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Limits the number of rows.
    #[must_use]
    pub const fn limit(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    /// Skips rows.
    #[must_use]
    pub const fn offset(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Counts a relation.
    #[must_use]
    pub fn count(mut self, relation: impl Into<String>) -> Self {
        self.count.push(relation.into());
        self
    }
}

/// Whether a plan lists its columns or includes nested rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Only the listed columns.
    Select,
    /// Every column plus the listed relations.
    Include,
}

/// One field of a [`QueryPlan`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlanField {
    /// A column.
    Scalar,
    /// Nested rows of a relation.
    Relation(QueryPlan),
}

/// A read the storage driver executes.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// The kind read.
    pub kind: String,
    /// Select or include.
    pub mode: PlanMode,
    /// Columns and nested relations by storage name.
    pub fields: BTreeMap<String, PlanField>,
    /// Where-clause, soft-delete default applied.
    pub filter: Option<Filter>,
    /// Maximum number of rows.
    pub take: Option<usize>,
    /// Rows to skip.
    pub skip: Option<usize>,
    /// Relations counted into `_count`.
    pub count: Vec<String>,
    /// Calculated properties filled by their loaders after the read.
    pub calculated: Vec<String>,
}

impl QueryPlan {
    /// A select plan reading only the id.
    pub fn new(kind: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), PlanField::Scalar);
        Self {
            kind: kind.into(),
            mode: PlanMode::Select,
            fields,
            filter: None,
            take: None,
            skip: None,
            count: Vec::new(),
            calculated: Vec::new(),
        }
    }

    /// Returns `true` for include plans.
    pub fn is_include(&self) -> bool {
        self.mode == PlanMode::Include
    }

    /// The nested plan of a relation field.
    pub fn relation(&self, name: &str) -> Option<&Self> {
        match self.fields.get(name) {
            Some(PlanField::Relation(plan)) => Some(plan),
            _ => None,
        }
    }

    fn scalar(&mut self, name: impl Into<String>) {
        self.fields.entry(name.into()).or_insert(PlanField::Scalar);
    }

    /// Renders the plan as a JSON read argument: `select` or `include`,
    /// `where`, `take`, `skip` and `_count`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Map, Value};
        let mut fields = Map::new();
        for (name, field) in &self.fields {
            match field {
                PlanField::Scalar if self.mode == PlanMode::Select => {
                    fields.insert(name.clone(), Value::Bool(true));
                }
                PlanField::Scalar => {}
                PlanField::Relation(plan) => {
                    fields.insert(name.clone(), plan.to_json());
                }
            }
        }
        if !self.count.is_empty() {
            let counted: Map<String, Value> = self
                .count
                .iter()
                .map(|r| (r.clone(), Value::Bool(true)))
                .collect();
            fields.insert("_count".into(), json!({ "select": counted }));
        }
        let mut out = Map::new();
        let key = match self.mode {
            PlanMode::Select => "select",
            PlanMode::Include => "include",
        };
        out.insert(key.into(), Value::Object(fields));
        if let Some(filter) = &self.filter {
            out.insert("where".into(), filter.to_json());
        }
        if let Some(take) = self.take {
            out.insert("take".into(), json!(take));
        }
        if let Some(skip) = self.skip {
            out.insert("skip".into(), json!(skip));
        }
        Value::Object(out)
    }
}

impl Session {
    /// Plans a read of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnsupportedOperation`] when a joined field is
    /// selected outside its owning jointable, and [`OrmError::Programming`]
    /// for unknown kinds or properties.
    pub fn plan(&self, kind: &str, args: &ReadArgs) -> OrmResult<QueryPlan> {
        self.plan_kind(kind, args, None)
    }

    fn plan_kind(
        &self,
        kind: &str,
        args: &ReadArgs,
        via: Option<&JointableDef>,
    ) -> OrmResult<QueryPlan> {
        let meta = self.registry.kind(kind)?;
        let mut plan = QueryPlan::new(kind);
        if args.select.is_empty() {
            for p in meta.properties().iter().filter(|p| p.is_persisted()) {
                plan.scalar(p.name.as_str());
            }
        }
        for (name, selection) in &args.select {
            if name == "id" {
                continue;
            }
            let def = self.registry.property(kind, name)?;
            match &def.property_type {
                PropertyType::Scalar | PropertyType::Computed(_) => plan.scalar(name.as_str()),
                PropertyType::Joined {
                    owner_kind,
                    jointable,
                } => {
                    let through = via.is_some_and(|j| {
                        j.joined_fields.iter().any(|f| &f.property == name)
                    });
                    if !through {
                        return Err(OrmError::UnsupportedOperation(format!(
                            "{kind}.{name} is stored on the rows of {owner_kind}.{jointable}; \
                             select it through that jointable"
                        )));
                    }
                }
                PropertyType::Calculated(calc) => {
                    for dep in &calc.depends_on {
                        let dep_def = self.registry.property(kind, dep)?;
                        if dep_def.is_persisted() {
                            plan.scalar(dep.as_str());
                        }
                    }
                    if calc.loader.is_some() {
                        plan.calculated.push(name.clone());
                    } else {
                        plan.mode = PlanMode::Include;
                    }
                }
                PropertyType::Relation(rel) => {
                    plan.mode = PlanMode::Include;
                    let nested = nested_args(selection);
                    let mut sub = self.plan_kind(&rel.target, &nested, None)?;
                    if !rel.is_array {
                        sub.filter = None;
                    }
                    plan.fields.insert(name.clone(), PlanField::Relation(sub));
                    if let Some(id_field) = rel.id_field_name() {
                        plan.scalar(id_field);
                    }
                }
                PropertyType::Jointable(j) => {
                    plan.mode = PlanMode::Include;
                    let nested = nested_args(selection);
                    let sub = self.plan_jointable(j, &nested)?;
                    plan.fields.insert(j.relation.clone(), PlanField::Relation(sub));
                }
            }
        }
        plan.filter = self.default_filter(kind, args.filter.clone(), args.include_deleted)?;
        plan.take = args.take;
        plan.skip = args.skip;
        plan.count.clone_from(&args.count);
        Ok(plan)
    }

    /// Intermediate rows of `j`, each carrying its target.
    fn plan_jointable(&self, j: &JointableDef, nested: &ReadArgs) -> OrmResult<QueryPlan> {
        let mut target = self.plan_kind(&j.target, nested, Some(j))?;
        target.filter = None;
        let mut plan = QueryPlan::new(&j.intermediate);
        plan.mode = PlanMode::Include;
        plan.scalar(j.join_key.as_str());
        plan.scalar(j.reverse_join_key.as_str());
        for jf in &j.joined_fields {
            if nested.select.is_empty() || nested.select.contains_key(&jf.property) {
                plan.scalar(jf.column.as_str());
            }
        }
        plan.fields
            .insert(j.join_field.clone(), PlanField::Relation(target));
        plan.filter = self.default_filter(&j.intermediate, None, nested.include_deleted)?;
        Ok(plan)
    }

    /// `filter` with soft-deleted rows excluded, unless `include_deleted`,
    /// the session settings, or the filter itself says otherwise.
    pub(crate) fn default_filter(
        &self,
        kind: &str,
        filter: Option<Filter>,
        include_deleted: bool,
    ) -> OrmResult<Option<Filter>> {
        let Some(columns) = self.registry.kind(kind)?.soft_delete() else {
            return Ok(filter);
        };
        let explicit = filter.as_ref().is_some_and(|f| f.mentions(&columns.flag));
        if include_deleted || explicit || self.settings.include_deleted_by_default {
            return Ok(filter);
        }
        let live = Filter::eq(columns.flag.as_str(), false);
        Ok(Some(match filter {
            Some(f) if !f.is_empty() => f & live,
            _ => live,
        }))
    }
}

fn nested_args(selection: &Selection) -> ReadArgs {
    match selection {
        Selection::All => ReadArgs::new(),
        Selection::Nested(args) => args.clone(),
    }
}
