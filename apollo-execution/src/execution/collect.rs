//! Groups the fields of a selection set by response key.
//!
//! <https://spec.graphql.org/October2021/#CollectFields()>

use std::collections::HashSet;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::executable;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::parser::SourceMap;
use apollo_compiler::schema::Type;
use indexmap::IndexMap;

use crate::graphql::Location;
use crate::json_ext::Object;

/// All the fields of one selection set sharing a response key.
///
/// Arguments are taken from the first field, sub-selections from all of them.
#[derive(Clone, Debug)]
pub(crate) struct FieldGroup {
    parent_type: Name,
    fields: Arc<[Node<Field>]>,
}

impl FieldGroup {
    pub(crate) fn new(parent_type: Name, fields: Vec<Node<Field>>) -> Self {
        debug_assert!(!fields.is_empty());
        Self {
            parent_type,
            fields: fields.into(),
        }
    }

    /// The object type the fields were selected on.
    pub(crate) fn parent_type(&self) -> &Name {
        &self.parent_type
    }

    pub(crate) fn first(&self) -> &Node<Field> {
        &self.fields[0]
    }

    pub(crate) fn fields(&self) -> &[Node<Field>] {
        &self.fields
    }

    pub(crate) fn field_name(&self) -> &Name {
        &self.first().name
    }

    pub(crate) fn return_type(&self) -> &Type {
        self.first().ty()
    }

    pub(crate) fn coordinate(&self) -> String {
        format!("{}.{}", self.parent_type, self.field_name())
    }

    /// The start of every field of the group in the document.
    pub(crate) fn locations(&self, sources: &SourceMap) -> Vec<Location> {
        self.fields
            .iter()
            .filter_map(|field| field.line_column_range(sources))
            .map(|range| Location {
                line: range.start.line as u32,
                column: range.start.column as u32,
            })
            .collect()
    }
}

/// `@include` and `@skip` on one selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct IncludeSkip {
    include: Condition,
    skip: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Condition {
    Yes,
    No,
    Variable(Name),
}

impl IncludeSkip {
    pub(crate) fn parse(directives: &executable::DirectiveList) -> Self {
        let mut include = None;
        let mut skip = None;
        for directive in directives.iter() {
            if include.is_none() && directive.name == "include" {
                include = Condition::parse(directive)
            }
            if skip.is_none() && directive.name == "skip" {
                skip = Condition::parse(directive)
            }
        }
        Self {
            include: include.unwrap_or(Condition::Yes),
            skip: skip.unwrap_or(Condition::No),
        }
    }

    pub(crate) fn should_skip(&self, variables: &Object) -> bool {
        // A condition that does not evaluate to a boolean leaves the selection in
        self.skip.eval(variables).unwrap_or(false) || !self.include.eval(variables).unwrap_or(true)
    }
}

impl Condition {
    pub(crate) fn parse(directive: &executable::Directive) -> Option<Self> {
        let argument = directive
            .arguments
            .iter()
            .find(|argument| argument.name == "if")?;
        match argument.value.as_ref() {
            executable::Value::Boolean(true) => Some(Condition::Yes),
            executable::Value::Boolean(false) => Some(Condition::No),
            executable::Value::Variable(variable) => Some(Condition::Variable(variable.clone())),
            _ => None,
        }
    }

    pub(crate) fn eval(&self, variables: &Object) -> Option<bool> {
        match self {
            Condition::Yes => Some(true),
            Condition::No => Some(false),
            Condition::Variable(variable_name) => variables
                .get(variable_name.as_str())
                .and_then(|v| v.as_bool()),
        }
    }
}

/// Collects fields against one document and set of variable values.
pub(crate) struct FieldCollector<'a> {
    pub(crate) schema: &'a Schema,
    pub(crate) document: &'a ExecutableDocument,
    pub(crate) variables: &'a Object,
}

impl FieldCollector<'_> {
    /// Groups the fields of `selection_set` that apply to `object_type`.
    pub(crate) fn collect_fields(
        &self,
        object_type: &Name,
        selection_set: &SelectionSet,
    ) -> IndexMap<Name, FieldGroup> {
        let mut grouped = IndexMap::new();
        let mut visited = HashSet::new();
        self.collect_into(
            object_type,
            &selection_set.selections,
            &mut visited,
            &mut grouped,
        );
        into_groups(object_type, grouped)
    }

    /// Groups the sub-selections of every field of `group`, in field order.
    pub(crate) fn collect_subfields(
        &self,
        object_type: &Name,
        group: &FieldGroup,
    ) -> IndexMap<Name, FieldGroup> {
        let mut grouped = IndexMap::new();
        let mut visited = HashSet::new();
        for field in group.fields() {
            self.collect_into(
                object_type,
                &field.selection_set.selections,
                &mut visited,
                &mut grouped,
            );
        }
        into_groups(object_type, grouped)
    }

    fn collect_into(
        &self,
        object_type: &Name,
        selections: &[Selection],
        visited: &mut HashSet<Name>,
        grouped: &mut IndexMap<Name, Vec<Node<Field>>>,
    ) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if IncludeSkip::parse(&field.directives).should_skip(self.variables) {
                        continue;
                    }
                    grouped
                        .entry(field.response_key().clone())
                        .or_default()
                        .push(field.clone());
                }
                Selection::InlineFragment(inline_fragment) => {
                    if IncludeSkip::parse(&inline_fragment.directives).should_skip(self.variables)
                    {
                        continue;
                    }
                    if let Some(condition) = &inline_fragment.type_condition
                        && !self.does_fragment_type_apply(object_type, condition)
                    {
                        continue;
                    }
                    self.collect_into(
                        object_type,
                        &inline_fragment.selection_set.selections,
                        visited,
                        grouped,
                    );
                }
                Selection::FragmentSpread(spread) => {
                    if IncludeSkip::parse(&spread.directives).should_skip(self.variables) {
                        continue;
                    }
                    if !visited.insert(spread.fragment_name.clone()) {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(&spread.fragment_name) else {
                        tracing::debug!(fragment = %spread.fragment_name, "unknown fragment");
                        continue;
                    };
                    if !self.does_fragment_type_apply(object_type, fragment.type_condition()) {
                        continue;
                    }
                    self.collect_into(
                        object_type,
                        &fragment.selection_set.selections,
                        visited,
                        grouped,
                    );
                }
            }
        }
    }

    fn does_fragment_type_apply(&self, object_type: &Name, condition: &Name) -> bool {
        condition == object_type || self.schema.is_subtype(condition, object_type)
    }
}

fn into_groups(
    object_type: &Name,
    grouped: IndexMap<Name, Vec<Node<Field>>>,
) -> IndexMap<Name, FieldGroup> {
    grouped
        .into_iter()
        .map(|(key, fields)| (key, FieldGroup::new(object_type.clone(), fields)))
        .collect()
}
