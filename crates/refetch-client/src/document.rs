//! Structured operation documents and their canonical printed form.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::typenames::TYPENAME_FIELD;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Document`] instance.
///
/// Clones of a document share its identity; two separately built documents
/// never do, even when they print identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Read-only query.
    Query,
    /// State-changing mutation.
    Mutation,
}

impl OperationKind {
    /// Keyword used when printing.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

/// Argument value: a variable reference or an inline literal.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    /// `$name`
    Variable(String),
    /// Literal printed in GraphQL syntax.
    Literal(Value),
}

impl From<Value> for ArgumentValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// A field selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    alias: Option<String>,
    name: String,
    arguments: Vec<(String, ArgumentValue)>,
    selection: Vec<Selection>,
}

impl Field {
    /// Create a leaf field.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            selection: Vec::new(),
        }
    }

    /// Set a response alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add a literal argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments
            .push((name.into(), ArgumentValue::Literal(value.into())));
        self
    }

    /// Add an argument bound to an operation variable.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        self.arguments
            .push((name.into(), ArgumentValue::Variable(variable.into())));
        self
    }

    /// Add a nested field.
    #[must_use]
    pub fn field(mut self, field: Self) -> Self {
        self.selection.push(Selection::Field(field));
        self
    }

    /// Add several leaf fields.
    #[must_use]
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection
            .extend(names.into_iter().map(|name| Selection::Field(Self::new(name))));
        self
    }

    /// Add an inline fragment.
    #[must_use]
    pub fn on(mut self, fragment: InlineFragment) -> Self {
        self.selection.push(Selection::InlineFragment(fragment));
        self
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// `... on Type { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    type_condition: Option<String>,
    selection: Vec<Selection>,
}

impl InlineFragment {
    /// Fragment with a type condition.
    #[must_use]
    pub fn on(type_condition: impl Into<String>) -> Self {
        Self {
            type_condition: Some(type_condition.into()),
            selection: Vec::new(),
        }
    }

    /// Fragment without a type condition.
    #[must_use]
    pub const fn untyped() -> Self {
        Self {
            type_condition: None,
            selection: Vec::new(),
        }
    }

    /// Add a field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.selection.push(Selection::Field(field));
        self
    }

    /// Add several leaf fields.
    #[must_use]
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection
            .extend(names.into_iter().map(|name| Selection::Field(Field::new(name))));
        self
    }
}

/// Entry of a selection set.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Field selection.
    Field(Field),
    /// Inline fragment.
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, PartialEq)]
struct Operation {
    name: Option<String>,
    variables: Vec<(String, String)>,
    selection: Vec<Selection>,
}

#[derive(Debug)]
enum Body {
    Structured(Operation),
    Raw(String),
}

#[derive(Debug)]
struct DocumentInner {
    id: DocumentId,
    kind: OperationKind,
    body: Body,
}

/// An operation document.
///
/// Documents are cheap to clone and are meant to be built once per call
/// site and reused, so the engine can key its fingerprint lookup on
/// [`Document::id`].
#[derive(Debug, Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    /// Start building a named query.
    #[must_use]
    pub fn query(name: impl Into<String>) -> DocumentBuilder {
        DocumentBuilder::new(OperationKind::Query, Some(name.into()))
    }

    /// Start building a named mutation.
    #[must_use]
    pub fn mutation(name: impl Into<String>) -> DocumentBuilder {
        DocumentBuilder::new(OperationKind::Mutation, Some(name.into()))
    }

    /// Start building an anonymous operation.
    #[must_use]
    pub const fn anonymous(kind: OperationKind) -> DocumentBuilder {
        DocumentBuilder::new(kind, None)
    }

    /// Wrap pre-printed document text.
    ///
    /// The text is sent as-is; no `__typename` fields are added, so the
    /// caller must request them for dependency tracking to work.
    #[must_use]
    pub fn raw(kind: OperationKind, text: impl Into<String>) -> Self {
        Self::from_body(kind, Body::Raw(text.into()))
    }

    fn from_body(kind: OperationKind, body: Body) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                id: DocumentId::next(),
                kind,
                body,
            }),
        }
    }

    /// Identity of this document instance.
    #[must_use]
    pub fn id(&self) -> DocumentId {
        self.inner.id
    }

    /// Operation kind.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.inner.kind
    }

    /// Operation name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.inner.body {
            Body::Structured(operation) => operation.name.as_deref(),
            Body::Raw(_) => None,
        }
    }

    /// Canonical single-line text with `__typename` requested in every
    /// selection set.
    #[must_use]
    pub fn canonical(&self) -> String {
        match &self.inner.body {
            Body::Raw(text) => text.clone(),
            Body::Structured(operation) => print_operation(self.inner.kind, operation),
        }
    }
}

/// Builder returned by [`Document::query`] and [`Document::mutation`].
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    kind: OperationKind,
    operation: Operation,
}

impl DocumentBuilder {
    const fn new(kind: OperationKind, name: Option<String>) -> Self {
        Self {
            kind,
            operation: Operation {
                name,
                variables: Vec::new(),
                selection: Vec::new(),
            },
        }
    }

    /// Declare an operation variable, e.g. `("page", "Int!")`.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, type_ref: impl Into<String>) -> Self {
        self.operation
            .variables
            .push((name.into(), type_ref.into()));
        self
    }

    /// Add a root field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.operation.selection.push(Selection::Field(field));
        self
    }

    /// Finish the document.
    #[must_use]
    pub fn build(self) -> Document {
        Document::from_body(self.kind, Body::Structured(self.operation))
    }
}

fn print_operation(kind: OperationKind, operation: &Operation) -> String {
    let mut out = String::from(kind.keyword());
    if let Some(name) = &operation.name {
        out.push(' ');
        out.push_str(name);
    }
    if !operation.variables.is_empty() {
        out.push('(');
        for (index, (name, type_ref)) in operation.variables.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "${name}: {type_ref}");
        }
        out.push(')');
    }
    out.push(' ');
    print_selection_set(&mut out, &operation.selection);
    out
}

fn print_selection_set(out: &mut String, selection: &[Selection]) {
    out.push('{');
    for item in selection {
        out.push(' ');
        match item {
            Selection::Field(field) => print_field(out, field),
            Selection::InlineFragment(fragment) => {
                out.push_str("...");
                if let Some(type_condition) = &fragment.type_condition {
                    out.push_str(" on ");
                    out.push_str(type_condition);
                }
                out.push(' ');
                print_selection_set(out, &fragment.selection);
            }
        }
    }
    if !has_typename(selection) {
        out.push(' ');
        out.push_str(TYPENAME_FIELD);
    }
    out.push_str(" }");
}

fn print_field(out: &mut String, field: &Field) {
    if let Some(alias) = &field.alias {
        out.push_str(alias);
        out.push_str(": ");
    }
    out.push_str(&field.name);
    if !field.arguments.is_empty() {
        out.push('(');
        for (index, (name, value)) in field.arguments.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            out.push_str(name);
            out.push_str(": ");
            match value {
                ArgumentValue::Variable(variable) => {
                    out.push('$');
                    out.push_str(variable);
                }
                ArgumentValue::Literal(literal) => print_literal(out, literal),
            }
        }
        out.push(')');
    }
    if !field.selection.is_empty() {
        out.push(' ');
        print_selection_set(out, &field.selection);
    }
}

fn has_typename(selection: &[Selection]) -> bool {
    selection.iter().any(|item| match item {
        Selection::Field(field) => field.name == TYPENAME_FIELD && field.alias.is_none(),
        Selection::InlineFragment(_) => false,
    })
}

fn print_literal(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => {
            let _ = write!(out, "{flag}");
        }
        Value::Number(number) => {
            let _ = write!(out, "{number}");
        }
        // JSON string escaping is valid GraphQL string syntax.
        Value::String(_) => out.push_str(&value.to_string()),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                print_literal(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                out.push_str(key);
                out.push_str(": ");
                print_literal(out, item);
            }
            out.push('}');
        }
    }
}
