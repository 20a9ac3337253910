//! Type descriptors, JSON-schema generation, and input validation.
//!
//! [`TypeSchema`] is a declarative description of a parameter or output
//! shape. It renders into a JSON-schema object for model function calling
//! ([`TypeSchema::to_json_schema`]) and validates incoming values against
//! the declared types and rules ([`TypeSchema::validate`]), aggregating
//! every failure instead of stopping at the first.
//!
//! For output types that derive [`schemars::JsonSchema`],
//! [`generate_json_schema`] produces the schema straight from the Rust type.

use regex::Regex;
use serde_json::{Map, Value};

/// A single validation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Dotted path of the offending field (empty for the top-level value).
    pub field: String,
    /// What went wrong.
    pub message: String,
    /// The offending value, when one was present.
    pub value: Option<Value>,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>, value: Option<&Value>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: value.cloned(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Every validation failure from one [`TypeSchema::validate`] pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    /// Returns `true` if no failures were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for err in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// The shape of a value.
#[derive(Debug, Clone)]
pub enum SchemaKind {
    /// A UTF-8 string.
    String,
    /// A whole number.
    Integer,
    /// Any number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// A homogeneous list with a recursive item schema.
    Array(Box<TypeSchema>),
    /// An object with declared fields.
    Object(Vec<SchemaField>),
}

impl SchemaKind {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

/// A named field of an object schema.
///
/// `name` is the serialized name the model sees. Fields are required by
/// default; [`optional`](SchemaField::optional) marks them as omittable, and
/// [`skip`](SchemaField::skip) excludes them from the schema entirely.
#[derive(Debug, Clone)]
pub struct SchemaField {
    /// Serialized field name.
    pub name: String,
    /// The field's own schema.
    pub schema: TypeSchema,
    /// Whether the field must be present.
    pub required: bool,
    /// Whether the field is excluded from schema and validation.
    pub skip: bool,
}

impl SchemaField {
    /// Declare a required field.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: TypeSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
            skip: false,
        }
    }

    /// Mark the field as omittable.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Exclude the field from the schema and from validation.
    #[must_use]
    pub const fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Attach a field description (shown to the model).
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.schema.description = Some(description.into());
        self
    }
}

/// A declarative type descriptor with validation rules.
#[derive(Debug, Clone, Default)]
pub struct TypeSchema {
    kind: Option<SchemaKind>,
    description: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    min_len: Option<usize>,
    max_len: Option<usize>,
    pattern: Option<Regex>,
    one_of: Option<Vec<String>>,
}

impl TypeSchema {
    fn of(kind: SchemaKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// A string schema.
    #[must_use]
    pub fn string() -> Self {
        Self::of(SchemaKind::String)
    }

    /// An integer schema.
    #[must_use]
    pub fn integer() -> Self {
        Self::of(SchemaKind::Integer)
    }

    /// A number schema.
    #[must_use]
    pub fn number() -> Self {
        Self::of(SchemaKind::Number)
    }

    /// A boolean schema.
    #[must_use]
    pub fn boolean() -> Self {
        Self::of(SchemaKind::Boolean)
    }

    /// An array schema with the given item schema.
    #[must_use]
    pub fn array(items: Self) -> Self {
        Self::of(SchemaKind::Array(Box::new(items)))
    }

    /// An object schema with the given fields.
    #[must_use]
    pub fn object(fields: Vec<SchemaField>) -> Self {
        Self::of(SchemaKind::Object(fields))
    }

    /// Attach a description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Minimum numeric value (inclusive).
    #[must_use]
    pub const fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Maximum numeric value (inclusive).
    #[must_use]
    pub const fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Minimum string or array length.
    #[must_use]
    pub const fn min_len(mut self, min_len: usize) -> Self {
        self.min_len = Some(min_len);
        self
    }

    /// Maximum string or array length.
    #[must_use]
    pub const fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Regex the string value must match.
    ///
    /// An invalid pattern is ignored rather than propagated; declare patterns
    /// in tests to catch typos.
    #[must_use]
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Regex::new(pattern).ok();
        self
    }

    /// Enumerated set of allowed string values.
    #[must_use]
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.one_of = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Render this descriptor as a JSON-schema object.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        let Some(kind) = &self.kind else {
            return Value::Object(schema);
        };

        schema.insert("type".into(), Value::String(kind.type_name().into()));
        if let Some(description) = &self.description {
            schema.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(min) = self.min {
            schema.insert("minimum".into(), number(min));
        }
        if let Some(max) = self.max {
            schema.insert("maximum".into(), number(max));
        }
        if let Some(min_len) = self.min_len {
            schema.insert("minLength".into(), Value::from(min_len));
        }
        if let Some(max_len) = self.max_len {
            schema.insert("maxLength".into(), Value::from(max_len));
        }
        if let Some(pattern) = &self.pattern {
            schema.insert("pattern".into(), Value::String(pattern.as_str().into()));
        }
        if let Some(one_of) = &self.one_of {
            schema.insert(
                "enum".into(),
                Value::Array(one_of.iter().cloned().map(Value::String).collect()),
            );
        }

        match kind {
            SchemaKind::Array(items) => {
                schema.insert("items".into(), items.to_json_schema());
            }
            SchemaKind::Object(fields) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    if field.skip {
                        continue;
                    }
                    properties.insert(field.name.clone(), field.schema.to_json_schema());
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                schema.insert("properties".into(), Value::Object(properties));
                if !required.is_empty() {
                    schema.insert("required".into(), Value::Array(required));
                }
            }
            _ => {}
        }

        Value::Object(schema)
    }

    /// Validate a value against this descriptor.
    ///
    /// # Errors
    ///
    /// Returns every failure found, aggregated into [`ValidationErrors`].
    pub fn validate(&self, value: &Value) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();
        self.check("", value, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }

    fn check(&self, path: &str, value: &Value, errors: &mut Vec<ValidationError>) {
        let Some(kind) = &self.kind else {
            return;
        };

        match kind {
            SchemaKind::String => {
                let Some(text) = value.as_str() else {
                    errors.push(ValidationError::new(path, "expected a string", Some(value)));
                    return;
                };
                self.check_length(path, text.chars().count(), value, errors);
                if let Some(pattern) = &self.pattern
                    && !pattern.is_match(text)
                {
                    errors.push(ValidationError::new(
                        path,
                        format!("must match pattern '{}'", pattern.as_str()),
                        Some(value),
                    ));
                }
                if let Some(one_of) = &self.one_of
                    && !one_of.iter().any(|allowed| allowed == text)
                {
                    errors.push(ValidationError::new(
                        path,
                        format!("must be one of [{}]", one_of.join(", ")),
                        Some(value),
                    ));
                }
            }
            SchemaKind::Integer => {
                if value.as_i64().is_none() && value.as_u64().is_none() {
                    errors.push(ValidationError::new(
                        path,
                        "expected an integer",
                        Some(value),
                    ));
                    return;
                }
                self.check_range(path, value, errors);
            }
            SchemaKind::Number => {
                if !value.is_number() {
                    errors.push(ValidationError::new(path, "expected a number", Some(value)));
                    return;
                }
                self.check_range(path, value, errors);
            }
            SchemaKind::Boolean => {
                if !value.is_boolean() {
                    errors.push(ValidationError::new(
                        path,
                        "expected a boolean",
                        Some(value),
                    ));
                }
            }
            SchemaKind::Array(items) => {
                let Some(elements) = value.as_array() else {
                    errors.push(ValidationError::new(path, "expected an array", Some(value)));
                    return;
                };
                self.check_length(path, elements.len(), value, errors);
                for (index, element) in elements.iter().enumerate() {
                    items.check(&join_path(path, &index.to_string()), element, errors);
                }
            }
            SchemaKind::Object(fields) => {
                let Some(map) = value.as_object() else {
                    errors.push(ValidationError::new(
                        path,
                        "expected an object",
                        Some(value),
                    ));
                    return;
                };
                for field in fields {
                    if field.skip {
                        continue;
                    }
                    match map.get(&field.name) {
                        Some(field_value) => {
                            field
                                .schema
                                .check(&join_path(path, &field.name), field_value, errors);
                        }
                        None if field.required => {
                            errors.push(ValidationError::new(
                                join_path(path, &field.name),
                                "required field is missing",
                                None,
                            ));
                        }
                        None => {}
                    }
                }
            }
        }
    }

    fn check_range(&self, path: &str, value: &Value, errors: &mut Vec<ValidationError>) {
        let Some(actual) = value.as_f64() else {
            return;
        };
        if let Some(min) = self.min
            && actual < min
        {
            errors.push(ValidationError::new(
                path,
                format!("must be >= {min}"),
                Some(value),
            ));
        }
        if let Some(max) = self.max
            && actual > max
        {
            errors.push(ValidationError::new(
                path,
                format!("must be <= {max}"),
                Some(value),
            ));
        }
    }

    fn check_length(
        &self,
        path: &str,
        actual: usize,
        value: &Value,
        errors: &mut Vec<ValidationError>,
    ) {
        if let Some(min_len) = self.min_len
            && actual < min_len
        {
            errors.push(ValidationError::new(
                path,
                format!("length must be >= {min_len}"),
                Some(value),
            ));
        }
        if let Some(max_len) = self.max_len
            && actual > max_len
        {
            errors.push(ValidationError::new(
                path,
                format!("length must be <= {max_len}"),
                Some(value),
            ));
        }
    }
}

fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_owned()
    } else {
        format!("{parent}.{child}")
    }
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Generate a JSON Schema from a Rust type that implements
/// [`schemars::JsonSchema`].
///
/// Returns `(name, schema)` where `name` is derived from the type name and
/// `schema` has the `$schema` meta field removed (model APIs don't need it).
#[must_use]
pub fn generate_json_schema<T: schemars::JsonSchema>() -> (String, Value) {
    let root = schemars::schema_for!(T);
    let mut schema_value = serde_json::to_value(&root).unwrap_or_default();

    if let Value::Object(ref mut map) = schema_value {
        map.remove("$schema");
    }

    let name = <T as schemars::JsonSchema>::schema_name();
    (name.into_owned(), schema_value)
}

/// Strip a surrounding fenced code block (```json … ```), if present.
///
/// Models often wrap structured output in fences; parsing happens on the
/// inner text.
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the optional language tag on the opening fence line.
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_args_schema() -> TypeSchema {
        TypeSchema::object(vec![
            SchemaField::new("a", TypeSchema::integer()).description("first operand"),
            SchemaField::new("b", TypeSchema::integer().min(0.0)),
            SchemaField::new("label", TypeSchema::string().max_len(8)).optional(),
        ])
    }

    mod json_schema {
        use super::*;

        #[test]
        fn object_renders_properties_and_required() {
            let schema = add_args_schema().to_json_schema();
            assert_eq!(schema["type"], "object");
            assert_eq!(schema["properties"]["a"]["type"], "integer");
            assert_eq!(schema["properties"]["a"]["description"], "first operand");
            assert_eq!(schema["properties"]["b"]["minimum"], 0.0);
            let required = schema["required"].as_array().unwrap();
            assert_eq!(required.len(), 2);
            assert!(!required.contains(&json!("label")));
        }

        #[test]
        fn skipped_fields_are_absent() {
            let schema = TypeSchema::object(vec![
                SchemaField::new("keep", TypeSchema::string()),
                SchemaField::new("internal", TypeSchema::string()).skip(),
            ])
            .to_json_schema();
            assert!(schema["properties"].get("internal").is_none());
        }

        #[test]
        fn array_top_level_wraps_item_schema() {
            let schema = TypeSchema::array(add_args_schema()).to_json_schema();
            assert_eq!(schema["type"], "array");
            assert_eq!(schema["items"]["type"], "object");
        }

        #[test]
        fn string_rules_render() {
            let schema = TypeSchema::string()
                .min_len(1)
                .max_len(5)
                .pattern("^[a-z]+$")
                .one_of(["red", "green"])
                .to_json_schema();
            assert_eq!(schema["minLength"], 1);
            assert_eq!(schema["maxLength"], 5);
            assert_eq!(schema["pattern"], "^[a-z]+$");
            assert_eq!(schema["enum"], json!(["red", "green"]));
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn conforming_value_passes() {
            let value = json!({"a": 2, "b": 3, "label": "sum"});
            add_args_schema().validate(&value).unwrap();
        }

        #[test]
        fn missing_optional_field_passes() {
            add_args_schema().validate(&json!({"a": 1, "b": 1})).unwrap();
        }

        #[test]
        fn missing_required_field_is_reported() {
            let errors = add_args_schema()
                .validate(&json!({"a": 2}))
                .unwrap_err();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors.0[0].field, "b");
            assert!(errors.0[0].message.contains("required"));
        }

        #[test]
        fn multiple_errors_aggregate() {
            let errors = add_args_schema()
                .validate(&json!({"a": "two", "b": -1, "label": "way too long"}))
                .unwrap_err();
            assert_eq!(errors.len(), 3);
            let fields: Vec<&str> = errors.0.iter().map(|e| e.field.as_str()).collect();
            assert_eq!(fields, vec!["a", "b", "label"]);
        }

        #[test]
        fn nested_array_paths_are_dotted() {
            let schema = TypeSchema::object(vec![SchemaField::new(
                "items",
                TypeSchema::array(TypeSchema::integer()),
            )]);
            let errors = schema
                .validate(&json!({"items": [1, "x", 3]}))
                .unwrap_err();
            assert_eq!(errors.0[0].field, "items.1");
        }

        #[test]
        fn pattern_and_one_of_enforced() {
            let schema = TypeSchema::object(vec![
                SchemaField::new("code", TypeSchema::string().pattern("^[A-Z]{3}$")),
                SchemaField::new("color", TypeSchema::string().one_of(["red", "green"])),
            ]);
            let errors = schema
                .validate(&json!({"code": "abc", "color": "blue"}))
                .unwrap_err();
            assert_eq!(errors.len(), 2);
        }

        #[test]
        fn top_level_slice_validates_each_element() {
            let schema = TypeSchema::array(add_args_schema());
            let errors = schema
                .validate(&json!([{"a": 1, "b": 2}, {"a": 1}]))
                .unwrap_err();
            assert_eq!(errors.0[0].field, "1.b");
        }

        #[test]
        fn reserialized_valid_value_still_validates() {
            let schema = add_args_schema();
            let value = json!({"a": 9, "b": 0});
            schema.validate(&value).unwrap();
            let reserialized: Value =
                serde_json::from_str(&serde_json::to_string(&value).unwrap()).unwrap();
            schema.validate(&reserialized).unwrap();
        }
    }

    mod fences {
        use super::*;

        #[test]
        fn strips_json_fence() {
            let text = "```json\n{\"a\": 1}\n```";
            assert_eq!(strip_code_fences(text), "{\"a\": 1}");
        }

        #[test]
        fn strips_bare_fence() {
            assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        }

        #[test]
        fn leaves_plain_text_alone() {
            assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
        }
    }

    mod derived {
        use super::*;

        #[derive(schemars::JsonSchema)]
        struct MovieScript {
            #[allow(dead_code)]
            name: String,
            #[allow(dead_code)]
            genre: String,
            #[allow(dead_code)]
            characters: Vec<String>,
        }

        #[test]
        fn generate_json_schema_names_the_type() {
            let (name, schema) = generate_json_schema::<MovieScript>();
            assert_eq!(name, "MovieScript");
            assert!(schema.get("$schema").is_none());
            assert!(schema["properties"].get("characters").is_some());
        }
    }
}
