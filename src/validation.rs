//! Schema validation for configuration values.
//!
//! Validates a `serde_json::Value` against a [`Schema`] and reports every
//! problem found as a [`Diagnostic`] carrying the dotted attribute path.
//!
//! ```
//! use hemmer_provider_aws_iot::schema::{Attribute, Schema};
//! use hemmer_provider_aws_iot::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0().with_attribute("name", Attribute::required_string());
//!
//! assert!(validate(&schema, &json!({"name": "telemetry"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": 42}));
//! assert_eq!(diagnostics[0].attribute.as_deref(), Some("name"));
//! ```

use crate::schema::{Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped
/// - Attribute types must match the schema
/// - Nested blocks are checked for item counts and conflicting siblings
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Like [`validate`], returning `Err` with the diagnostics when invalid.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let diag = Diagnostic::error("Expected object")
                .with_detail(format!("Got {}", value_type_name(value)));
            diagnostics.push(if path.is_empty() {
                diag
            } else {
                diag.with_attribute(path)
            });
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        let block_value = obj.get(name);
        validate_nested_block(nested, block_value, &block_path, diagnostics);

        if !is_block_set(block_value) {
            continue;
        }
        for sibling in &nested.conflicts_with {
            // Report a two-way conflict once, from the lexically smaller side.
            let declared_back = block
                .blocks
                .get(sibling)
                .map(|other| other.conflicts_with.iter().any(|n| n == name))
                .unwrap_or(false);
            if declared_back && sibling.as_str() < name.as_str() {
                continue;
            }
            if is_block_set(obj.get(sibling)) {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Conflicting blocks '{}' and '{}'",
                        block_path,
                        join_path(path, sibling)
                    ))
                    .with_detail("Only one of these blocks may be set")
                    .with_attribute(block_path.clone()),
                );
            }
        }
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_attribute_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !value.is_i64() {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) => match value.as_array() {
            Some(arr) => {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "list", value)),
        },
        AttributeType::Map(value_type) => match value.as_object() {
            Some(obj) => {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "map", value)),
        },
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match nested.nesting_mode {
        BlockNestingMode::Single => match value {
            None | Some(Value::Null) => {
                if nested.min_items > 0 {
                    diagnostics.push(
                        Diagnostic::error(format!("Missing required block '{}'", path))
                            .with_detail("At least one block is required")
                            .with_attribute(path),
                    );
                }
            },
            Some(v) => validate_block(&nested.block, v, path, diagnostics),
        },
        BlockNestingMode::List => validate_list_block(nested, value, path, diagnostics),
    }
}

fn validate_list_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let items: &[Value] = match value {
        None | Some(Value::Null) => &[],
        Some(Value::Array(arr)) => arr,
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
            return;
        },
    };

    let len = items.len() as u32;
    if len < nested.min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            ))
            .with_attribute(path),
        );
    }

    // 0 means unlimited
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path),
        );
    }

    for (i, item) in items.iter().enumerate() {
        let item_path = format!("{}.{}", path, i);
        validate_block(&nested.block, item, &item_path, diagnostics);
    }
}

fn is_block_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Array(arr)) => !arr.is_empty(),
        Some(_) => true,
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock, Schema};
    use serde_json::json;

    fn store_schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("arn", Attribute::computed_string())
            .with_block(
                "storage",
                NestedBlock::optional_one(
                    Block::new()
                        .with_block(
                            "customer_managed_s3",
                            NestedBlock::optional_one(
                                Block::new()
                                    .with_attribute("bucket", Attribute::required_string())
                                    .with_attribute("key_prefix", Attribute::optional_string())
                                    .with_attribute("role_arn", Attribute::required_string()),
                            )
                            .conflicts_with("service_managed_s3"),
                        )
                        .with_block(
                            "service_managed_s3",
                            NestedBlock::optional_one(Block::new())
                                .conflicts_with("customer_managed_s3"),
                        ),
                ),
            )
            .with_block(
                "retention_period",
                NestedBlock::optional_one(
                    Block::new()
                        .with_attribute("number_of_days", Attribute::optional_int64())
                        .with_attribute("unlimited", Attribute::optional_bool()),
                ),
            )
    }

    #[test]
    fn test_minimal_store_is_valid() {
        assert!(is_valid(&store_schema(), &json!({"name": "telemetry"})));
    }

    #[test]
    fn test_missing_required_name() {
        let diagnostics = validate(&store_schema(), &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("name"));
        assert!(diagnostics[0].summary.contains("Missing required"));
    }

    #[test]
    fn test_computed_attribute_skipped() {
        let diagnostics = validate(&store_schema(), &json!({"name": "telemetry", "arn": 5}));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_customer_managed_storage_requires_bucket_and_role() {
        let value = json!({
            "name": "telemetry",
            "storage": [{"customer_managed_s3": [{"key_prefix": "raw/"}]}]
        });
        let diagnostics = validate(&store_schema(), &value);
        let paths: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        assert_eq!(
            paths,
            vec![
                "storage.0.customer_managed_s3.0.bucket",
                "storage.0.customer_managed_s3.0.role_arn"
            ]
        );
    }

    #[test]
    fn test_conflicting_storage_variants_reported_once() {
        let value = json!({
            "name": "telemetry",
            "storage": [{
                "customer_managed_s3": [{"bucket": "b", "role_arn": "arn:aws:iam::1:role/r"}],
                "service_managed_s3": [{}]
            }]
        });
        let diagnostics = validate(&store_schema(), &value);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Conflicting blocks"));
        assert_eq!(
            diagnostics[0].attribute.as_deref(),
            Some("storage.0.customer_managed_s3")
        );
    }

    #[test]
    fn test_empty_variant_lists_do_not_conflict() {
        let value = json!({
            "name": "telemetry",
            "storage": [{"customer_managed_s3": [], "service_managed_s3": [{}]}]
        });
        assert!(is_valid(&store_schema(), &value));
    }

    #[test]
    fn test_max_items_enforced() {
        let value = json!({
            "name": "telemetry",
            "retention_period": [{"unlimited": true}, {"number_of_days": 3}]
        });
        let diagnostics = validate(&store_schema(), &value);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 1"));
    }

    #[test]
    fn test_int64_and_bool_types() {
        let value = json!({
            "name": "telemetry",
            "retention_period": [{"number_of_days": 1.5, "unlimited": "yes"}]
        });
        let diagnostics = validate(&store_schema(), &value);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.summary.contains("Invalid type")));
    }

    #[test]
    fn test_block_must_be_list() {
        let value = json!({"name": "telemetry", "storage": {"service_managed_s3": [{}]}});
        let diagnostics = validate(&store_schema(), &value);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected list"));
    }

    #[test]
    fn test_min_items_and_single_blocks() {
        let schema = Schema::v0()
            .with_block(
                "resource",
                NestedBlock::list(
                    Block::new().with_block(
                        "data_container",
                        NestedBlock::optional_one(Block::new()).with_min_items(1),
                    ),
                ),
            )
            .with_block(
                "owner",
                NestedBlock::single(Block::new().with_attribute("group", Attribute::required_string()))
                    .with_min_items(1),
            );

        let diagnostics = validate(&schema, &json!({"resource": [{}], "owner": {"group": "g"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute.as_deref(),
            Some("resource.0.data_container")
        );

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Missing required block"));
    }

    #[test]
    fn test_string_map_and_list() {
        let schema = Schema::v0()
            .with_attribute("tags", Attribute::optional_string_map())
            .with_attribute("labels", Attribute::optional_string_list());

        assert!(is_valid(
            &schema,
            &json!({"tags": {"team": "edge"}, "labels": ["a", "b"]})
        ));

        let diagnostics = validate(&schema, &json!({"tags": {"team": 1}, "labels": [true]}));
        let paths: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        assert_eq!(paths, vec!["labels.0", "tags.team"]);
    }

    #[test]
    fn test_validate_result_and_root_not_object() {
        assert!(validate_result(&store_schema(), &json!({"name": "x"})).is_ok());
        let err = validate_result(&store_schema(), &json!("x")).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].attribute.is_none());
    }
}
