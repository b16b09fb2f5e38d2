//! Drift computation between prior state and proposed configuration.

use serde_json::{Map, Value};

use crate::attributes::resource_id;
use crate::error::ProviderError;
use crate::resources::ResourceHandler;
use crate::types::{AttributeChange, PlanResult};

/// Plan the transition from `prior` to `proposed` for `handler`'s type.
///
/// Both sides are compared in canonical form. A missing prior state plans a
/// create, a null proposed state plans a destroy.
pub fn plan(
    handler: &dyn ResourceHandler,
    prior: Option<&Value>,
    proposed: &Value,
) -> Result<PlanResult, ProviderError> {
    let prior = prior.filter(|p| !p.is_null());

    if proposed.is_null() {
        return Ok(match prior {
            Some(state) => PlanResult::with_changes(
                Value::Null,
                vec![AttributeChange::removed("id", Value::String(resource_id(state)?))],
                false,
            ),
            None => PlanResult::no_change(Value::Null),
        });
    }

    let desired = into_object(handler.normalize(proposed)?);

    let Some(prior) = prior else {
        let changes = desired
            .iter()
            .map(|(k, v)| AttributeChange::added(k.clone(), v.clone()))
            .collect();
        return Ok(PlanResult::with_changes(Value::Object(desired), changes, false));
    };

    let schema = handler.schema();
    let current = into_object(handler.normalize(prior)?);
    let mut changes = Vec::new();
    let mut requires_replace = false;
    for (key, after) in &desired {
        let before = current.get(key).cloned().unwrap_or(Value::Null);
        if &before != after {
            requires_replace |= schema.forces_new(key);
            changes.push(AttributeChange::modified(key.clone(), before, after.clone()));
        }
    }

    let stale: Vec<&str> = changes
        .iter()
        .flat_map(|c| handler.recomputed_by(&c.path).iter().copied())
        .collect();
    let mut planned = desired;
    if !requires_replace {
        for key in schema.computed_attributes() {
            if stale.contains(&key) {
                continue;
            }
            if let Some(value) = prior.get(key) {
                planned.insert(key.to_string(), value.clone());
            }
        }
    }
    let planned = Value::Object(planned);

    if changes.is_empty() {
        Ok(PlanResult::no_change(planned))
    } else {
        Ok(PlanResult::with_changes(planned, changes, requires_replace))
    }
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
