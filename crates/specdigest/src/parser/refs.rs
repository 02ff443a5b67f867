//! Expansion of local `$ref` pointers.

use serde_json::{Map, Value};

use super::error::ReferenceError;

const MAX_REF_DEPTH: usize = 32;

/// Upper bound on values produced while expanding one document. Shared
/// schemas referenced from many places multiply on every level.
pub const MAX_EXPANDED_NODES: usize = 200_000;

/// Returns a copy of `root` with every local `$ref` replaced by its target.
///
/// Recursive references are left unexpanded at the point where they would
/// recurse. External references are an error, and so is an expansion that
/// grows past [`MAX_EXPANDED_NODES`].
pub fn resolve_refs(root: &Value) -> Result<Value, ReferenceError> {
    resolve_refs_with_budget(root, MAX_EXPANDED_NODES)
}

pub fn resolve_refs_with_budget(root: &Value, budget: usize) -> Result<Value, ReferenceError> {
    let mut resolver = Resolver {
        root,
        chain: Vec::new(),
        budget,
        limit: budget,
    };
    resolver.resolve(root)
}

struct Resolver<'a> {
    root: &'a Value,
    chain: Vec<String>,
    budget: usize,
    limit: usize,
}

impl Resolver<'_> {
    fn spend(&mut self) -> Result<(), ReferenceError> {
        match self.budget.checked_sub(1) {
            Some(left) => {
                self.budget = left;
                Ok(())
            }
            None => Err(ReferenceError::TooLarge(self.limit)),
        }
    }

    fn resolve(&mut self, node: &Value) -> Result<Value, ReferenceError> {
        self.spend()?;
        match node {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    if self.chain.iter().any(|r| r == reference) {
                        return Ok(node.clone());
                    }
                    if self.chain.len() >= MAX_REF_DEPTH {
                        return Err(ReferenceError::TooDeep(reference.clone(), MAX_REF_DEPTH));
                    }

                    let target = lookup(self.root, reference)?;
                    self.chain.push(reference.clone());
                    let resolved = self.resolve(target);
                    self.chain.pop();
                    return resolved;
                }

                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve(value)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }
}

fn lookup<'a>(root: &'a Value, reference: &str) -> Result<&'a Value, ReferenceError> {
    let pointer = reference
        .strip_prefix('#')
        .ok_or_else(|| ReferenceError::External(reference.to_string()))?;
    root.pointer(pointer)
        .ok_or_else(|| ReferenceError::Unresolvable(reference.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolves_component_schema() {
        let doc = json!({
            "paths": {"/pets": {"get": {"responses": {"200": {"$ref": "#/components/responses/Ok"}}}}},
            "components": {"responses": {"Ok": {"description": "fine"}}}
        });
        let resolved = resolve_refs(&doc).unwrap();
        assert_eq!(
            resolved["paths"]["/pets"]["get"]["responses"]["200"]["description"],
            "fine"
        );
    }

    #[test]
    fn test_recursive_reference_is_left_in_place() {
        let doc = json!({
            "components": {"schemas": {"Node": {
                "type": "object",
                "properties": {"next": {"$ref": "#/components/schemas/Node"}}
            }}},
            "root": {"$ref": "#/components/schemas/Node"}
        });
        let resolved = resolve_refs(&doc).unwrap();
        assert_eq!(resolved["root"]["type"], "object");
        assert_eq!(
            resolved["root"]["properties"]["next"]["$ref"],
            "#/components/schemas/Node"
        );
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let doc = json!({"a": {"$ref": "#/components/schemas/Missing"}});
        assert!(matches!(
            resolve_refs(&doc),
            Err(ReferenceError::Unresolvable(_))
        ));
    }

    /// Schemas S0..S{depth} where each one points at the next twice.
    fn fan_out_document(depth: usize) -> Value {
        let mut schemas = Map::new();
        for i in 0..depth {
            let next = format!("#/components/schemas/S{}", i + 1);
            schemas.insert(
                format!("S{i}"),
                json!({"type": "object", "properties": {
                    "left": {"$ref": next},
                    "right": {"$ref": next}
                }}),
            );
        }
        schemas.insert(format!("S{depth}"), json!({"type": "string"}));
        json!({
            "root": {"$ref": "#/components/schemas/S0"},
            "components": {"schemas": schemas}
        })
    }

    #[test]
    fn test_fan_out_within_budget_expands() {
        let resolved = resolve_refs(&fan_out_document(3)).unwrap();
        assert_eq!(
            resolved["root"]["properties"]["left"]["properties"]["right"]["properties"]["left"]["type"],
            "string"
        );
    }

    #[test]
    fn test_fan_out_past_budget_stops_early() {
        let started = std::time::Instant::now();
        let err = resolve_refs(&fan_out_document(30)).unwrap_err();
        assert_eq!(err, ReferenceError::TooLarge(MAX_EXPANDED_NODES));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        assert!(matches!(
            resolve_refs_with_budget(&fan_out_document(3), 10),
            Err(ReferenceError::TooLarge(10))
        ));
    }

    #[test]
    fn test_external_reference_is_an_error() {
        let doc = json!({"a": {"$ref": "other.yaml#/Pet"}});
        assert!(matches!(resolve_refs(&doc), Err(ReferenceError::External(_))));
    }
}
