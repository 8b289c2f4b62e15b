//! Reference resolution during a run.

use std::collections::BTreeMap;
use std::sync::Arc;

use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::Sensitive;
use rigging_common::value::Value;
use rigging_compose::expr::{Expr, Reference};
use rigging_compose::schema::ResourceConfig;

use crate::params::Params;
use crate::provider::{Attributes, EvaluatedConfig};

/// Parameter values and the attributes of resources that have completed.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    params: Arc<Params>,
    resources: BTreeMap<String, Arc<Attributes>>,
}

impl Scope {
    /// Creates a scope with parameters and no resource results.
    #[must_use]
    pub fn new(params: Arc<Params>) -> Self {
        Self {
            params,
            resources: BTreeMap::new(),
        }
    }

    /// Records the attributes of a resource.
    pub fn insert(&mut self, resource: impl Into<String>, attributes: Arc<Attributes>) {
        let _ = self.resources.insert(resource.into(), attributes);
    }

    /// Returns whether `resource` has recorded attributes.
    #[must_use]
    pub fn contains(&self, resource: &str) -> bool {
        self.resources.contains_key(resource)
    }

    /// Resolves one reference. Attribute paths walk into nested values,
    /// and the result keeps the secrecy of the attribute it came from.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::NotFound` for unknown parameters, resources
    /// without results, and missing attributes.
    pub fn lookup(&self, reference: &Reference) -> Result<Sensitive<Value>> {
        let missing = |kind: &'static str| RiggingError::NotFound {
            kind,
            id: reference.to_string(),
        };
        match reference {
            Reference::Param(name) => self.params.get(name).cloned().ok_or_else(|| missing("parameter")),
            Reference::Attribute { resource, path } => {
                let attrs = self
                    .resources
                    .get(resource)
                    .ok_or_else(|| missing("resource result"))?;
                let (attribute, rest) = path.split_first().ok_or_else(|| missing("attribute"))?;
                let value = attrs.get(attribute).ok_or_else(|| missing("attribute"))?;
                let found = value
                    .expose()
                    .get_path(rest)
                    .cloned()
                    .ok_or_else(|| missing("attribute"))?;
                Ok(Sensitive::new(found, value.is_secret()))
            }
        }
    }

    /// Evaluates an expression in this scope.
    ///
    /// # Errors
    ///
    /// See [`lookup`](Self::lookup).
    pub fn evaluate(&self, expr: &Expr) -> Result<Sensitive<Value>> {
        expr.evaluate(&|reference: &Reference| self.lookup(reference))
    }

    /// Evaluates every field of a resource's configuration.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::InvalidResource` naming the resource and key
    /// whose expression could not be evaluated.
    pub fn evaluate_config(&self, resource: &str, config: &ResourceConfig) -> Result<EvaluatedConfig> {
        config.try_map(|key, expr| {
            self.evaluate(expr).map_err(|e| RiggingError::InvalidResource {
                resource: resource.to_string(),
                message: format!("cannot evaluate \"{key}\": {e}"),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use rigging_compose::descriptor::ResourceDescriptor;
    use rigging_compose::parser::parse_stack;

    use super::*;
    use crate::provider::plain;

    fn scope() -> Scope {
        let params = Params::from([(
            "openaiKey".to_string(),
            Sensitive::secret(Value::from("sk-live")),
        )]);
        let mut scope = Scope::new(Arc::new(params));
        scope.insert(
            "key",
            Arc::new(Attributes::from([
                (
                    "json".to_string(),
                    Sensitive::secret(Value::from_json(&serde_json::json!({
                        "api_key_info": {"uuid": "k-1"}
                    }))),
                ),
                ("name".to_string(), plain("workshop")),
            ])),
        );
        scope
    }

    fn reference(resource: &str, path: &[&str]) -> Reference {
        Reference::Attribute {
            resource: resource.into(),
            path: path.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn field_extraction_keeps_secrecy() {
        let uuid = scope()
            .lookup(&reference("key", &["json", "api_key_info", "uuid"]))
            .expect("found");
        assert_eq!(uuid.expose(), &Value::from("k-1"));
        assert!(uuid.is_secret());
        let name = scope().lookup(&reference("key", &["name"])).expect("found");
        assert!(!name.is_secret());
    }

    #[test]
    fn missing_results_are_not_found() {
        let err = scope().lookup(&reference("cluster", &["endpoint"])).unwrap_err();
        assert!(matches!(err, RiggingError::NotFound { .. }), "got: {err}");
        let err = scope()
            .lookup(&reference("key", &["json", "nope"]))
            .unwrap_err();
        assert!(err.to_string().contains("${key.json.nope}"), "got: {err}");
    }

    #[test]
    fn interpolating_a_secret_param_yields_a_secret_config_field() {
        let file = parse_stack(
            r#"
PARAM openaiKey SECRET
RESOURCE Secret s {
    name = "kagent-openai"
    namespace = "kagent"
    data = { authorization = "Bearer ${config.openaiKey}" }
}
"#,
        )
        .expect("parse");
        let descriptor = ResourceDescriptor::from_decl(&file.resources[0]).expect("descriptor");
        let config = scope()
            .evaluate_config("s", descriptor.config())
            .expect("evaluated");
        let ResourceConfig::Secret(secret) = config else {
            panic!("wrong kind");
        };
        assert!(secret.data.is_secret());
        assert!(!secret.name.is_secret());
        assert_eq!(
            secret.data.expose().get_path(&["authorization"]),
            Some(&Value::from("Bearer sk-live"))
        );
    }
}
