//! Addressing of call and event receivers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The callee of a function call or the receiver of an event.
///
/// `scope` groups resolvers on the host (`"system"`, `"view"`, `"page"`, ...)
/// and `target` selects within that scope.  When the pair is already
/// unambiguous (`{scope: "page", target: "top"}` is the top page of the page
/// stack) `instance` is left empty and omitted from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetEntity {
    pub scope: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl TargetEntity {
    pub fn new(scope: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            target: target.into(),
            instance: None,
        }
    }

    /// Narrows the target to one of several entities sharing scope and target.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

/// Returns `true` when `input` has the shape of a [`TargetEntity`].
pub fn is_target_entity(input: &Value) -> bool {
    let Some(obj) = input.as_object() else {
        return false;
    };
    let string_field = |key: &str| obj.get(key).is_some_and(Value::is_string);
    let instance_ok = match obj.get("instance") {
        None | Some(Value::Null) => true,
        Some(v) => v.is_string(),
    };
    string_field("scope") && string_field("target") && instance_ok
}

/// Pre-defined target entities.
pub mod targets {
    use super::TargetEntity;

    /// Client functionality, including the traditional JSB surface.
    pub fn client_api() -> TargetEntity {
        TargetEntity::new("system", "client")
    }
}
