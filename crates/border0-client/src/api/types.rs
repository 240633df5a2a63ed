//! REST request and response bodies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use border0_core::SocketType;

/// Body of `POST /socket`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSocket {
    pub name: String,
    pub socket_type: SocketType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAction {
    pub action: String,
    pub id: Uuid,
}

/// Body of `PUT /socket/{id}/policy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub actions: Vec<PolicyAction>,
}

impl PolicyUpdate {
    pub fn add(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            actions: ids
                .into_iter()
                .map(|id| PolicyAction {
                    action: "add".to_string(),
                    id,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn policy_update_wire_shape() {
        let id = Uuid::from_u128(7);
        let body = serde_json::to_value(PolicyUpdate::add([id])).unwrap();
        assert_eq!(
            body,
            json!({"actions": [{"action": "add", "id": "00000000-0000-0000-0000-000000000007"}]})
        );
    }

    #[test]
    fn create_socket_uses_lowercase_type() {
        let body = serde_json::to_value(CreateSocket {
            name: "s1".into(),
            socket_type: SocketType::Database,
        })
        .unwrap();
        assert_eq!(body, json!({"name": "s1", "socket_type": "database"}));
    }

    #[test]
    fn policy_ignores_unknown_fields() {
        let p: Policy = serde_json::from_value(json!({
            "id": "00000000-0000-0000-0000-000000000001",
            "name": "allow-all",
            "policy_data": {"version": "v1"}
        }))
        .unwrap();
        assert_eq!(p.name, "allow-all");
        assert!(p.description.is_none());
    }
}
