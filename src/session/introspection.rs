//! Introspection and authentication reply types.

use serde::{Deserialize, Serialize};

/// Service description returned by `__describe__`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub service: String,
    #[serde(default)]
    pub protocol_version: Option<i32>,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescription {
    /// Look up a declared method by name
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// One declared method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    /// `unary`, `stream` or `exchange`
    pub kind: String,
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
    /// Return type annotation
    #[serde(default)]
    pub returns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl MethodDescriptor {
    /// Type annotation of a named parameter
    pub fn param_type(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.ty.as_deref())
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
}

/// Reply to the authentication handshake
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthGrant {
    pub principal: String,
    pub token: String,
}
