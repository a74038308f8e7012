//! Connection handshake schema.
//!
//! The first frame on every connection is the server's HELLO: the schema
//! mapping method names to their wire IDs and calling conventions. The
//! client resolves names through it before issuing calls, so the per-frame
//! header only carries the compact numeric ID.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Calling convention of one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    /// One request, one response.
    Unary,
    /// One request, many responses.
    ServerStream,
    /// Many requests, one response.
    ClientStream,
    /// Many requests and many responses, independently timed.
    BidiStream,
}

/// One method entry in the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    pub id: u16,
    pub kind: CallKind,
}

/// The schema sent in the HELLO frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    methods: Vec<MethodSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a method entry.
    pub fn add_method(&mut self, name: &str, id: u16, kind: CallKind) {
        self.methods.push(MethodSpec {
            name: name.to_string(),
            id,
            kind,
        });
    }

    /// Look up a method by name.
    pub fn get(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// All method entries.
    pub fn methods(&self) -> &[MethodSpec] {
        &self.methods
    }

    /// Build a name-indexed lookup table.
    pub fn by_name(&self) -> HashMap<String, MethodSpec> {
        self.methods
            .iter()
            .map(|m| (m.name.clone(), m.clone()))
            .collect()
    }
}
