//! Boundary to the pipeline-schema collaborator.
//!
//! Forwarding pipelines expose tables, actions and counters under symbolic
//! names; the device protocol speaks numeric ids. Parsing the pipeline
//! metadata (p4info) is an external concern; this module only holds the
//! resolved catalog and answers lookups, which the control plane performs
//! once per symbolic reference at startup to build its static configuration.

use std::collections::HashMap;

use crate::errors::SchemaError;

/// Resolved symbolic-name -> numeric-id catalog for one pipeline.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    counters: HashMap<String, u32>,
    tables: HashMap<String, u32>,
    actions: HashMap<String, u32>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counter(mut self, name: impl Into<String>, id: u32) -> Self {
        self.counters.insert(name.into(), id);
        self
    }

    pub fn with_table(mut self, name: impl Into<String>, id: u32) -> Self {
        self.tables.insert(name.into(), id);
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, id: u32) -> Self {
        self.actions.insert(name.into(), id);
        self
    }

    pub fn counter_id(&self, name: &str) -> Result<u32, SchemaError> {
        self.counters
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownCounter(name.to_string()))
    }

    pub fn table_id(&self, name: &str) -> Result<u32, SchemaError> {
        self.tables
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    pub fn action_id(&self, name: &str) -> Result<u32, SchemaError> {
        self.actions
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownAction(name.to_string()))
    }
}

/// Catalog matching the simulated fabric's built-in pipeline. The demo
/// binary and the test suite resolve against this.
pub fn sim_catalog() -> SchemaCatalog {
    SchemaCatalog::new()
        .with_counter("MyIngress.icmp_counter", 0x1201)
        .with_counter("MyIngress.port_counter", 0x1202)
        .with_table("MyIngress.ipv4_lpm", 0x2101)
        .with_action("MyIngress.ipv4_forward", 0x3101)
        .with_action("MyIngress.drop", 0x3102)
}
