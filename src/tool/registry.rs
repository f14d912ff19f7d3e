//! Immutable registry of tools
//!
//! Built once from the tool table at startup; each entry pairs the definition
//! with its compiled argument validator. Lookups are lock-free reads.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use tracing::{debug, info};

use super::definition::{
    ParameterLocation, SecurityScheme, ServerIdentity, ToolDefinition, ToolTable,
};
use super::schema::CompiledSchema;
use crate::protocol::Tool;
use crate::{Error, Result};

/// Tool table shipped with the binary
pub const BUILTIN_TOOLS: &str = include_str!("../../tools/bitcoin-indexer.yaml");

/// A definition plus its compiled validator
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    /// Static definition from the tool table
    pub definition: ToolDefinition,
    /// Compiled argument validator
    pub validator: CompiledSchema,
}

/// Registry of every advertised tool
#[derive(Debug)]
pub struct ToolRegistry {
    server: ServerIdentity,
    base_url: String,
    schemes: BTreeMap<String, SecurityScheme>,
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Load the table at `path`, or the built-in table when `None`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the table is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read tool table {}: {e}", path.display()))
                })?;
                info!(path = %path.display(), "Loading tool table");
                Self::from_yaml(&raw)
            }
            None => Self::from_yaml(BUILTIN_TOOLS),
        }
    }

    /// Parse and index a YAML tool table
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the table is inconsistent.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let table: ToolTable = serde_yaml::from_str(raw)?;
        Self::from_table(table)
    }

    /// Index an already-parsed table
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when two tools share a name, a path
    /// placeholder has no path parameter, or a requirement names an
    /// undeclared scheme.
    pub fn from_table(table: ToolTable) -> Result<Self> {
        let mut index = HashMap::with_capacity(table.tools.len());
        let mut tools = Vec::with_capacity(table.tools.len());

        for (position, definition) in table.tools.into_iter().enumerate() {
            check_definition(&definition, &table.security_schemes)?;
            if index.insert(definition.name.clone(), position).is_some() {
                return Err(Error::Config(format!(
                    "Duplicate tool name '{}'",
                    definition.name
                )));
            }
            let validator =
                CompiledSchema::compile_or_permissive(&definition.name, &definition.input_schema);
            debug!(tool = %definition.name, method = %definition.method, path = %definition.path, "Registered tool");
            tools.push(RegisteredTool {
                definition,
                validator,
            });
        }

        info!(tools = tools.len(), server = %table.server.name, "Tool registry ready");

        Ok(Self {
            server: table.server,
            base_url: table.base_url,
            schemes: table.security_schemes,
            tools,
            index,
        })
    }

    /// Look up a tool by name
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Advertised tools, in table order
    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|t| Tool {
                name: t.definition.name.clone(),
                description: Some(t.definition.description.clone()),
                input_schema: t.definition.input_schema.clone(),
            })
            .collect()
    }

    /// Registered tools in table order
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.tools.iter()
    }

    /// Declared security schemes
    #[must_use]
    pub fn schemes(&self) -> &BTreeMap<String, SecurityScheme> {
        &self.schemes
    }

    /// Upstream root URL from the table
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Server identity from the table
    #[must_use]
    pub fn server(&self) -> &ServerIdentity {
        &self.server
    }

    /// Number of tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn check_definition(
    definition: &ToolDefinition,
    schemes: &BTreeMap<String, SecurityScheme>,
) -> Result<()> {
    let path_params: HashSet<&str> = definition
        .parameters_in(ParameterLocation::Path)
        .map(|p| p.name.as_str())
        .collect();
    if let Some(missing) = definition
        .path_placeholders()
        .into_iter()
        .find(|placeholder| !path_params.contains(placeholder))
    {
        return Err(Error::Config(format!(
            "Tool '{}': path placeholder '{{{missing}}}' has no path parameter",
            definition.name
        )));
    }

    if let Some(unknown) = definition
        .security
        .iter()
        .flat_map(|requirement| requirement.keys())
        .find(|scheme| !schemes.contains_key(*scheme))
    {
        return Err(Error::Config(format!(
            "Tool '{}': security scheme '{unknown}' is not declared",
            definition.name
        )));
    }
    Ok(())
}
