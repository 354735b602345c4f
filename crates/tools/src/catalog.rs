//! The table of tools the broker knows about.
//!
//! Adding a tool is a data entry here: its worker identifier, the spellings a
//! model may use for it, argument repairs, field checks, reshaping rules, and
//! the declaration shown to the model.

use proto::ToolDefinition;
use serde_json::{Map, Value, json};

/// Shape an argument value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Map,
    Sequence,
    /// A sequence whose items are all non-empty strings.
    StringList,
}

impl FieldKind {
    fn schema(self) -> Value {
        match self {
            FieldKind::String => json!({ "type": "string" }),
            FieldKind::Number => json!({ "type": "number" }),
            FieldKind::Boolean => json!({ "type": "boolean" }),
            FieldKind::Map => json!({ "type": "object" }),
            FieldKind::Sequence => json!({ "type": "array" }),
            FieldKind::StringList => json!({ "type": "array", "items": { "type": "string" } }),
        }
    }
}

/// Validation record for one argument.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Strings must not be blank; maps and sequences must have entries.
    pub non_empty: bool,
    pub description: &'static str,
}

/// Structural rewrite applied to a tool's arguments before serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reshape {
    /// Folds top-level keys other than `reserved` into the nested `properties`
    /// map. Entries already present in `properties` win.
    MergeProperties { reserved: &'static [&'static str] },
    /// Lowercases `X`/`Y`/`Z` keys of coordinate maps inside `properties` and
    /// turns 3-number sequences there into `{x, y, z}` maps.
    NormalizeCoordinates,
}

/// How the worker runs a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Run by the worker's scripting layer through [`SCRIPTED_TOOL_VERB`].
    Scripted,
    /// Implemented natively by the worker; arguments are sent as structured data.
    Native,
}

/// Worker verb that runs a discovered scripted tool by name.
pub const SCRIPTED_TOOL_VERB: &str = "execute_discovered_luau_tool";

/// One catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    /// Exact identifier the worker's tool registry expects.
    pub canonical: &'static str,
    /// Name declared to the model.
    pub model_name: &'static str,
    /// Additional accepted spellings, already in normalized form.
    pub aliases: &'static [&'static str],
    /// `(alternate, canonical)` argument key renames.
    pub key_repairs: &'static [(&'static str, &'static str)],
    pub fields: &'static [FieldSpec],
    pub reshape: &'static [Reshape],
    pub dispatch: Dispatch,
    pub description: &'static str,
}

impl ToolSpec {
    /// JSON schema of the accepted arguments, derived from `fields`.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields {
            let mut schema = field.kind.schema();
            if let Value::Object(map) = &mut schema {
                map.insert("description".to_string(), json!(field.description));
            }
            properties.insert(field.name.to_string(), schema);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Declaration handed to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.model_name, self.description, self.parameters_schema())
    }

    fn answers_to(&self, normalized: &str) -> bool {
        normalize_name(self.canonical) == normalized
            || normalize_name(self.model_name) == normalized
            || self.aliases.contains(&normalized)
    }
}

const PATH_FIELD: FieldSpec = FieldSpec {
    name: "path",
    kind: FieldKind::String,
    required: true,
    non_empty: true,
    description: "The path to the instance, e.g., 'Workspace.Baseplate'.",
};

const CREATE_RESERVED: &[&str] = &["class_name", "parent", "properties"];
const SET_RESERVED: &[&str] = &["path", "properties"];

/// Every tool the broker validates and canonicalizes.
pub static CATALOG: &[ToolSpec] = &[
    ToolSpec {
        canonical: "RunCode",
        model_name: "run_code",
        aliases: &["runcommand", "executecode", "runluau"],
        key_repairs: &[("command", "code"), ("source", "code")],
        fields: &[FieldSpec {
            name: "code",
            kind: FieldKind::String,
            required: true,
            non_empty: true,
            description: "The Luau code to execute. Must be valid Luau syntax.",
        }],
        reshape: &[],
        dispatch: Dispatch::Scripted,
        description: "Executes a string of Luau code directly within Roblox Studio. Use this for \
                      complex or custom actions not covered by other tools. The output from \
                      `print()` statements in the code will be returned.",
    },
    ToolSpec {
        canonical: "insert_model",
        model_name: "insert_model",
        aliases: &["insertasset", "searchandinsertmodel"],
        key_repairs: &[("search_query", "query"), ("search", "query")],
        fields: &[FieldSpec {
            name: "query",
            kind: FieldKind::String,
            required: true,
            non_empty: true,
            description: "A search query for the model, e.g., 'red brick wall', 'low poly tree'.",
        }],
        reshape: &[],
        dispatch: Dispatch::Native,
        description: "Searches the Creator Store for a model and inserts the top result into the \
                      current place. Best for general requests like 'add a tree'.",
    },
    ToolSpec {
        canonical: "GetSelection",
        model_name: "get_selection",
        aliases: &["selection", "getselected"],
        key_repairs: &[],
        fields: &[],
        reshape: &[],
        dispatch: Dispatch::Scripted,
        description: "Returns the names and paths of all instances currently selected in the \
                      editor. Returns an empty list if nothing is selected.",
    },
    ToolSpec {
        canonical: "GetProperties",
        model_name: "get_properties",
        aliases: &["getproperty", "readproperties"],
        key_repairs: &[("instance_path", "path"), ("property_names", "properties")],
        fields: &[
            PATH_FIELD,
            FieldSpec {
                name: "properties",
                kind: FieldKind::StringList,
                required: true,
                non_empty: true,
                description: "Property names to retrieve, e.g., ['Color', 'Size', 'Position'].",
            },
        ],
        reshape: &[],
        dispatch: Dispatch::Scripted,
        description: "Retrieves the specified properties of a given instance.",
    },
    ToolSpec {
        canonical: "SetProperties",
        model_name: "set_properties",
        aliases: &["setproperty", "updateproperties"],
        key_repairs: &[("instance_path", "path")],
        fields: &[
            PATH_FIELD,
            FieldSpec {
                name: "properties",
                kind: FieldKind::Map,
                required: true,
                non_empty: true,
                description: "Property names and their new values, e.g., \
                              {'Color': {'r': 1, 'g': 0, 'b': 0}, 'Anchored': true}.",
            },
        ],
        reshape: &[
            Reshape::MergeProperties {
                reserved: SET_RESERVED,
            },
            Reshape::NormalizeCoordinates,
        ],
        dispatch: Dispatch::Scripted,
        description: "Sets one or more properties of a given instance.",
    },
    ToolSpec {
        canonical: "CreateInstance",
        model_name: "create_instance",
        aliases: &["newinstance", "instancenew"],
        key_repairs: &[("ClassName", "class_name"), ("class", "class_name")],
        fields: &[
            FieldSpec {
                name: "class_name",
                kind: FieldKind::String,
                required: true,
                non_empty: true,
                description: "Class of the instance to create, e.g., 'Part'.",
            },
            FieldSpec {
                name: "parent",
                kind: FieldKind::String,
                required: false,
                non_empty: true,
                description: "Path of the parent instance. Defaults to 'Workspace'.",
            },
            FieldSpec {
                name: "properties",
                kind: FieldKind::Map,
                required: false,
                non_empty: false,
                description: "Initial property values, e.g., {'Size': [4, 1, 2], 'Anchored': true}.",
            },
        ],
        reshape: &[
            Reshape::MergeProperties {
                reserved: CREATE_RESERVED,
            },
            Reshape::NormalizeCoordinates,
        ],
        dispatch: Dispatch::Scripted,
        description: "Creates a new instance of the given class, optionally setting its parent \
                      and initial properties.",
    },
    ToolSpec {
        canonical: "DeleteInstance",
        model_name: "delete_instance",
        aliases: &["destroyinstance", "removeinstance"],
        key_repairs: &[("instance_path", "path")],
        fields: &[PATH_FIELD],
        reshape: &[],
        dispatch: Dispatch::Scripted,
        description: "Destroys the instance at the given path.",
    },
];

/// Strips `_`, `-` and whitespace and lowercases.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Finds the catalog entry a (possibly misspelled) tool name refers to.
pub fn lookup(name: &str) -> Option<&'static ToolSpec> {
    let normalized = normalize_name(name);
    CATALOG.iter().find(|spec| spec.answers_to(&normalized))
}

/// Model-facing declarations for every catalog tool.
pub fn definitions() -> Vec<ToolDefinition> {
    CATALOG.iter().map(ToolSpec::definition).collect()
}
