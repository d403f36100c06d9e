use mcpd_core::DaemonError;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use toml_edit::{DocumentMut, Item, Value};

/// Per-server runtime variables: env, args, and volume mappings.
///
/// Kept separate from the declarative server list for secret-handling
/// hygiene. The file is held as a [`DocumentMut`] so saving preserves
/// formatting, comments, and the `rawVolumes` entries byte-identically;
/// expanded volume paths are derived on load and never persisted.
#[derive(Debug, Clone)]
pub struct RuntimeVars {
    doc: DocumentMut,
}

/// Resolved variables for one server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerVars {
    pub env: HashMap<String, String>,
    pub args: Vec<String>,
    /// Source-of-truth volume entries, `logical:raw-path` form.
    pub raw_volumes: Vec<String>,
    /// Logical name → expanded host path, derived from `raw_volumes`.
    pub volumes: BTreeMap<String, String>,
}

impl RuntimeVars {
    /// Load the runtime-vars file. A missing file yields an empty set.
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        if !path.exists() {
            return Ok(Self {
                doc: DocumentMut::new(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|error| {
            DaemonError::config_invalid(format!(
                "failed to read runtime-vars file {}: {error}",
                path.display()
            ))
        })?;
        Self::parse(&raw).map_err(|error| {
            DaemonError::config_invalid(format!(
                "failed to parse runtime-vars file {}: {error}",
                path.display()
            ))
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml_edit::TomlError> {
        Ok(Self {
            doc: raw.parse::<DocumentMut>()?,
        })
    }

    /// Serialize back; unchanged input round-trips byte-identically.
    pub fn to_toml(&self) -> String {
        self.doc.to_string()
    }

    pub fn save(&self, path: &Path) -> Result<(), DaemonError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                DaemonError::internal(format!(
                    "failed to create runtime-vars directory {}: {error}",
                    parent.display()
                ))
            })?;
        }
        std::fs::write(path, self.to_toml()).map_err(|error| {
            DaemonError::internal(format!(
                "failed to write runtime-vars file {}: {error}",
                path.display()
            ))
        })
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers_table()
            .map(|table| table.iter().map(|(key, _)| key.to_string()).collect())
            .unwrap_or_default()
    }

    /// Variables for one server; unknown servers get the empty set.
    pub fn vars_for(&self, name: &str) -> ServerVars {
        let Some(server) = self
            .servers_table()
            .and_then(|table| table.get(name))
            .and_then(Item::as_table_like)
        else {
            return ServerVars::default();
        };

        let env = server
            .get("env")
            .and_then(Item::as_table_like)
            .map(|table| {
                table
                    .iter()
                    .filter_map(|(key, item)| {
                        item.as_str().map(|value| (key.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let args = string_array(server.get("args"));
        let raw_volumes = string_array(server.get("rawVolumes"));
        let volumes = derive_volumes(&raw_volumes, |key| std::env::var(key).ok());

        ServerVars {
            env,
            args,
            raw_volumes,
            volumes,
        }
    }

    fn servers_table(&self) -> Option<&dyn toml_edit::TableLike> {
        self.doc.get("servers").and_then(Item::as_table_like)
    }
}

fn string_array(item: Option<&Item>) -> Vec<String> {
    item.and_then(Item::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Split `logical:raw-path` entries and expand `${VAR}` placeholders.
///
/// Entries without a separator are skipped with a warning; a
/// placeholder whose variable is unset stays as written.
fn derive_volumes(
    raw_volumes: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> BTreeMap<String, String> {
    let mut volumes = BTreeMap::new();
    for raw in raw_volumes {
        let Some((logical, raw_path)) = raw.split_once(':') else {
            tracing::warn!(volume = %raw, "skipping volume entry without 'name:path' separator");
            continue;
        };
        volumes.insert(logical.to_string(), expand_placeholders(raw_path, &lookup));
    }
    volumes
}

fn expand_placeholders(raw: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
