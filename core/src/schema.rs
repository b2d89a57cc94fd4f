/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Ark Sovereign Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! Resource schema: what resources exist, their fields and constructors.
//!
//! The compiler only reads the schema through [`ResourceSchema`]. [`Schema`]
//! is the in-memory implementation, loadable from JSON.

use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub typ: Type,
    pub title: String,
    pub desc: String,
    pub is_private: bool,
    pub is_embedded: bool,
    pub is_implicit_resource: bool,
    pub min_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedArg {
    pub name: String,
    #[serde(rename = "type")]
    pub typ: Type,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Init {
    pub args: Vec<TypedArg>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceInfo {
    pub id: String,
    pub name: String,
    pub title: String,
    pub desc: String,
    pub fields: BTreeMap<String, Field>,
    pub init: Option<Init>,
    pub list_type: Option<Type>,
    pub private: bool,
    /// Query source compiled into the default-field block when the resource
    /// is returned as a whole.
    pub defaults: String,
    /// Resource that describes where this one came from.
    pub context: String,
    pub min_version: String,
}

impl ResourceInfo {
    pub fn has_empty_init(&self) -> bool {
        self.init.as_ref().map_or(true, |init| init.args.is_empty())
    }

    pub fn is_list(&self) -> bool {
        self.list_type.is_some()
    }
}

/// Read access to the resource registry.
pub trait ResourceSchema: Send + Sync {
    fn lookup(&self, name: &str) -> Option<&ResourceInfo>;

    /// Names of all resources, sorted.
    fn resource_names(&self) -> Vec<&str>;

    fn lookup_field(&self, resource: &str, field: &str) -> (Option<&ResourceInfo>, Option<&Field>) {
        match self.lookup(resource) {
            Some(info) => (Some(info), info.fields.get(field)),
            None => (None, None),
        }
    }

    /// Finds `field` on the resource or, breadth first, on the resources of
    /// its embedded fields. Returns the field path and the fields along it.
    fn find_field<'a>(&'a self, resource: &'a ResourceInfo, field: &str) -> Option<(Vec<String>, Vec<&'a Field>)> {
        if let Some(f) = resource.fields.get(field) {
            return Some((vec![f.name.clone()], vec![f]));
        }
        for embedded in resource.fields.values().filter(|f| f.is_embedded) {
            let Some(child) = embedded.typ.resource_name().and_then(|n| self.lookup(n)) else {
                continue;
            };
            if child.name == resource.name {
                continue;
            }
            if let Some((mut path, mut fields)) = self.find_field(child, field) {
                path.insert(0, embedded.name.clone());
                fields.insert(0, embedded);
                return Some((path, fields));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub resources: BTreeMap<String, ResourceInfo>,
}

impl Schema {
    /// Loads a schema from JSON. Names missing on resources and fields are
    /// filled in from their map keys.
    pub fn from_json(json: &str) -> Result<Schema, serde_json::Error> {
        let mut schema: Schema = serde_json::from_str(json)?;
        schema.normalize();
        Ok(schema)
    }

    pub fn normalize(&mut self) {
        for (name, info) in self.resources.iter_mut() {
            if info.name.is_empty() {
                info.name = name.clone();
            }
            if info.id.is_empty() {
                info.id = name.clone();
            }
            for (field_name, field) in info.fields.iter_mut() {
                if field.name.is_empty() {
                    field.name = field_name.clone();
                }
            }
        }
    }
}

impl ResourceSchema for Schema {
    fn lookup(&self, name: &str) -> Option<&ResourceInfo> {
        self.resources.get(name)
    }

    fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Schema;
    use serde_json::json;

    /// A small schema shaped like the real asset resources.
    pub(crate) fn test_schema() -> Schema {
        let doc = json!({
            "resources": {
                "mondoo": {
                    "title": "Mondoo client",
                    "fields": {
                        "version": {"type": "string", "title": "Version"},
                        "build": {"type": "string"},
                        "jobEnvironment": {"type": "dict", "min_version": "5.15.0"}
                    }
                },
                "asset": {
                    "fields": {
                        "name": {"type": "string"},
                        "platform": {"type": "string"},
                        "ids": {"type": "[]string"}
                    }
                },
                "sshd": {
                    "fields": {
                        "config": {"type": "sshd.config", "is_implicit_resource": true}
                    }
                },
                "sshd.config": {
                    "title": "SSH server configuration",
                    "init": {"args": [{"name": "path", "type": "string"}]},
                    "fields": {
                        "file": {"type": "file"},
                        "params": {"type": "map[string]string"},
                        "ciphers": {"type": "[]string"}
                    }
                },
                "file": {
                    "init": {"args": [{"name": "path", "type": "string"}]},
                    "defaults": "path size",
                    "fields": {
                        "path": {"type": "string"},
                        "content": {"type": "string"},
                        "exists": {"type": "bool"},
                        "size": {"type": "int"}
                    }
                },
                "users": {
                    "list_type": "user",
                    "fields": {
                        "list": {"type": "[]user"}
                    }
                },
                "user": {
                    "defaults": "name uid",
                    "fields": {
                        "name": {"type": "string"},
                        "uid": {"type": "int"},
                        "gid": {"type": "int"},
                        "enabled": {"type": "bool"},
                        "authorizedkeys": {"type": "authorizedkeys", "is_implicit_resource": true}
                    }
                },
                "authorizedkeys": {
                    "fields": {
                        "file": {"type": "file"}
                    }
                },
                "packages": {
                    "list_type": "package",
                    "fields": {
                        "list": {"type": "[]package"},
                        "summary": {"type": "string"}
                    }
                },
                "package": {
                    "defaults": "name version",
                    "context": "file",
                    "fields": {
                        "name": {"type": "string"},
                        "version": {"type": "string"},
                        "installed": {"type": "bool"}
                    }
                },
                "machine": {
                    "fields": {
                        "os": {"type": "os.base", "is_embedded": true},
                        "serial": {"type": "string"}
                    }
                },
                "os.base": {
                    "fields": {
                        "hostname": {"type": "string"},
                        "uptime": {"type": "time"}
                    }
                },
                "json": {
                    "init": {"args": [{"name": "path", "type": "string"}]},
                    "fields": {
                        "params": {"type": "dict"}
                    }
                },
                "parse": {},
                "platform": {
                    "title": "Platform information",
                    "fields": {
                        "name": {"type": "string"},
                        "arch": {"type": "string"},
                        "family": {"type": "[]string"}
                    }
                },
                "platform.eol": {"title": "End of life"},
                "platform.advisories": {"min_version": "6.1.0", "fields": {"cvss": {"type": "dict"}}},
                "platform.internals": {"private": true}
            }
        });
        let mut schema: Schema = serde_json::from_value(doc).expect("test schema is valid");
        schema.normalize();
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::test_schema;
    use super::*;

    #[test]
    fn test_normalize_fills_names() {
        let schema = test_schema();
        let info = schema.lookup("sshd.config").unwrap();
        assert_eq!(info.name, "sshd.config");
        assert_eq!(info.fields["params"].name, "params");
        assert!(!info.has_empty_init());
        assert!(schema.lookup("mondoo").unwrap().has_empty_init());
    }

    #[test]
    fn test_find_field_through_embedded() {
        let schema = test_schema();
        let machine = schema.lookup("machine").unwrap();
        let (path, fields) = schema.find_field(machine, "hostname").unwrap();
        assert_eq!(path, vec!["os", "hostname"]);
        assert_eq!(fields.last().unwrap().typ, Type::String);
        assert!(schema.find_field(machine, "nope").is_none());
    }

    #[test]
    fn test_lookup_field() {
        let schema = test_schema();
        let (res, field) = schema.lookup_field("users", "list");
        assert!(res.is_some());
        assert_eq!(field.unwrap().typ, Type::array(Type::resource("user")));
        assert_eq!(schema.lookup_field("nope", "list"), (None, None));
    }

    #[test]
    fn test_from_json() {
        let schema = Schema::from_json(r#"{"resources": {"x": {"fields": {"y": {"type": "[]int"}}}}}"#).unwrap();
        assert_eq!(schema.resource_names(), vec!["x"]);
        assert_eq!(schema.resources["x"].fields["y"].name, "y");
    }
}
