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

//! Completion candidates for unknown identifiers and fields.

use crate::bytecode::Documentation;
use crate::config::{CompilerConfig, Feature};
use crate::schema::ResourceInfo;
use crate::types::Type;
use std::collections::BTreeMap;

fn is_subsequence(query: &str, candidate: &str) -> bool {
    let mut chars = candidate.chars();
    query.chars().all(|q| chars.any(|c| c == q))
}

/// Candidates that contain `query` as a subsequence (case-insensitive).
/// Prefix matches come first in alphabetical order, the rest follow by edit
/// distance.
pub fn find_fuzzy<'a>(query: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let needle = query.to_lowercase();
    let mut prefixed = Vec::new();
    let mut others = Vec::new();
    for cand in candidates {
        let lower = cand.to_lowercase();
        if lower.starts_with(&needle) {
            prefixed.push(cand);
        } else if is_subsequence(&needle, &lower) {
            others.push((strsim::levenshtein(&needle, &lower), cand));
        }
    }
    prefixed.sort_unstable();
    others.sort_unstable();
    prefixed.into_iter().chain(others.into_iter().map(|(_, c)| c)).collect()
}

/// Documentation of the fields a user may see on a resource. Fields of
/// embedded resources are listed as if they were the resource's own.
pub fn public_fields_info(config: &CompilerConfig, info: &ResourceInfo) -> BTreeMap<String, Documentation> {
    let show_private = config.is_active(Feature::AssetContext);
    let mut res = BTreeMap::new();
    for (name, field) in &info.fields {
        if field.is_private && !show_private {
            continue;
        }
        if field.is_embedded {
            let embedded = field.typ.resource_name().and_then(|n| config.schema.lookup(n));
            if let Some(child) = embedded.filter(|c| c.name != info.name) {
                for (k, v) in public_fields_info(config, child) {
                    res.entry(k).or_insert(v);
                }
            }
        }
        res.insert(
            name.clone(),
            Documentation {
                field: name.clone(),
                title: field.title.clone(),
                desc: field.desc.clone(),
            },
        );
    }
    res
}

/// Fields and builtins callable on a value of type `typ`.
pub fn available_fields(config: &CompilerConfig, typ: &Type) -> BTreeMap<String, Documentation> {
    let mut res = config.registry.docs(typ);
    let Some(info) = typ.resource_name().and_then(|n| config.schema.lookup(n)) else {
        return res;
    };
    if let Some(list) = &info.list_type {
        res.extend(config.registry.docs(&Type::array(list.clone())));
    }
    res.extend(public_fields_info(config, info));
    res
}

/// Fields a `*` expands to on a resource, sorted.
pub fn glob_fields(config: &CompilerConfig, typ: &Type) -> Vec<String> {
    let Some(info) = typ.resource_name().and_then(|n| config.schema.lookup(n)) else {
        return Vec::new();
    };
    public_fields_info(config, info).into_keys().collect()
}

/// Resources a user may reference, with their documentation.
pub fn resource_docs(config: &CompilerConfig) -> BTreeMap<String, Documentation> {
    let show_private = config.is_active(Feature::AssetContext);
    config
        .schema
        .resource_names()
        .into_iter()
        .filter_map(|name| config.schema.lookup(name))
        .filter(|info| show_private || !info.private)
        .map(|info| {
            (
                info.name.clone(),
                Documentation {
                    field: info.name.clone(),
                    title: info.title.clone(),
                    desc: info.desc.clone(),
                },
            )
        })
        .collect()
}

/// The entries of `docs` whose keys fuzzily match `query`, best first.
pub fn matching(docs: &BTreeMap<String, Documentation>, query: &str) -> Vec<Documentation> {
    find_fuzzy(query, docs.keys().map(String::as_str))
        .into_iter()
        .filter_map(|k| docs.get(k).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSet;
    use crate::schema::testutil::test_schema;
    use std::sync::Arc;

    fn config(features: FeatureSet) -> CompilerConfig {
        CompilerConfig::new(Arc::new(test_schema()), features)
    }

    #[test]
    fn test_find_fuzzy_orders_prefixes_first() {
        let cands = ["platform.eol", "platform", "sshd", "packages", "parse"];
        assert_eq!(find_fuzzy("pla", cands), vec!["platform", "platform.eol"]);
        assert_eq!(find_fuzzy("pkg", ["packages", "pkgs"]), vec!["pkgs", "packages"]);
        assert!(find_fuzzy("zz", cands).is_empty());
    }

    #[test]
    fn test_find_fuzzy_empty_query_lists_all() {
        assert_eq!(find_fuzzy("", ["b", "a"]), vec!["a", "b"]);
    }

    #[test]
    fn test_embedded_fields_are_public() {
        let cfg = config(FeatureSet::default());
        let machine = cfg.schema.lookup("machine").unwrap();
        let docs = public_fields_info(&cfg, machine);
        assert!(docs.contains_key("hostname"));
        assert!(docs.contains_key("serial"));
    }

    #[test]
    fn test_list_resources_offer_array_builtins() {
        let cfg = config(FeatureSet::default());
        let docs = available_fields(&cfg, &Type::resource("users"));
        assert!(docs.contains_key("list"));
        assert!(docs.contains_key("where"));
        assert!(docs.contains_key("duplicates"));
    }

    #[test]
    fn test_private_resources_need_asset_context() {
        let hidden = resource_docs(&config(FeatureSet::default()));
        assert!(!hidden.contains_key("platform.internals"));
        let shown = resource_docs(&config(FeatureSet::new([Feature::AssetContext])));
        assert!(shown.contains_key("platform.internals"));
    }
}
