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

use mqlc::{compile, CompilerConfig, Feature, FeatureSet, Primitive, Schema};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

const USAGE: &str = "Usage: mqlc <schema.json> <query> [--feature NAME]... [--props props.json]";

struct Args {
    schema: String,
    query: String,
    features: FeatureSet,
    props: Option<String>,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut features = FeatureSet::default();
    let mut props = None;

    let mut it = raw.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--feature" => {
                let name = it.next().ok_or("--feature needs a name")?;
                let feature: Feature = serde_json::from_value(serde_json::Value::String(name.clone()))
                    .map_err(|_| format!("unknown feature '{name}'"))?;
                features.enable(feature);
            }
            "--props" => props = Some(it.next().ok_or("--props needs a file")?.clone()),
            _ => positional.push(arg.clone()),
        }
    }

    let [schema, query]: [String; 2] = positional.try_into().map_err(|_| USAGE.to_string())?;
    Ok(Args {
        schema,
        query,
        features,
        props,
    })
}

fn run(args: Args) -> Result<String, String> {
    let json = fs::read_to_string(&args.schema).map_err(|e| format!("cannot read {}: {e}", args.schema))?;
    let schema = Schema::from_json(&json).map_err(|e| format!("invalid schema {}: {e}", args.schema))?;

    let props: BTreeMap<String, Primitive> = match &args.props {
        Some(path) => {
            let json = fs::read_to_string(path).map_err(|e| format!("cannot read {path}: {e}"))?;
            serde_json::from_str(&json).map_err(|e| format!("invalid props {path}: {e}"))?
        }
        None => BTreeMap::new(),
    };

    let config = CompilerConfig::new(Arc::new(schema), args.features);
    log::debug!("compiling with {config:?}");
    let bundle = compile(&args.query, &props, &config).map_err(|failure| {
        let mut msg = format!("error: {}", failure.error);
        if let Some(bundle) = failure.bundle.filter(|b| !b.suggestions.is_empty()) {
            let fields: Vec<&str> = bundle.suggestions.iter().map(|d| d.field.as_str()).collect();
            msg.push_str(&format!("\nsuggestions: {}", fields.join(", ")));
        }
        msg
    })?;
    serde_json::to_string_pretty(&bundle).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    env_logger::init();
    let raw: Vec<String> = env::args().skip(1).collect();

    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };
    match run(args) {
        Ok(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}
