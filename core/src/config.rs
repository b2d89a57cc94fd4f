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

//! Compiler configuration: schema, feature flags and operator support.

use crate::builtins::Registry;
use crate::operations::{OperationValidator, StandardOperations};
use crate::schema::ResourceSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Optional compiler behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Bound implicit resource fields compile to `createResource` calls.
    ImplicitResourceCreation,
    /// Field suggestions include private fields and resources.
    AssetContext,
    /// Default-field blocks also report the resource's context resource.
    ResourceContext,
    /// Compiling code without entrypoints is an error.
    FailIfNoEntryPoints,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<Feature>);

impl FeatureSet {
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Self {
        FeatureSet(features.into_iter().collect())
    }

    pub fn is_active(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    pub fn enable(&mut self, feature: Feature) {
        self.0.insert(feature);
    }
}

#[derive(Clone)]
pub struct CompilerConfig {
    pub schema: Arc<dyn ResourceSchema>,
    pub features: FeatureSet,
    pub operations: Arc<dyn OperationValidator>,
    pub registry: Arc<Registry>,
}

impl CompilerConfig {
    pub fn new(schema: Arc<dyn ResourceSchema>, features: FeatureSet) -> Self {
        CompilerConfig {
            schema,
            features,
            operations: Arc::new(StandardOperations),
            registry: Arc::new(Registry::standard()),
        }
    }

    pub fn with_operations(mut self, operations: Arc<dyn OperationValidator>) -> Self {
        self.operations = operations;
        self
    }

    pub fn is_active(&self, feature: Feature) -> bool {
        self.features.is_active(feature)
    }
}

impl std::fmt::Debug for CompilerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerConfig")
            .field("resources", &self.schema.resource_names().len())
            .field("features", &self.features)
            .finish()
    }
}
