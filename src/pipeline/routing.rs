//! Static stage-to-successor routing, validated once at start-up.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::RoutingConfigError;

use super::descriptor::{ConditionalRule, RuleAction, StageDescriptor};

/// Where the chain goes after a stage produced `output`.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// A conditional rule ended the chain with this payload.
    Terminate { rule_index: usize, payload: Value },
    Advance(String),
    /// The stage has no successor.
    End,
}

#[derive(Debug, Clone)]
struct RouteEntry {
    next: Option<String>,
    rules: Vec<ConditionalRule>,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    entry: String,
    routes: HashMap<String, RouteEntry>,
}

impl RoutingTable {
    /// Rejects duplicate ids, unknown successors, an unknown entry stage and
    /// chains that revisit a stage when the first successor is followed.
    pub fn build(descriptors: &[StageDescriptor], entry: &str) -> Result<Self, RoutingConfigError> {
        if descriptors.is_empty() {
            return Err(RoutingConfigError::Empty);
        }

        let mut routes = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            descriptor.validate()?;
            let route = RouteEntry {
                next: descriptor.next().map(str::to_string),
                rules: descriptor.conditional_rules.clone(),
            };
            if routes.insert(descriptor.name.clone(), route).is_some() {
                return Err(RoutingConfigError::DuplicateStage(descriptor.name.clone()));
            }
        }

        for descriptor in descriptors {
            if let Some(unknown) = descriptor
                .successors
                .iter()
                .find(|successor| !routes.contains_key(successor.as_str()))
            {
                return Err(RoutingConfigError::UnknownSuccessor {
                    stage: descriptor.name.clone(),
                    successor: unknown.clone(),
                });
            }
        }

        if !routes.contains_key(entry) {
            return Err(RoutingConfigError::UnknownEntry(entry.to_string()));
        }

        let table = Self {
            entry: entry.to_string(),
            routes,
        };
        for descriptor in descriptors {
            table.walk(&descriptor.name)?;
        }
        Ok(table)
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.routes.contains_key(stage)
    }

    /// First matching rule wins; otherwise the first successor, if any.
    pub fn next(&self, current: &str, output: &Value) -> Route {
        let Some(route) = self.routes.get(current) else {
            return Route::End;
        };

        if let Some((rule_index, rule)) = route
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(output))
        {
            if rule.action == RuleAction::Terminate {
                return Route::Terminate {
                    rule_index,
                    payload: rule.payload(output),
                };
            }
        }

        match &route.next {
            Some(next) => Route::Advance(next.clone()),
            None => Route::End,
        }
    }

    /// Stage ids visited from the entry stage when no rule fires.
    pub fn chain(&self) -> Vec<String> {
        self.walk(&self.entry).unwrap_or_default()
    }

    fn walk(&self, start: &str) -> Result<Vec<String>, RoutingConfigError> {
        let mut seen = HashSet::new();
        let mut path = Vec::new();
        let mut current = Some(start.to_string());

        while let Some(stage) = current {
            if !seen.insert(stage.clone()) {
                path.push(stage);
                return Err(RoutingConfigError::Cycle(path));
            }
            current = self.routes.get(&stage).and_then(|route| route.next.clone());
            path.push(stage);
        }
        Ok(path)
    }
}
