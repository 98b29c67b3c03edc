//! Traffic routing backends
//!
//! A `Router` reads and writes the primary/canary weight split on one
//! backend's own resource. A `KubernetesRouter` maintains the ClusterIP
//! services (`<target>`, `<target>-primary`, `<target>-canary`) every mesh
//! router points at. `RouterFactory` selects both from configuration
//! strings.

pub mod appmesh;
pub mod factory;
pub mod gloo;
pub mod ingress;
pub mod istio;
pub mod kubernetes;
pub mod nop;
pub mod smi;

use crate::client::ClientError;
use crate::crd::release::Release;
use async_trait::async_trait;
use kube::core::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use std::any::Any;
use thiserror::Error;

pub use factory::RouterFactory;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{kind} {namespace}/{name} has no route to {destination}")]
    MissingRoute {
        kind: &'static str,
        namespace: String,
        name: String,
        destination: String,
    },

    #[error("invalid weights primary={primary} canary={canary}")]
    InvalidWeights { primary: i32, canary: i32 },

    #[error("malformed {kind} {namespace}/{name}: {reason}")]
    Malformed {
        kind: &'static str,
        namespace: String,
        name: String,
        reason: String,
    },
}

/// Primary/canary traffic split in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteWeights {
    pub primary: i32,
    pub canary: i32,
}

impl RouteWeights {
    pub fn new(primary: i32, canary: i32) -> Result<Self, RouterError> {
        let weights = Self { primary, canary };
        weights.validate()?;
        Ok(weights)
    }

    /// Split with `canary` percent to the canary, the rest to the primary
    pub fn canary(canary: i32) -> Result<Self, RouterError> {
        if !(0..=100).contains(&canary) {
            return Err(RouterError::InvalidWeights {
                primary: 100i32.saturating_sub(canary),
                canary,
            });
        }
        Self::new(100 - canary, canary)
    }

    /// Whether the split can be expressed by a single canary percentage
    pub fn is_complementary(&self) -> bool {
        i64::from(self.primary) + i64::from(self.canary) == 100
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        let in_range = |w: i32| (0..=100).contains(&w);
        if in_range(self.primary) && in_range(self.canary) {
            Ok(())
        } else {
            Err(RouterError::InvalidWeights {
                primary: self.primary,
                canary: self.canary,
            })
        }
    }
}

#[async_trait]
pub trait Router: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_routes(&self, release: &Release) -> Result<RouteWeights, RouterError>;

    /// Replace the split in a single write to the backend resource
    async fn set_routes(&self, release: &Release, weights: RouteWeights) -> Result<(), RouterError>;

    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
pub trait KubernetesRouter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create or update the apex, primary and canary services
    async fn reconcile(&self, release: &Release) -> Result<(), RouterError>;

    fn as_any(&self) -> &dyn Any;
}

/// Names derived from a release's target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub namespace: String,
    pub apex: String,
    pub primary: String,
    pub canary: String,
}

impl Targets {
    pub fn of(release: &Release) -> Self {
        let apex = release.spec.target_ref.name.clone();
        Self {
            namespace: release.namespace().unwrap_or_default(),
            primary: format!("{apex}-primary"),
            canary: format!("{apex}-canary"),
            apex,
        }
    }
}

/// Weight of a route entry, accepting integers and integer strings
pub(crate) fn parse_weight(value: Option<&Value>) -> Option<i32> {
    match value? {
        Value::Number(n) => n.as_i64().and_then(|w| i32::try_from(w).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Location and shape of the weighted destinations inside a backend resource
pub(crate) struct WeightedRoutes {
    pub kind: &'static str,
    /// JSON pointer to the array of weighted entries
    pub pointer: &'static str,
    /// Destination name of an entry
    pub destination: fn(&Value) -> Option<&str>,
    /// Weight encoding used by the backend
    pub encode: fn(i32) -> Value,
}

impl WeightedRoutes {
    fn entries<'a>(&self, object: &'a DynamicObject) -> Result<&'a Vec<Value>, RouterError> {
        object
            .data
            .pointer(self.pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| self.malformed(object))
    }

    fn malformed(&self, object: &DynamicObject) -> RouterError {
        RouterError::Malformed {
            kind: self.kind,
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
            reason: format!("{} is not a list", self.pointer),
        }
    }

    fn missing(&self, object: &DynamicObject, destination: &str) -> RouterError {
        RouterError::MissingRoute {
            kind: self.kind,
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
            destination: destination.to_string(),
        }
    }

    /// Read the split; an entry without a weight counts as 0
    pub fn read(
        &self,
        object: &DynamicObject,
        primary: &str,
        canary: &str,
    ) -> Result<RouteWeights, RouterError> {
        let entries = self.entries(object)?;
        let weight_of = |name: &str| {
            entries
                .iter()
                .find(|entry| (self.destination)(*entry) == Some(name))
                .map(|entry| parse_weight(entry.get("weight")).unwrap_or(0))
                .ok_or_else(|| self.missing(object, name))
        };
        Ok(RouteWeights {
            primary: weight_of(primary)?,
            canary: weight_of(canary)?,
        })
    }

    /// Overwrite both weights in place; nothing is changed if either entry is missing
    pub fn write(
        &self,
        object: &mut DynamicObject,
        primary: &str,
        canary: &str,
        weights: RouteWeights,
    ) -> Result<(), RouterError> {
        let entries = self.entries(object)?;
        for name in [primary, canary] {
            if !entries
                .iter()
                .any(|entry| (self.destination)(entry) == Some(name))
            {
                return Err(self.missing(object, name));
            }
        }

        let Some(entries) = object
            .data
            .pointer_mut(self.pointer)
            .and_then(Value::as_array_mut)
        else {
            return Err(self.malformed(object));
        };
        for entry in entries.iter_mut() {
            let weight = match (self.destination)(entry) {
                Some(name) if name == primary => weights.primary,
                Some(name) if name == canary => weights.canary,
                _ => continue,
            };
            if let Some(fields) = entry.as_object_mut() {
                fields.insert("weight".to_string(), (self.encode)(weight));
            }
        }
        Ok(())
    }
}

/// Integer weight encoding
pub(crate) fn integer_weight(weight: i32) -> Value {
    Value::from(weight)
}
