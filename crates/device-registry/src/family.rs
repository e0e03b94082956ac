use crate::{Capability, DeviceDescriptor, DriverConstructionError, NodeContext, PropValue};
use std::collections::BTreeMap;

/// Declared type (and range) of one family property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    Int { default: i64, min: i64, max: i64 },
    Bool { default: bool },
    Text { default: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: PropertyKind,
}

impl PropertySpec {
    pub fn int(name: &'static str, default: i64, min: i64, max: i64) -> Self {
        Self {
            name,
            kind: PropertyKind::Int { default, min, max },
        }
    }

    pub fn flag(name: &'static str, default: bool) -> Self {
        Self {
            name,
            kind: PropertyKind::Bool { default },
        }
    }

    pub fn text(name: &'static str, default: impl Into<String>) -> Self {
        Self {
            name,
            kind: PropertyKind::Text {
                default: default.into(),
            },
        }
    }

    pub fn default_value(&self) -> PropValue {
        match &self.kind {
            PropertyKind::Int { default, .. } => PropValue::Int(*default),
            PropertyKind::Bool { default } => PropValue::Bool(*default),
            PropertyKind::Text { default } => PropValue::Text(default.clone()),
        }
    }
}

pub type DriverFactory = Box<
    dyn Fn(&DeviceDescriptor, &NodeContext) -> Result<Box<dyn Capability>, DriverConstructionError>,
>;

struct Family {
    properties: Vec<PropertySpec>,
    factory: DriverFactory,
}

/// Driver families known to this node, keyed by `DeviceType`.
///
/// Families register at runtime; a manifest entry whose type is not registered
/// is kept but never instantiated.
#[derive(Default)]
pub struct FamilyRegistry {
    families: BTreeMap<String, Family>,
}

impl FamilyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a family.
    pub fn register<F>(
        &mut self,
        device_type: impl Into<String>,
        properties: Vec<PropertySpec>,
        factory: F,
    ) where
        F: Fn(&DeviceDescriptor, &NodeContext) -> Result<Box<dyn Capability>, DriverConstructionError>
            + 'static,
    {
        let device_type = device_type.into();
        tracing::debug!(%device_type, "registering driver family");
        self.families.insert(
            device_type,
            Family {
                properties,
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, device_type: &str) -> bool {
        self.families.contains_key(device_type)
    }

    /// Property schema for a family; empty for unknown types.
    pub fn properties(&self, device_type: &str) -> &[PropertySpec] {
        self.families
            .get(device_type)
            .map(|f| f.properties.as_slice())
            .unwrap_or(&[])
    }

    /// Registered types in sorted order.
    pub fn device_types(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn construct(
        &self,
        descriptor: &DeviceDescriptor,
        ctx: &NodeContext,
    ) -> Result<Box<dyn Capability>, DriverConstructionError> {
        let family = self
            .families
            .get(&descriptor.device_type)
            .ok_or_else(|| DriverConstructionError::UnknownType(descriptor.identity()))?;
        (family.factory)(descriptor, ctx)
    }
}

impl core::fmt::Debug for FamilyRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.families.keys()).finish()
    }
}

/// Accessors for factories. They turn a missing or ill-typed entry into the
/// matching construction error.
impl DeviceDescriptor {
    pub fn require_pin(&self, name: &str) -> Result<i32, DriverConstructionError> {
        self.pin(name)
            .ok_or_else(|| DriverConstructionError::MissingPin {
                identity: self.identity(),
                pin: name.to_string(),
            })
    }

    pub fn require_int(&self, name: &str) -> Result<i64, DriverConstructionError> {
        match self.properties.get(name) {
            Some(PropValue::Int(v)) => Ok(*v),
            other => Err(self.invalid_property(name, other, "integer")),
        }
    }

    pub fn require_bool(&self, name: &str) -> Result<bool, DriverConstructionError> {
        match self.properties.get(name) {
            Some(PropValue::Bool(v)) => Ok(*v),
            other => Err(self.invalid_property(name, other, "boolean")),
        }
    }

    pub fn text_or(&self, name: &str, fallback: &str) -> String {
        self.properties
            .get(name)
            .map(ToString::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }

    fn invalid_property(
        &self,
        name: &str,
        found: Option<&PropValue>,
        expected: &str,
    ) -> DriverConstructionError {
        let reason = match found {
            Some(value) => format!("expected {expected}, got '{value}'"),
            None => format!("expected {expected}, property missing"),
        };
        DriverConstructionError::InvalidProperty {
            identity: self.identity(),
            property: name.to_string(),
            reason,
        }
    }
}
