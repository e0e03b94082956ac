use crate::{
    DeviceDescriptor, FamilyRegistry, ManifestParseError, PinAssignment, PropValue, Properties,
    PropertyKind, PropertySpec,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Size of the deserialization buffer; larger manifests are rejected.
pub const DEFAULT_MANIFEST_CAPACITY: usize = 16 * 1024;

/// Wire form of one manifest entry, as written by the configuration tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "PascalCase")]
pub struct ManifestEntry {
    pub device_type: String,
    #[serde(default)]
    pub device_index: i32,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub pins: Vec<ManifestPin>,
    #[serde(default)]
    pub property_values: Vec<ManifestProperty>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "PascalCase")]
pub struct ManifestPin {
    pub pin_name: String,
    /// Integer or numeric string; the configuration tool sends both.
    #[serde(default)]
    pub microcontroller_gpo_pin: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "PascalCase")]
pub struct ManifestProperty {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// JSON schema of the manifest document.
#[cfg(feature = "schema")]
pub fn manifest_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Vec<ManifestEntry>)
}

/// Turns the persisted JSON manifest into validated descriptors, coercing and
/// clamping properties against each family's declared schema.
pub struct ManifestParser<'a> {
    families: &'a FamilyRegistry,
    capacity: usize,
}

impl<'a> ManifestParser<'a> {
    pub fn new(families: &'a FamilyRegistry) -> Self {
        Self {
            families,
            capacity: DEFAULT_MANIFEST_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// An empty document means "not configured yet" and yields no descriptors.
    pub fn parse(&self, json: &str) -> Result<Vec<DeviceDescriptor>, ManifestParseError> {
        if json.len() > self.capacity {
            return Err(ManifestParseError::TooLarge {
                size: json.len(),
                limit: self.capacity,
            });
        }
        if json.trim().is_empty() {
            tracing::info!("manifest empty; node not configured yet");
            return Ok(Vec::new());
        }
        let doc: Value =
            serde_json::from_str(json).map_err(|e| ManifestParseError::Malformed(e.to_string()))?;
        if !doc.is_array() {
            return Err(ManifestParseError::NotAnArray);
        }
        let entries: Vec<ManifestEntry> =
            serde_json::from_value(doc).map_err(|e| ManifestParseError::Malformed(e.to_string()))?;
        Ok(entries.into_iter().map(|e| self.validate(e)).collect())
    }

    fn validate(&self, entry: ManifestEntry) -> DeviceDescriptor {
        if !self.families.contains(&entry.device_type) {
            tracing::warn!(
                device_type = %entry.device_type,
                device_index = entry.device_index,
                "unknown device type kept in manifest"
            );
        }
        let pins = entry
            .pins
            .into_iter()
            .map(|p| PinAssignment {
                gpio: coerce_gpio(&p.microcontroller_gpo_pin),
                name: p.pin_name,
            })
            .collect();
        let properties = resolve_properties(
            entry.property_values,
            self.families.properties(&entry.device_type),
        );
        DeviceDescriptor {
            device_type: entry.device_type,
            device_index: entry.device_index,
            is_enabled: entry.is_enabled,
            pins,
            properties,
        }
    }
}

/// Read a manifest from disk.
pub fn load_manifest_file(
    path: impl AsRef<Path>,
    families: &FamilyRegistry,
) -> anyhow::Result<Vec<DeviceDescriptor>> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading manifest: {}", path.display()))?;
    let descriptors = ManifestParser::new(families)
        .parse(&raw)
        .with_context(|| format!("parsing manifest: {}", path.display()))?;
    Ok(descriptors)
}

// -1 is never a valid gpio; families reject it as an invalid pin.
fn coerce_gpio(value: &Value) -> i32 {
    coerce_int(value)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(-1)
}

fn resolve_properties(raw: Vec<ManifestProperty>, schema: &[PropertySpec]) -> Properties {
    let mut props = Properties::new();
    for p in raw {
        let value = match schema.iter().find(|s| s.name.eq_ignore_ascii_case(&p.name)) {
            Some(spec) => coerce(&p.value, spec),
            None => untyped(&p.value),
        };
        props.set(p.name, value);
    }
    for spec in schema {
        if props.get(spec.name).is_none() {
            props.set(spec.name, spec.default_value());
        }
    }
    props
}

/// Coerce to the declared type and clamp into range. A value that cannot be
/// coerced is kept as text so the family constructor reports it.
fn coerce(value: &Value, spec: &PropertySpec) -> PropValue {
    match &spec.kind {
        PropertyKind::Int { min, max, .. } => match coerce_int(value) {
            Some(v) => {
                let clamped = v.clamp(*min, *max);
                if clamped != v {
                    tracing::debug!(property = spec.name, value = v, clamped, "property clamped");
                }
                PropValue::Int(clamped)
            }
            None => PropValue::Text(as_text(value)),
        },
        PropertyKind::Bool { .. } => match coerce_bool(value) {
            Some(v) => PropValue::Bool(v),
            None => PropValue::Text(as_text(value)),
        },
        PropertyKind::Text { .. } => PropValue::Text(as_text(value)),
    }
}

fn untyped(value: &Value) -> PropValue {
    match value {
        Value::Bool(b) => PropValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => PropValue::Int(i),
            None => PropValue::Text(n.to_string()),
        },
        other => PropValue::Text(as_text(other)),
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                return i64::from_str_radix(hex, 16).ok();
            }
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Some(true),
            "false" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Capability, DriverConstructionError, NodeContext};

    fn families() -> FamilyRegistry {
        let mut families = FamilyRegistry::new();
        families.register(
            "DS18B20",
            vec![
                PropertySpec::int("Interval", 20_000, 5_000, 900_000),
                PropertySpec::int("Resolution", 11, 9, 11),
                PropertySpec::flag("Fahrenheit", false),
            ],
            |d: &DeviceDescriptor, _: &NodeContext| -> Result<Box<dyn Capability>, DriverConstructionError> {
                Err(DriverConstructionError::UnknownType(d.identity()))
            },
        );
        families
    }

    #[test]
    fn interval_is_clamped_to_declared_range() {
        let families = families();
        let json = r#"[{"DeviceType":"DS18B20","DeviceIndex":0,"IsEnabled":true,
            "Pins":[{"PinName":"DAT","MicrocontrollerGpoPin":"23"}],
            "PropertyValues":[{"Name":"Interval","Value":"1000"},{"Name":"Resolution","Value":12}]}]"#;
        let descs = ManifestParser::new(&families).parse(json).unwrap();
        assert_eq!(descs.len(), 1);
        let d = &descs[0];
        assert_eq!(d.pin("DAT"), Some(23));
        assert_eq!(d.properties.get("Interval"), Some(&PropValue::Int(5_000)));
        assert_eq!(d.properties.get("Resolution"), Some(&PropValue::Int(11)));
        // missing property filled with its default
        assert_eq!(d.properties.get("Fahrenheit"), Some(&PropValue::Bool(false)));
    }

    #[test]
    fn upper_bound_clamp() {
        let families = families();
        let json = r#"[{"DeviceType":"DS18B20","DeviceIndex":0,"IsEnabled":true,"Pins":[],
            "PropertyValues":[{"Name":"Interval","Value":3600000}]}]"#;
        let descs = ManifestParser::new(&families).parse(json).unwrap();
        assert_eq!(descs[0].require_int("Interval").unwrap(), 900_000);
    }

    #[test]
    fn uncoercible_value_is_kept_as_text() {
        let families = families();
        let json = r#"[{"DeviceType":"DS18B20","DeviceIndex":0,"IsEnabled":true,"Pins":[],
            "PropertyValues":[{"Name":"Interval","Value":"soon"}]}]"#;
        let descs = ManifestParser::new(&families).parse(json).unwrap();
        assert_eq!(
            descs[0].properties.get("Interval"),
            Some(&PropValue::Text("soon".to_string()))
        );
        assert!(matches!(
            descs[0].require_int("Interval"),
            Err(DriverConstructionError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn unknown_type_is_preserved() {
        let families = families();
        let json = r#"[{"DeviceType":"FluxCapacitor","DeviceIndex":7,"IsEnabled":true,"Pins":[],
            "PropertyValues":[{"Name":"Gigawatts","Value":"1.21"},{"Name":"Armed","Value":true}]}]"#;
        let descs = ManifestParser::new(&families).parse(json).unwrap();
        assert_eq!(descs[0].device_type, "FluxCapacitor");
        assert_eq!(descs[0].device_index, 7);
        assert_eq!(
            descs[0].properties.get("Gigawatts"),
            Some(&PropValue::Text("1.21".to_string()))
        );
        assert_eq!(descs[0].properties.get("Armed"), Some(&PropValue::Bool(true)));
    }

    #[test]
    fn invalid_pin_becomes_negative_gpio() {
        let families = families();
        let json = r#"[{"DeviceType":"DS18B20","DeviceIndex":0,"IsEnabled":true,
            "Pins":[{"PinName":"DAT","MicrocontrollerGpoPin":"abc"}],"PropertyValues":[]}]"#;
        let descs = ManifestParser::new(&families).parse(json).unwrap();
        assert_eq!(descs[0].pin("DAT"), Some(-1));
    }

    #[test]
    fn empty_document_means_unconfigured() {
        let families = families();
        assert!(ManifestParser::new(&families).parse("  ").unwrap().is_empty());
        assert!(ManifestParser::new(&families).parse("[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_reported() {
        let families = families();
        let err = ManifestParser::new(&families)
            .parse(r#"[{"DeviceType":"#)
            .unwrap_err();
        assert!(matches!(err, ManifestParseError::Malformed(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn object_instead_of_array() {
        let families = families();
        let err = ManifestParser::new(&families)
            .parse(r#"{"DeviceType":"Switch"}"#)
            .unwrap_err();
        assert_eq!(err, ManifestParseError::NotAnArray);
    }

    #[test]
    fn oversized_manifest_is_rejected() {
        let families = families();
        let json = format!("[{}]", " ".repeat(64));
        let err = ManifestParser::new(&families)
            .with_capacity(32)
            .parse(&json)
            .unwrap_err();
        assert!(matches!(err, ManifestParseError::TooLarge { limit: 32, .. }));
    }

    #[test]
    fn disabled_entries_are_parsed() {
        let families = families();
        let json = r#"[{"DeviceType":"DS18B20","DeviceIndex":0,"IsEnabled":false,"Pins":[],"PropertyValues":[]}]"#;
        let descs = ManifestParser::new(&families).parse(json).unwrap();
        assert_eq!(descs.len(), 1);
        assert!(!descs[0].is_enabled);
    }

    #[test]
    fn loads_manifest_from_disk() {
        let families = families();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(
            &path,
            r#"[{"DeviceType":"DS18B20","DeviceIndex":0,"IsEnabled":true,"Pins":[{"PinName":"Data","MicrocontrollerGpoPin":"23"}]}]"#,
        )
        .unwrap();
        let descs = load_manifest_file(&path, &families).unwrap();
        assert_eq!(descs[0].pin("data"), Some(23));
        assert!(load_manifest_file(dir.path().join("missing.json"), &families).is_err());
    }
}
