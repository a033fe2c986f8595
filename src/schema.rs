//! The schema document a discovery pass produces.

use crate::catalog::TypeKind;
use crate::sunspec::RegisterAddress;

/// A resolved point value.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Unsigned(u64),
    /// Any scaled value, and floating point kinds.
    Float(f64),
    Text(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) => v.fmt(f),
            Value::Unsigned(v) => v.fmt(f),
            Value::Float(v) => v.fmt(f),
            Value::Text(v) => v.fmt(f),
        }
    }
}

fn hex_words<S: serde::Serializer>(words: &[u16], serializer: S) -> Result<S::Ok, S::Error> {
    let words = words.iter().map(|w| format!("{w:04X}")).collect::<Vec<_>>();
    serializer.serialize_str(&words.join(" "))
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct DecodedPoint {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TypeKind,
    /// First register of the point, `None` when its definition does not fit the block.
    pub address: Option<RegisterAddress>,
    #[serde(serialize_with = "hex_words")]
    pub raw: Vec<u16>,
    /// `None` when the device marks the point as not implemented, or it could not be resolved.
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct DecodedModel {
    pub id: u16,
    /// `None` for models the catalog does not know.
    pub label: Option<String>,
    /// Address of the first data word.
    pub address: RegisterAddress,
    pub length: u16,
    pub points: Vec<DecodedPoint>,
    #[serde(serialize_with = "hex_words")]
    pub raw: Vec<u16>,
}

impl DecodedModel {
    pub fn is_known(&self) -> bool {
        self.label.is_some()
    }

    /// The point called `name`, if the model has one.
    pub fn point(&self, name: &str) -> Option<&DecodedPoint> {
        self.points.iter().find(|p| p.name == name)
    }

    /// The resolved value of `name`. `None` covers both absent and unresolved points; use
    /// [`Self::point`] to tell them apart.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.point(name)?.value.as_ref()
    }

    fn text(&self, name: &str) -> Option<&str> {
        match self.value(name)? {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SchemaDevice {
    pub description: String,
    /// Where the marker was found.
    pub base: RegisterAddress,
    pub models: Vec<DecodedModel>,
}

impl SchemaDevice {
    pub fn model(&self, id: u16) -> Option<&DecodedModel> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// Collect the decoded models, in discovery order, under `description`.
pub fn assemble(
    description: impl Into<String>,
    base: RegisterAddress,
    models: Vec<DecodedModel>,
) -> SchemaDevice {
    SchemaDevice { description: description.into(), base, models }
}

/// A description of the device built from its Common model, if it has one.
pub fn describe(base: RegisterAddress, models: &[DecodedModel]) -> String {
    let common = models.iter().find(|m| m.id == 1 && m.is_known());
    match common {
        Some(common) => {
            let field = |name: &str| common.text(name).unwrap_or_default();
            format!(
                "A schema specifically for the SunSpec device made by {} model {} using version {} (SN: {})",
                field("Mn"),
                field("Md"),
                field("Vr"),
                field("SN"),
            )
        }
        None => format!("A SunSpec device with base {base}"),
    }
}
