//! Point layouts of SunSpec models, keyed by model id.
//!
//! A model is a tree of groups. The root group's points follow the model header directly, and
//! sub-groups may repeat: a fixed number of times, as often as a count point says, or (for the
//! older models with a single trailing group) as often as fits in the model length.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

mod builtin;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not list the model definitions in {1:?}")]
    ReadDir(#[source] std::io::Error, PathBuf),
    #[error("could not read the model definition at {1:?}")]
    ReadFile(#[source] std::io::Error, PathBuf),
    #[error("could not parse the model definition at {1:?}")]
    ParseModel(#[source] serde_json::Error, PathBuf),
}

/// How the words of a point are to be interpreted.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantArray,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TypeKind {
    Int16,
    Int32,
    Int64,
    Uint16,
    Uint32,
    Uint64,
    Acc16,
    Acc32,
    Acc64,
    Count,
    Enum16,
    Enum32,
    Bitfield16,
    Bitfield32,
    Bitfield64,
    Float32,
    Float64,
    /// Packed 8-bit characters, two per word. The length comes from the point definition.
    String,
    Pad,
    Sunssf,
    Raw16,
    Ipaddr,
    Ipv6addr,
    Eui48,
}

impl TypeKind {
    /// Number of words a point of this kind occupies, `0` for strings.
    pub const fn fixed_words(self) -> u16 {
        use TypeKind::*;
        match self {
            Int16 | Uint16 | Acc16 | Count | Enum16 | Bitfield16 | Pad | Sunssf | Raw16 => 1,
            Int32 | Uint32 | Acc32 | Enum32 | Bitfield32 | Float32 | Ipaddr => 2,
            Int64 | Uint64 | Acc64 | Bitfield64 | Float64 | Eui48 => 4,
            Ipv6addr => 8,
            String => 0,
        }
    }

    /// Kinds whose value is a magnitude a scale factor may apply to.
    pub fn is_scalable(self) -> bool {
        use TypeKind::*;
        matches!(self, Int16 | Int32 | Int64 | Uint16 | Uint32 | Uint64 | Acc16 | Acc32 | Acc64)
    }

    /// Whether `words` hold the "not implemented" pattern of this kind.
    ///
    /// Floats are not covered here, they are unimplemented when they decode to NaN.
    pub fn is_not_implemented(self, words: &[u16]) -> bool {
        use TypeKind::*;
        match self {
            Int16 | Int32 | Int64 | Pad | Sunssf => match words.split_first() {
                Some((first, rest)) => *first == 0x8000 && rest.iter().all(|w| *w == 0),
                None => false,
            },
            Uint16 | Uint32 | Uint64 | Enum16 | Enum32 | Bitfield16 | Bitfield32 | Bitfield64 => {
                words.iter().all(|w| *w == 0xFFFF)
            }
            Acc16 | Acc32 | Acc64 | Count | String | Ipaddr | Ipv6addr | Eui48 => {
                words.iter().all(|w| *w == 0)
            }
            Float32 | Float64 | Raw16 => false,
        }
    }
}

/// Where the exponent of a scaled point comes from.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ScaleFactor {
    Fixed(i8),
    /// Name of a `sunssf` point of the same model.
    Point(String),
}

impl std::fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleFactor::Fixed(exponent) => write!(f, "{exponent}"),
            ScaleFactor::Point(name) => f.write_str(name),
        }
    }
}

/// A point as listed in a model definition, before it is placed within a block.
#[derive(Clone, Debug, PartialEq)]
pub struct PointLayout {
    pub name: String,
    pub kind: TypeKind,
    pub words: u16,
    pub scale_factor: Option<ScaleFactor>,
    pub units: Option<String>,
    pub label: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupCount {
    Once,
    Fixed(u16),
    /// The value of the named count point.
    Point(String),
    /// As many repetitions as fit in the remainder of the model.
    Derived,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupDefinition {
    pub name: String,
    pub count: GroupCount,
    pub points: Vec<PointLayout>,
    pub groups: Vec<GroupDefinition>,
}

impl GroupDefinition {
    /// Words of one instance of this group, counting only repetitions known without data.
    pub fn static_words(&self) -> u32 {
        let points = self.points.iter().map(|p| u32::from(p.words)).sum::<u32>();
        let groups = self
            .groups
            .iter()
            .map(|g| match g.count {
                GroupCount::Once => g.static_words(),
                GroupCount::Fixed(n) => u32::from(n) * g.static_words(),
                GroupCount::Point(_) | GroupCount::Derived => 0,
            })
            .sum::<u32>();
        points + groups
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelDefinition {
    pub id: u16,
    pub label: String,
    pub description: Option<String>,
    pub group: GroupDefinition,
}

/// A point placed within a model block.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct PointDefinition {
    pub name: String,
    pub kind: TypeKind,
    /// Offset of the first bit, counted from the most significant bit of the first data word.
    pub bit_offset: u32,
    pub bit_width: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<ScaleFactor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PointDefinition {
    /// The words covered by this point, if it is aligned to whole words.
    pub fn word_range(&self) -> Option<Range<usize>> {
        if self.bit_offset % 16 != 0 || self.bit_width % 16 != 0 || self.bit_width == 0 {
            return None;
        }
        let start = usize::try_from(self.bit_offset / 16).ok()?;
        let end = start.checked_add(usize::try_from(self.bit_width / 16).ok()?)?;
        Some(start..end)
    }
}

struct Expansion<'a> {
    words: &'a [u16],
    cursor: u32,
    points: Vec<PointDefinition>,
}

impl Expansion<'_> {
    fn remaining_words(&self) -> u32 {
        u32::try_from(self.words.len()).unwrap_or(u32::MAX).saturating_sub(self.cursor)
    }

    fn count_value(&self, name: &str) -> Option<u32> {
        let point = self.points.iter().rev().find(|p| p.name == name)?;
        let range = point.word_range()?;
        let word = *self.words.get(range)?.last()?;
        if point.kind.is_not_implemented(&[word]) {
            return None;
        }
        Some(u32::from(word))
    }

    fn group(&mut self, group: &GroupDefinition, prefix: &str, scope: &[(&str, String)], derived: u32) {
        let mut scope = scope.to_vec();
        scope.extend(group.points.iter().map(|p| (p.name.as_str(), format!("{prefix}{}", p.name))));
        for point in &group.points {
            let scale_factor = match &point.scale_factor {
                Some(ScaleFactor::Point(name)) => {
                    let resolved = scope.iter().rev().find(|(local, _)| local == name);
                    let name = resolved.map(|(_, full)| full.clone()).unwrap_or(name.clone());
                    Some(ScaleFactor::Point(name))
                }
                other => other.clone(),
            };
            self.points.push(PointDefinition {
                name: format!("{prefix}{}", point.name),
                kind: point.kind,
                bit_offset: self.cursor * 16,
                bit_width: u32::from(point.words) * 16,
                scale_factor,
                units: point.units.clone(),
                label: point.label.clone(),
            });
            self.cursor += u32::from(point.words);
        }
        for sub_group in &group.groups {
            let name = capitalized(&sub_group.name);
            let repetitions = match &sub_group.count {
                GroupCount::Once => {
                    self.group(sub_group, &format!("{prefix}{name}_"), &scope, 0);
                    continue;
                }
                GroupCount::Fixed(n) => u32::from(*n),
                GroupCount::Point(count_name) => {
                    let full_name = scope
                        .iter()
                        .rev()
                        .find(|(local, _)| local == count_name)
                        .map(|(_, full)| full.as_str())
                        .unwrap_or(count_name);
                    match self.count_value(full_name) {
                        None => {
                            debug!(message = "count point unavailable", count = full_name, derived);
                            derived
                        }
                        Some(count) => {
                            // Counts read off the device are bounded by the block.
                            let fits = self.remaining_words() / sub_group.static_words().max(1);
                            if count > fits {
                                warn!(
                                    message = "count point exceeds the model length",
                                    count = full_name,
                                    value = count,
                                    fits
                                );
                            }
                            count.min(fits)
                        }
                    }
                }
                GroupCount::Derived => derived,
            };
            for index in 0..repetitions {
                self.group(sub_group, &format!("{prefix}{name}_{index}_"), &scope, 0);
            }
        }
    }
}

/// `name` with its first character uppercased, as used in point name prefixes.
pub(crate) fn capitalized(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl ModelDefinition {
    /// Place every point of this model within a block of `words`.
    ///
    /// The words are needed to resolve repetition counts. Points are not guaranteed to fit in the
    /// block; the decoder treats any that do not as unimplemented.
    pub fn layout(&self, words: &[u16]) -> Vec<PointDefinition> {
        let model_length = u32::try_from(words.len()).unwrap_or(u32::MAX);
        let open_ended = self
            .group
            .groups
            .iter()
            .filter(|g| matches!(g.count, GroupCount::Point(_) | GroupCount::Derived))
            .collect::<Vec<_>>();
        let derived = match open_ended.as_slice() {
            [group] if group.static_words() > 0 => {
                let remainder = model_length.saturating_sub(self.group.static_words());
                let group_words = group.static_words();
                if remainder % group_words != 0 {
                    warn!(
                        message = "model length is not a whole number of repetitions",
                        model = self.id,
                        model_length,
                        group_words
                    );
                }
                remainder / group_words
            }
            _ => 0,
        };
        let mut expansion = Expansion { words, cursor: 0, points: Vec::new() };
        expansion.group(&self.group, "", &[], derived);
        expansion.points
    }
}

/// The model definitions discovery decodes against.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    models: BTreeMap<u16, ModelDefinition>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The models this tool knows without any external definitions.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for model in builtin::models() {
            catalog.insert(model);
        }
        catalog
    }

    /// Add a definition, replacing any previous one with the same id.
    pub fn insert(&mut self, model: ModelDefinition) -> Option<ModelDefinition> {
        self.models.insert(model.id, model)
    }

    pub fn lookup(&self, model_id: u16) -> Option<&ModelDefinition> {
        self.models.get(&model_id)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.values()
    }

    /// Load every `*.json` SunSpec model definition in `directory`.
    pub fn load_dir(&mut self, directory: &Path) -> Result<usize, Error> {
        let entries =
            std::fs::read_dir(directory).map_err(|e| Error::ReadDir(e, directory.into()))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::ReadDir(e, directory.into()))?.path();
            if path.extension().is_some_and(|e| e == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        for path in &paths {
            let text = std::fs::read_to_string(path).map_err(|e| Error::ReadFile(e, path.clone()))?;
            let model = parse_json(&text).map_err(|e| Error::ParseModel(e, path.clone()))?;
            debug!(message = "loaded model definition", model = model.id, ?path);
            if let Some(replaced) = self.insert(model) {
                info!(message = "model definition replaced", model = replaced.id, ?path);
            }
        }
        Ok(paths.len())
    }
}

#[derive(serde::Deserialize)]
struct JsonModel {
    id: u16,
    group: JsonGroup,
    label: Option<String>,
    desc: Option<String>,
}

#[derive(serde::Deserialize)]
struct JsonGroup {
    name: String,
    count: Option<JsonCount>,
    #[serde(default)]
    points: Vec<JsonPoint>,
    #[serde(default)]
    groups: Vec<JsonGroup>,
    label: Option<String>,
    desc: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum JsonCount {
    Number(u16),
    Name(String),
}

#[derive(serde::Deserialize)]
struct JsonPoint {
    name: String,
    #[serde(rename = "type")]
    kind: TypeKind,
    size: u16,
    sf: Option<ScaleFactor>,
    units: Option<String>,
    label: Option<String>,
}

/// Parse a model definition in the JSON format the SunSpec Alliance publishes its models in.
pub fn parse_json(text: &str) -> Result<ModelDefinition, serde_json::Error> {
    let model: JsonModel = serde_json::from_str(text)?;
    let single_sub_group = model.group.groups.len() == 1;
    let JsonGroup { name, mut points, groups, label, desc, count: _ } = model.group;
    // The ID and L points are the model header, which blocks do not include.
    if let [id, length, ..] = points.as_slice() {
        if id.name == "ID" && length.name == "L" {
            points.drain(..2);
        }
    }
    let groups = groups
        .into_iter()
        .map(|g| {
            // Older models end in one repeating group without a count of their own.
            let count = match &g.count {
                None | Some(JsonCount::Number(0)) if single_sub_group => GroupCount::Derived,
                _ => json_count(&g.count),
            };
            json_group(g, count)
        })
        .collect();
    Ok(ModelDefinition {
        id: model.id,
        label: model.label.or(label).unwrap_or(name.clone()),
        description: model.desc.or(desc),
        group: GroupDefinition {
            name,
            count: GroupCount::Once,
            points: points.into_iter().map(json_point).collect(),
            groups,
        },
    })
}

fn json_count(count: &Option<JsonCount>) -> GroupCount {
    match count {
        None => GroupCount::Once,
        Some(JsonCount::Number(n)) => GroupCount::Fixed(*n),
        Some(JsonCount::Name(name)) => match name.parse::<u16>() {
            Ok(n) => GroupCount::Fixed(n),
            Err(_) => GroupCount::Point(name.clone()),
        },
    }
}

fn json_group(group: JsonGroup, count: GroupCount) -> GroupDefinition {
    GroupDefinition {
        name: group.name,
        count,
        points: group.points.into_iter().map(json_point).collect(),
        groups: group
            .groups
            .into_iter()
            .map(|g| {
                let count = json_count(&g.count);
                json_group(g, count)
            })
            .collect(),
    }
}

fn json_point(point: JsonPoint) -> PointLayout {
    PointLayout {
        name: point.name,
        kind: point.kind,
        words: point.size,
        scale_factor: point.sf,
        units: point.units,
        label: point.label,
    }
}
