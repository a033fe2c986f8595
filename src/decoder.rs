//! Turning model blocks into named, typed values.
//!
//! Decoding never fails. A model missing from the catalog keeps only its raw words, and a point
//! that is not implemented by the device, does not fit its block, or whose scale factor cannot
//! be resolved is kept with a `None` value.

use crate::catalog::{Catalog, PointDefinition, ScaleFactor, TypeKind};
use crate::schema::{DecodedModel, DecodedPoint, Value};
use crate::sunspec::ModelBlock;
use tracing::{debug, trace};

/// Scale factors beyond this magnitude are treated as garbage.
const MAX_SCALE_EXPONENT: u8 = 10;

pub fn decode(block: &ModelBlock, catalog: &Catalog) -> DecodedModel {
    let mut model = DecodedModel {
        id: block.model_id(),
        label: None,
        address: block.address,
        length: block.header.model_length,
        points: Vec::new(),
        raw: block.words.clone(),
    };
    let Some(definition) = catalog.lookup(block.model_id()) else {
        debug!(message = "model not in the catalog", model = block.model_id(), address = %block.address);
        return model;
    };
    let layout = definition.layout(&block.words);
    model.label = Some(definition.label.clone());
    model.points = layout.iter().map(|point| decode_point(block, point, &layout)).collect();
    model
}

/// The words of `point`, if it lies within the block and spans as many words as its kind needs.
fn point_words<'a>(block: &'a ModelBlock, point: &PointDefinition) -> Option<&'a [u16]> {
    let words = block.words.get(point.word_range()?)?;
    let expected = point.kind.fixed_words();
    if expected != 0 && usize::from(expected) != words.len() {
        return None;
    }
    Some(words)
}

fn decode_point(block: &ModelBlock, point: &PointDefinition, layout: &[PointDefinition]) -> DecodedPoint {
    let words = point_words(block, point);
    let address = point
        .word_range()
        .and_then(|range| block.address.checked_add(u32::try_from(range.start).ok()?));
    let value = match words {
        None => {
            debug!(message = "point does not fit the block", model = block.model_id(), point = %point.name);
            None
        }
        Some(words) => resolve(block, point, words, layout),
    };
    trace!(message = "decoded", point = %point.name, ?value);
    DecodedPoint {
        name: point.name.clone(),
        kind: point.kind,
        address: words.and(address),
        raw: words.map(<[u16]>::to_vec).unwrap_or_default(),
        value,
        units: point.units.clone(),
    }
}

fn resolve(
    block: &ModelBlock,
    point: &PointDefinition,
    words: &[u16],
    layout: &[PointDefinition],
) -> Option<Value> {
    if point.kind.is_not_implemented(words) {
        return None;
    }
    let value = interpret(point.kind, words)?;
    if !point.kind.is_scalable() {
        return Some(value);
    }
    let Some(scale_factor) = &point.scale_factor else {
        return Some(value);
    };
    let exponent = match scale_factor {
        ScaleFactor::Fixed(exponent) => *exponent,
        ScaleFactor::Point(name) => scale_exponent(block, name, layout)?,
    };
    if exponent.unsigned_abs() > MAX_SCALE_EXPONENT {
        debug!(message = "scale factor out of range", point = %point.name, exponent);
        return None;
    }
    let raw = match value {
        Value::Integer(v) => v as f64,
        Value::Unsigned(v) => v as f64,
        Value::Float(_) | Value::Text(_) => return None,
    };
    Some(Value::Float(scale(raw, exponent)))
}

/// Exponent held by the scale factor point `name`, unless it is missing or not implemented.
fn scale_exponent(block: &ModelBlock, name: &str, layout: &[PointDefinition]) -> Option<i8> {
    let point = layout.iter().find(|p| p.name == name)?;
    let [word] = point_words(block, point)? else {
        return None;
    };
    if TypeKind::Sunssf.is_not_implemented(&[*word]) {
        return None;
    }
    i8::try_from(*word as i16).ok()
}

/// `raw * 10^exponent`, dividing for negative exponents so that e.g. `3201e-1` is `320.1`.
fn scale(raw: f64, exponent: i8) -> f64 {
    let magnitude = 10f64.powi(i32::from(exponent.unsigned_abs()));
    if exponent < 0 { raw / magnitude } else { raw * magnitude }
}

fn combine(words: &[u16]) -> u64 {
    words.iter().fold(0, |acc, w| (acc << 16) | u64::from(*w))
}

fn interpret(kind: TypeKind, words: &[u16]) -> Option<Value> {
    use TypeKind::*;
    let bits = combine(words);
    Some(match kind {
        Int16 | Sunssf => Value::Integer(i64::from(bits as u16 as i16)),
        Int32 => Value::Integer(i64::from(bits as u32 as i32)),
        Int64 => Value::Integer(bits as i64),
        Float32 => {
            let value = f32::from_bits(bits as u32);
            if value.is_nan() {
                return None;
            }
            Value::Float(f64::from(value))
        }
        Float64 => {
            let value = f64::from_bits(bits);
            if value.is_nan() {
                return None;
            }
            Value::Float(value)
        }
        String => {
            let bytes = words.iter().flat_map(|w| w.to_be_bytes());
            let bytes = bytes.take_while(|b| *b != 0).collect::<Vec<_>>();
            Value::Text(std::string::String::from_utf8_lossy(&bytes).into_owned())
        }
        Ipaddr => Value::Text(std::net::Ipv4Addr::from(bits as u32).to_string()),
        Ipv6addr => {
            let bytes = words.iter().flat_map(|w| w.to_be_bytes()).collect::<Vec<_>>();
            let bytes = <[u8; 16]>::try_from(bytes).ok()?;
            Value::Text(std::net::Ipv6Addr::from(bytes).to_string())
        }
        Eui48 => {
            // The first two bytes are unused.
            let bytes = bits.to_be_bytes();
            let octets = bytes[2..].iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>();
            Value::Text(octets.join(":"))
        }
        Uint16 | Uint32 | Uint64 | Acc16 | Acc32 | Acc64 | Count | Enum16 | Enum32 | Bitfield16
        | Bitfield32 | Bitfield64 | Pad | Raw16 => Value::Unsigned(bits),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GroupCount, GroupDefinition, ModelDefinition, PointLayout};
    use crate::sunspec::{ModelHeader, RegisterAddress};

    fn layout(name: &str, kind: TypeKind, words: u16, sf: Option<ScaleFactor>) -> PointLayout {
        PointLayout {
            name: name.into(),
            kind,
            words,
            scale_factor: sf,
            units: None,
            label: None,
        }
    }

    fn catalog(points: Vec<PointLayout>) -> Catalog {
        let mut catalog = Catalog::empty();
        catalog.insert(ModelDefinition {
            id: 64000,
            label: "Test".into(),
            description: None,
            group: GroupDefinition {
                name: "test".into(),
                count: GroupCount::Once,
                points,
                groups: Vec::new(),
            },
        });
        catalog
    }

    fn block(id: u16, words: &[u16]) -> ModelBlock {
        ModelBlock {
            header: ModelHeader { model_id: id, model_length: words.len() as u16 },
            address: RegisterAddress::holding(40004),
            words: words.to_vec(),
        }
    }

    #[test]
    fn signed_32_bit_sentinel_is_unresolved() {
        let catalog = catalog(vec![layout("W", TypeKind::Int32, 2, None)]);
        let model = decode(&block(64000, &[0x8000, 0x0000]), &catalog);
        let point = model.point("W").unwrap();
        assert_eq!(point.value, None);
        assert_eq!(point.raw, [0x8000, 0x0000]);
        let model = decode(&block(64000, &[0xFFFF, 0xFFFE]), &catalog);
        assert_eq!(model.value("W"), Some(&Value::Integer(-2)));
    }

    #[test]
    fn scaled_by_colocated_scale_factor() {
        let sf = Some(ScaleFactor::Point("A_SF".into()));
        let catalog = catalog(vec![
            layout("A", TypeKind::Uint16, 1, sf),
            layout("A_SF", TypeKind::Sunssf, 1, None),
        ]);
        let model = decode(&block(64000, &[100, 0xFFFF]), &catalog);
        assert_eq!(model.value("A"), Some(&Value::Float(10.0)));
        assert_eq!(model.value("A_SF"), Some(&Value::Integer(-1)));
    }

    #[test]
    fn sentinel_wins_over_scale_factor() {
        let sf = Some(ScaleFactor::Point("A_SF".into()));
        let catalog = catalog(vec![
            layout("A", TypeKind::Uint16, 1, sf.clone()),
            layout("W", TypeKind::Int16, 1, sf.clone()),
            layout("WH", TypeKind::Acc32, 2, sf),
            layout("A_SF", TypeKind::Sunssf, 1, None),
        ]);
        let model = decode(&block(64000, &[0xFFFF, 0x8000, 0, 0, 2]), &catalog);
        assert_eq!(model.value("A"), None);
        assert_eq!(model.value("W"), None);
        assert_eq!(model.value("WH"), None);
        assert_eq!(model.value("A_SF"), Some(&Value::Integer(2)));
    }

    /// The "not implemented" pattern of `kind`, `None` for kinds that have none.
    fn sentinel(kind: TypeKind) -> Option<Vec<u16>> {
        use TypeKind::*;
        let words = match kind.fixed_words() {
            0 => 2,
            fixed => usize::from(fixed),
        };
        Some(match kind {
            Int16 | Int32 | Int64 | Pad | Sunssf => {
                let mut sentinel = vec![0; words];
                sentinel[0] = 0x8000;
                sentinel
            }
            Uint16 | Uint32 | Uint64 | Enum16 | Enum32 | Bitfield16 | Bitfield32 | Bitfield64 => {
                vec![0xFFFF; words]
            }
            Acc16 | Acc32 | Acc64 | Count | String | Ipaddr | Ipv6addr | Eui48 => vec![0; words],
            Float32 => vec![0x7FC0, 0],
            Float64 => vec![0x7FF8, 0, 0, 0],
            Raw16 => return None,
        })
    }

    #[test]
    fn every_kind_at_its_sentinel_is_unresolved_despite_a_scale_factor() {
        let kinds = <TypeKind as strum::VariantArray>::VARIANTS;
        for &kind in kinds {
            let Some(mut words) = sentinel(kind) else {
                assert_eq!(kind, TypeKind::Raw16);
                continue;
            };
            let size = words.len() as u16;
            let catalog = catalog(vec![
                layout("SF", TypeKind::Sunssf, 1, None),
                layout("P", kind, size, Some(ScaleFactor::Point("SF".into()))),
            ]);
            words.insert(0, 0xFFFF);
            let model = decode(&block(64000, &words), &catalog);
            assert_eq!(model.value("SF"), Some(&Value::Integer(-1)), "{kind}");
            let point = model.point("P").unwrap();
            assert_eq!(point.value, None, "{kind}");
            assert_eq!(point.raw, words[1..], "{kind}");
        }
    }

    #[test]
    fn unimplemented_or_missing_scale_factor_leaves_value_unresolved() {
        let catalog = catalog(vec![
            layout("A", TypeKind::Uint16, 1, Some(ScaleFactor::Point("A_SF".into()))),
            layout("V", TypeKind::Uint16, 1, Some(ScaleFactor::Point("Nope".into()))),
            layout("A_SF", TypeKind::Sunssf, 1, None),
        ]);
        let model = decode(&block(64000, &[5, 6, 0x8000]), &catalog);
        assert_eq!(model.value("A"), None);
        assert_eq!(model.value("V"), None);
        assert!(model.point("A").is_some());
    }

    #[test]
    fn fixed_scale_factors() {
        let catalog = catalog(vec![
            layout("Hz", TypeKind::Uint16, 1, Some(ScaleFactor::Fixed(-2))),
            layout("E", TypeKind::Uint16, 1, Some(ScaleFactor::Fixed(3))),
            layout("Big", TypeKind::Uint16, 1, Some(ScaleFactor::Fixed(11))),
        ]);
        let model = decode(&block(64000, &[4999, 7, 1]), &catalog);
        assert_eq!(model.value("Hz"), Some(&Value::Float(49.99)));
        assert_eq!(model.value("E"), Some(&Value::Float(7000.0)));
        assert_eq!(model.value("Big"), None);
    }

    #[test]
    fn strings_stop_at_the_first_zero_byte() {
        let catalog = catalog(vec![
            layout("Mn", TypeKind::String, 4, None),
            layout("Opt", TypeKind::String, 2, None),
        ]);
        let model = decode(&block(64000, &[0x534D, 0x4100, 0x4142, 0x4344, 0, 0]), &catalog);
        assert_eq!(model.value("Mn"), Some(&Value::Text("SMA".into())));
        assert_eq!(model.value("Opt"), None);
    }

    #[test]
    fn enums_and_bitfields_keep_the_raw_integer() {
        let catalog = catalog(vec![
            layout("St", TypeKind::Enum16, 1, None),
            layout("Evt", TypeKind::Bitfield32, 2, None),
            layout("Vnd", TypeKind::Bitfield32, 2, None),
        ]);
        let model = decode(&block(64000, &[4, 0x0001, 0x0002, 0xFFFF, 0xFFFF]), &catalog);
        assert_eq!(model.value("St"), Some(&Value::Unsigned(4)));
        assert_eq!(model.value("Evt"), Some(&Value::Unsigned(0x0001_0002)));
        assert_eq!(model.value("Vnd"), None);
    }

    #[test]
    fn other_kinds() {
        let catalog = catalog(vec![
            layout("F", TypeKind::Float32, 2, None),
            layout("NaN", TypeKind::Float32, 2, None),
            layout("Ip", TypeKind::Ipaddr, 2, None),
            layout("Mac", TypeKind::Eui48, 4, None),
            layout("Big", TypeKind::Int64, 4, None),
        ]);
        let words = [
            0x3FC0, 0x0000, 0x7FC0, 0x0000, 0xC0A8, 0x0001, 0x0000, 0x0012, 0x3456, 0x789A, 0xFFFF,
            0xFFFF, 0xFFFF, 0xFFFD,
        ];
        let model = decode(&block(64000, &words), &catalog);
        assert_eq!(model.value("F"), Some(&Value::Float(1.5)));
        assert_eq!(model.value("NaN"), None);
        assert_eq!(model.value("Ip"), Some(&Value::Text("192.168.0.1".into())));
        assert_eq!(model.value("Mac"), Some(&Value::Text("00:12:34:56:78:9A".into())));
        assert_eq!(model.value("Big"), Some(&Value::Integer(-3)));
    }

    #[test]
    fn points_outside_the_block_are_unresolved() {
        let catalog = catalog(vec![
            layout("A", TypeKind::Uint16, 1, None),
            layout("Odd", TypeKind::Uint32, 1, None),
            layout("WH", TypeKind::Acc32, 2, None),
        ]);
        let model = decode(&block(64000, &[1, 2]), &catalog);
        assert_eq!(model.value("A"), Some(&Value::Unsigned(1)));
        assert_eq!(model.point("A").unwrap().address, Some(RegisterAddress::holding(40004)));
        let wh = model.point("WH").unwrap();
        assert_eq!((wh.value.as_ref(), wh.address, wh.raw.len()), (None, None, 0));
        assert_eq!(model.value("Odd"), None);
    }

    #[test]
    fn unknown_models_keep_their_raw_words() {
        let model = decode(&block(11, &[1, 2, 3]), &Catalog::builtin());
        assert_eq!(model.id, 11);
        assert!(!model.is_known());
        assert!(model.points.is_empty());
        assert_eq!(model.raw, [1, 2, 3]);
        assert_eq!(model.length, 3);
    }

    #[test]
    fn decoding_is_idempotent() {
        let catalog = Catalog::builtin();
        let mut words = vec![0u16; 50];
        words[0] = 3201;
        words[4] = 0xFFFF;
        let block = block(103, &words);
        assert_eq!(decode(&block, &catalog), decode(&block, &catalog));
        assert_eq!(decode(&block, &catalog).value("A"), Some(&Value::Float(320.1)));
    }
}
