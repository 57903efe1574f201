//! Property decode engine: field indices and per-type value decoding.

use crate::parser::bitstream::BitSource;
use crate::parser::game::Vector;
use crate::schema::{FlattenedProp, SendProp, SendPropFlag, SendPropType, ServerClass};
use crate::{ParseError, Result};
use serde::Serialize;

const END_OF_INDICES: i32 = 0xFFF;
const MAX_STRING_BITS: usize = 9;

const COORD_INTEGER_BITS: usize = 14;
const COORD_INTEGER_BITS_MP: usize = 11;
const COORD_FRACTIONAL_BITS: usize = 5;
const COORD_FRACTIONAL_BITS_MP_LOWPRECISION: usize = 3;
const COORD_RESOLUTION: f32 = 1.0 / (1 << COORD_FRACTIONAL_BITS) as f32;
const COORD_RESOLUTION_LOWPRECISION: f32 =
    1.0 / (1 << COORD_FRACTIONAL_BITS_MP_LOWPRECISION) as f32;
const NORMAL_FRACTIONAL_BITS: usize = 11;
const NORMAL_RESOLUTION: f32 = 1.0 / ((1 << NORMAL_FRACTIONAL_BITS) - 1) as f32;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PropertyValue {
    Int(i32),
    Float(f32),
    Vector(Vector),
    String(String),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vector> {
        match self {
            PropertyValue::Vector(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Read the changed property indices of one delta, in encoding order.
pub fn read_field_indices(
    stream: &mut impl BitSource,
    class: &ServerClass,
) -> Result<Vec<usize>> {
    let new_way = stream.read_bit()?;
    let mut indices = Vec::new();
    let mut index = -1;
    loop {
        index = match read_field_index(stream, index, new_way)? {
            Some(index) => index,
            None => break,
        };
        if index < 0 || index as usize >= class.props.len() {
            return Err(ParseError::FieldIndexOutOfRange {
                class: class.name.clone(),
                index,
                count: class.props.len(),
            });
        }
        indices.push(index as usize);
    }
    Ok(indices)
}

fn read_field_index(
    stream: &mut impl BitSource,
    last: i32,
    new_way: bool,
) -> Result<Option<i32>> {
    if new_way && stream.read_bit()? {
        return Ok(Some(last + 1));
    }

    let ret = if new_way && stream.read_bit()? {
        stream.read_int(3)? as i32
    } else {
        let ret = stream.read_int(7)? as i32;
        match ret & (32 | 64) {
            32 => (ret & !96) | ((stream.read_int(2)? as i32) << 5),
            64 => (ret & !96) | ((stream.read_int(4)? as i32) << 5),
            96 => (ret & !96) | ((stream.read_int(7)? as i32) << 5),
            _ => ret,
        }
    };

    if ret == END_OF_INDICES {
        return Ok(None);
    }
    Ok(Some(last + 1 + ret))
}

/// Decode one delta and hand every (index, value) pair to `on_value`, in
/// the order the indices were encoded.
pub fn read_delta<F>(stream: &mut impl BitSource, class: &ServerClass, mut on_value: F) -> Result<()>
where
    F: FnMut(usize, PropertyValue) -> Result<()>,
{
    let indices = read_field_indices(stream, class)?;
    for index in indices {
        let value = decode_prop(&class.props[index], stream)?;
        on_value(index, value)?;
    }
    Ok(())
}

/// Widest fixed width value the decoder reads in one go.
const MAX_VALUE_BITS: u32 = 32;

pub fn decode_prop(entry: &FlattenedProp, stream: &mut impl BitSource) -> Result<PropertyValue> {
    let prop = &entry.prop;
    let fixed_width = match prop.kind {
        SendPropType::Int => !prop.flags.contains(SendPropFlag::VarInt),
        SendPropType::Float | SendPropType::Vector | SendPropType::VectorXY => true,
        _ => false,
    };
    if fixed_width && prop.num_bits > MAX_VALUE_BITS {
        return Err(ParseError::PropertyBitCount {
            property: entry.name.clone(),
            bits: prop.num_bits,
        });
    }
    Ok(match prop.kind {
        SendPropType::Int => PropertyValue::Int(decode_int(prop, stream)?),
        SendPropType::Float => PropertyValue::Float(decode_float(prop, stream)?),
        SendPropType::Vector => PropertyValue::Vector(decode_vector(prop, stream)?),
        SendPropType::VectorXY => PropertyValue::Vector(decode_vector_xy(prop, stream)?),
        SendPropType::String => PropertyValue::String(decode_string(stream)?),
        SendPropType::Array => PropertyValue::Array(decode_array(entry, stream)?),
        kind => {
            return Err(ParseError::UnsupportedPropertyType {
                property: entry.name.clone(),
                kind,
            })
        }
    })
}

fn decode_int(prop: &SendProp, stream: &mut impl BitSource) -> Result<i32> {
    let unsigned = prop.flags.contains(SendPropFlag::Unsigned);
    if prop.flags.contains(SendPropFlag::VarInt) {
        if unsigned {
            Ok(stream.read_varint32()? as i32)
        } else {
            stream.read_signed_varint32()
        }
    } else if unsigned {
        Ok(stream.read_int(prop.num_bits as usize)? as i32)
    } else {
        stream.read_signed_int(prop.num_bits as usize)
    }
}

fn decode_float(prop: &SendProp, stream: &mut impl BitSource) -> Result<f32> {
    if let Some(value) = decode_special_float(prop, stream)? {
        return Ok(value);
    }

    if prop.num_bits == 0 {
        return Ok(prop.low_value);
    }
    let raw = stream.read_int(prop.num_bits as usize)? as f64;
    let max = ((1u64 << prop.num_bits) - 1) as f64;
    let fraction = (raw / max) as f32;
    Ok(prop.low_value + (prop.high_value - prop.low_value) * fraction)
}

fn decode_special_float(prop: &SendProp, stream: &mut impl BitSource) -> Result<Option<f32>> {
    let flags = prop.flags;
    let bits = prop.num_bits as usize;
    let value = if flags.contains(SendPropFlag::Coord) {
        read_bit_coord(stream)?
    } else if flags.contains(SendPropFlag::CoordMp) {
        read_bit_coord_mp(stream, false, false)?
    } else if flags.contains(SendPropFlag::CoordMpLowPrecision) {
        read_bit_coord_mp(stream, false, true)?
    } else if flags.contains(SendPropFlag::CoordMpIntegral) {
        read_bit_coord_mp(stream, true, false)?
    } else if flags.contains(SendPropFlag::NoScale) {
        f32::from_bits(stream.read_int(32)?)
    } else if flags.contains(SendPropFlag::Normal) {
        read_bit_normal(stream)?
    } else if flags.contains(SendPropFlag::CellCoord) {
        read_bit_cell_coord(stream, bits, false, false)?
    } else if flags.contains(SendPropFlag::CellCoordLowPrecision) {
        read_bit_cell_coord(stream, bits, true, false)?
    } else if flags.contains(SendPropFlag::CellCoordIntegral) {
        read_bit_cell_coord(stream, bits, false, true)?
    } else {
        return Ok(None);
    };
    Ok(Some(value))
}

fn read_bit_coord(stream: &mut impl BitSource) -> Result<f32> {
    let has_int = stream.read_bit()?;
    let has_fract = stream.read_bit()?;
    if !has_int && !has_fract {
        return Ok(0.0);
    }

    let negative = stream.read_bit()?;
    let int_value = if has_int {
        stream.read_int(COORD_INTEGER_BITS)? + 1
    } else {
        0
    };
    let fract_value = if has_fract {
        stream.read_int(COORD_FRACTIONAL_BITS)?
    } else {
        0
    };

    let value = int_value as f32 + fract_value as f32 * COORD_RESOLUTION;
    Ok(if negative { -value } else { value })
}

fn read_bit_coord_mp(stream: &mut impl BitSource, integral: bool, low_precision: bool) -> Result<f32> {
    let in_bounds = stream.read_bit()?;
    let int_bits = if in_bounds {
        COORD_INTEGER_BITS_MP
    } else {
        COORD_INTEGER_BITS
    };

    if integral {
        if !stream.read_bit()? {
            return Ok(0.0);
        }
        let negative = stream.read_bit()?;
        let value = (stream.read_int(int_bits)? + 1) as f32;
        return Ok(if negative { -value } else { value });
    }

    let has_int = stream.read_bit()?;
    let negative = stream.read_bit()?;
    let int_value = if has_int {
        stream.read_int(int_bits)? + 1
    } else {
        0
    };
    let (fract_bits, resolution) = if low_precision {
        (COORD_FRACTIONAL_BITS_MP_LOWPRECISION, COORD_RESOLUTION_LOWPRECISION)
    } else {
        (COORD_FRACTIONAL_BITS, COORD_RESOLUTION)
    };
    let fract_value = stream.read_int(fract_bits)?;

    let value = int_value as f32 + fract_value as f32 * resolution;
    Ok(if negative { -value } else { value })
}

fn read_bit_normal(stream: &mut impl BitSource) -> Result<f32> {
    let negative = stream.read_bit()?;
    let value = stream.read_int(NORMAL_FRACTIONAL_BITS)? as f32 * NORMAL_RESOLUTION;
    Ok(if negative { -value } else { value })
}

fn read_bit_cell_coord(
    stream: &mut impl BitSource,
    bits: usize,
    low_precision: bool,
    integral: bool,
) -> Result<f32> {
    if integral {
        return Ok(stream.read_int(bits)? as f32);
    }

    let int_value = stream.read_int(bits)?;
    let (fract_bits, resolution) = if low_precision {
        (COORD_FRACTIONAL_BITS_MP_LOWPRECISION, COORD_RESOLUTION_LOWPRECISION)
    } else {
        (COORD_FRACTIONAL_BITS, COORD_RESOLUTION)
    };
    let fract_value = stream.read_int(fract_bits)?;
    Ok(int_value as f32 + fract_value as f32 * resolution)
}

fn decode_vector(prop: &SendProp, stream: &mut impl BitSource) -> Result<Vector> {
    let x = decode_float(prop, stream)?;
    let y = decode_float(prop, stream)?;

    let z = if !prop.flags.contains(SendPropFlag::Normal) {
        decode_float(prop, stream)?
    } else {
        // Unit vector, z is rebuilt from x and y
        let negative = stream.read_bit()?;
        let sum = x * x + y * y;
        let z = if sum < 1.0 { (1.0 - sum).sqrt() } else { 0.0 };
        if negative {
            -z
        } else {
            z
        }
    };

    Ok(Vector::new(x, y, z))
}

fn decode_vector_xy(prop: &SendProp, stream: &mut impl BitSource) -> Result<Vector> {
    let x = decode_float(prop, stream)?;
    let y = decode_float(prop, stream)?;
    Ok(Vector::new(x, y, 0.0))
}

fn decode_string(stream: &mut impl BitSource) -> Result<String> {
    let len = stream.read_int(MAX_STRING_BITS)? as usize;
    let bytes = stream.read_bytes(len)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_end_matches('\0').to_string())
}

fn decode_array(entry: &FlattenedProp, stream: &mut impl BitSource) -> Result<Vec<PropertyValue>> {
    let Some(element) = &entry.array_element else {
        return Err(ParseError::UnsupportedPropertyType {
            property: entry.name.clone(),
            kind: SendPropType::Array,
        });
    };

    let mut max_elements = entry.prop.num_elements;
    let mut bits = 1;
    loop {
        max_elements >>= 1;
        if max_elements == 0 {
            break;
        }
        bits += 1;
    }

    let count = stream.read_int(bits)? as usize;
    let element = FlattenedProp::new(entry.name.as_str(), element.clone());
    (0..count).map(|_| decode_prop(&element, stream)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::testutil::DeltaWriter;
    use bitbuffer::{BitReadBuffer, BitReadStream, LittleEndian};

    fn class(props: Vec<FlattenedProp>) -> ServerClass {
        ServerClass::new(0, "CTest", "DT_Test", vec![], props)
    }

    fn ints(count: usize) -> ServerClass {
        class(
            (0..count)
                .map(|i| {
                    FlattenedProp::new(
                        format!("p{i}"),
                        SendProp::new(SendPropType::Int, 8).with_flags(SendPropFlag::Unsigned),
                    )
                })
                .collect(),
        )
    }

    fn decode_indices(data: &[u8], class: &ServerClass) -> Result<Vec<usize>> {
        let mut stream = BitReadStream::new(BitReadBuffer::new(data, LittleEndian));
        read_field_indices(&mut stream, class)
    }

    #[test]
    fn field_indices_round_trip_both_encodings() {
        let class = ints(5000);
        // every escape width gets exercised: 0..=7 small, <32 plain,
        // <128 two bits, <512 four bits, <4095 seven bits
        let indices = vec![0, 1, 2, 7, 8, 40, 41, 200, 713, 714, 2000, 4999];

        for new_way in [true, false] {
            let mut writer = DeltaWriter::new();
            writer.indices(&indices, new_way);
            assert_eq!(
                decode_indices(&writer.finish(), &class).unwrap(),
                indices,
                "new_way = {new_way}"
            );
        }
    }

    #[test]
    fn every_delta_up_to_sentinel_round_trips() {
        let class = ints(4096);
        for delta in [0usize, 3, 7, 8, 31, 32, 127, 128, 511, 512, 4094] {
            let indices = vec![delta];
            for new_way in [true, false] {
                let mut writer = DeltaWriter::new();
                writer.indices(&indices, new_way);
                assert_eq!(decode_indices(&writer.finish(), &class).unwrap(), indices);
            }
        }
    }

    #[test]
    fn index_past_class_is_a_desync() {
        let class = ints(3);
        let mut writer = DeltaWriter::new();
        writer.indices(&[5], true);
        assert!(matches!(
            decode_indices(&writer.finish(), &class),
            Err(ParseError::FieldIndexOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn missing_sentinel_runs_out_of_data() {
        let class = ints(3);
        // new_way followed by endless "next index" bits
        let data = [0xFF];
        assert!(matches!(
            decode_indices(&data, &class),
            Err(ParseError::FieldIndexOutOfRange { .. }) | Err(ParseError::EndOfData)
        ));
    }

    #[test]
    fn typed_values_decode_in_order() {
        let class = class(vec![
            FlattenedProp::new("int", SendProp::new(SendPropType::Int, 6)),
            FlattenedProp::new(
                "scaled",
                SendProp::new(SendPropType::Float, 8).with_range(0.0, 255.0),
            ),
            FlattenedProp::new(
                "noscale",
                SendProp::new(SendPropType::Float, 32).with_flags(SendPropFlag::NoScale),
            ),
            FlattenedProp::new(
                "coord",
                SendProp::new(SendPropType::Float, 0).with_flags(SendPropFlag::Coord),
            ),
            FlattenedProp::new("name", SendProp::new(SendPropType::String, 0)),
            FlattenedProp::new(
                "varint",
                SendProp::new(SendPropType::Int, 32).with_flags(SendPropFlag::VarInt),
            ),
            FlattenedProp::array(
                "list",
                SendProp::new(SendPropType::Array, 0).with_elements(4),
                SendProp::new(SendPropType::Int, 4).with_flags(SendPropFlag::Unsigned),
            ),
        ]);

        let mut writer = DeltaWriter::new();
        writer.indices(&[0, 1, 2, 3, 4, 5, 6], true);
        writer.int(-3i32 as u32 & 0x3F, 6);
        writer.int(255, 8);
        writer.int(1.5f32.to_bits(), 32);
        // coord -12.25: int and fraction present, negative
        writer.bit(true);
        writer.bit(true);
        writer.bit(true);
        writer.int(11, 14);
        writer.int(8, 5);
        writer.string("ak");
        // zigzag(-2) == 3
        writer.int(3, 8);
        writer.int(2, 3);
        writer.int(9, 4);
        writer.int(4, 4);

        let data = writer.finish();
        let mut stream = BitReadStream::new(BitReadBuffer::new(&data, LittleEndian));
        let mut values = Vec::new();
        read_delta(&mut stream, &class, |index, value| {
            values.push((index, value));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            values,
            vec![
                (0, PropertyValue::Int(-3)),
                (1, PropertyValue::Float(255.0)),
                (2, PropertyValue::Float(1.5)),
                (3, PropertyValue::Float(-12.25)),
                (4, PropertyValue::String("ak".to_string())),
                (5, PropertyValue::Int(-2)),
                (
                    6,
                    PropertyValue::Array(vec![PropertyValue::Int(9), PropertyValue::Int(4)])
                ),
            ]
        );
    }

    #[test]
    fn unit_vectors_rebuild_z() {
        let prop = SendProp::new(SendPropType::Vector, 0).with_flags(SendPropFlag::NoScale | SendPropFlag::Normal);
        let mut writer = DeltaWriter::new();
        writer.int(0.6f32.to_bits(), 32);
        writer.int(0.0f32.to_bits(), 32);
        writer.bit(true);
        let data = writer.finish();
        let mut stream = BitReadStream::new(BitReadBuffer::new(&data, LittleEndian));
        // NoScale wins over Normal for the components
        let v = decode_vector(&prop, &mut stream).unwrap();
        assert!((v.z + 0.8).abs() < 1e-6, "{v:?}");
    }

    #[test]
    fn int64_is_rejected() {
        let entry = FlattenedProp::new("m_big", SendProp::new(SendPropType::Int64, 64));
        let data = [0u8; 16];
        let mut stream = BitReadStream::new(BitReadBuffer::new(&data, LittleEndian));
        assert!(matches!(
            decode_prop(&entry, &mut stream),
            Err(ParseError::UnsupportedPropertyType {
                kind: SendPropType::Int64,
                ..
            })
        ));
    }

    #[test]
    fn oversized_fixed_width_props_are_rejected() {
        let data = [0u8; 16];
        for kind in [SendPropType::Int, SendPropType::Float] {
            let entry = FlattenedProp::new("m_wide", SendProp::new(kind, 64));
            let mut stream = BitReadStream::new(BitReadBuffer::new(&data, LittleEndian));
            assert!(matches!(
                decode_prop(&entry, &mut stream),
                Err(ParseError::PropertyBitCount { bits: 64, .. })
            ));
        }
    }

    #[test]
    fn zero_bit_float_is_its_low_value() {
        let entry = FlattenedProp::new(
            "m_flat",
            SendProp::new(SendPropType::Float, 0).with_range(2.5, 10.0),
        );
        let data = [0u8; 4];
        let mut stream = BitReadStream::new(BitReadBuffer::new(&data, LittleEndian));
        assert_eq!(decode_prop(&entry, &mut stream).unwrap(), PropertyValue::Float(2.5));
        assert_eq!(stream.bits_left(), 32);
    }
}
