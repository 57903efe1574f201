//! Server class schema as handed over by the data-table parser.
//!
//! The core never parses send tables itself. It only needs, per class, the
//! flattened and priority-sorted property list together with the base class
//! chain, plus the instance baseline bytes for each class.

use enumset::{EnumSet, EnumSetType};
use fnv::FnvHashMap;
use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum SendPropType {
    Int = 0,
    Float = 1,
    Vector = 2,
    VectorXY = 3,
    String = 4,
    Array = 5,
    DataTable = 6,
    Int64 = 7,
}

/// Send prop flags, one variant per bit of the raw flag word.
#[derive(EnumSetType, Debug)]
#[enumset(repr = "u32")]
pub enum SendPropFlag {
    Unsigned = 0,
    Coord = 1,
    NoScale = 2,
    RoundDown = 3,
    RoundUp = 4,
    Normal = 5,
    Exclude = 6,
    Xyze = 7,
    InsideArray = 8,
    ProxyAlwaysYes = 9,
    IsVectorElem = 10,
    Collapsible = 11,
    CoordMp = 12,
    CoordMpLowPrecision = 13,
    CoordMpIntegral = 14,
    CellCoord = 15,
    CellCoordLowPrecision = 16,
    CellCoordIntegral = 17,
    ChangesOften = 18,
    VarInt = 19,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendProp {
    pub kind: SendPropType,
    pub flags: EnumSet<SendPropFlag>,
    pub num_bits: u32,
    pub low_value: f32,
    pub high_value: f32,
    pub num_elements: u32,
}

impl SendProp {
    pub fn new(kind: SendPropType, num_bits: u32) -> Self {
        SendProp {
            kind,
            flags: EnumSet::empty(),
            num_bits,
            low_value: 0.0,
            high_value: 0.0,
            num_elements: 0,
        }
    }

    pub fn with_flags(mut self, flags: impl Into<EnumSet<SendPropFlag>>) -> Self {
        self.flags = flags.into();
        self
    }

    pub fn with_range(mut self, low_value: f32, high_value: f32) -> Self {
        self.low_value = low_value;
        self.high_value = high_value;
        self
    }

    pub fn with_elements(mut self, num_elements: u32) -> Self {
        self.num_elements = num_elements;
        self
    }

    /// Build from the raw flag word of a send table, dropping unknown bits.
    pub fn raw_flags(flags: u32) -> EnumSet<SendPropFlag> {
        EnumSet::try_from_repr(flags)
            .unwrap_or_else(|| EnumSet::from_repr_truncated(flags))
    }
}

/// One entry of a class's flattened property list.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedProp {
    pub name: String,
    pub prop: SendProp,
    // Only set for Array props
    pub array_element: Option<SendProp>,
}

impl FlattenedProp {
    pub fn new(name: impl Into<String>, prop: SendProp) -> Self {
        FlattenedProp {
            name: name.into(),
            prop,
            array_element: None,
        }
    }

    pub fn array(name: impl Into<String>, prop: SendProp, element: SendProp) -> Self {
        FlattenedProp {
            name: name.into(),
            prop,
            array_element: Some(element),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerClass {
    pub id: u32,
    pub name: String,
    pub dt_name: String,
    /// Base class names, root first and most derived last.
    pub base_classes: Vec<String>,
    pub props: Vec<FlattenedProp>,
    prop_index: FnvHashMap<String, usize>,
}

impl ServerClass {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        dt_name: impl Into<String>,
        base_classes: Vec<String>,
        props: Vec<FlattenedProp>,
    ) -> Self {
        let prop_index = props
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        ServerClass {
            id,
            name: name.into(),
            dt_name: dt_name.into(),
            base_classes,
            props,
            prop_index,
        }
    }

    pub fn find_prop(&self, name: &str) -> Option<usize> {
        self.prop_index.get(name).copied()
    }

    pub fn base_class(&self, depth: usize) -> Option<&str> {
        self.base_classes.get(depth).map(String::as_str)
    }

    pub fn derives_from(&self, name: &str) -> bool {
        self.base_classes.iter().any(|b| b == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    classes: Vec<ServerClass>,
    by_name: FnvHashMap<String, u32>,
    baselines: FnvHashMap<u32, Vec<u8>>,
}

impl ClassTable {
    pub fn new(classes: Vec<ServerClass>) -> Self {
        let by_name = classes.iter().map(|c| (c.name.clone(), c.id)).collect();
        ClassTable {
            classes,
            by_name,
            baselines: FnvHashMap::default(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&ServerClass> {
        self.classes.get(id as usize)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ServerClass> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerClass> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Width of the class id written when an entity enters the PVS.
    pub fn class_bits(&self) -> usize {
        match self.classes.len() {
            0 | 1 => 0,
            n => (usize::BITS - (n - 1).leading_zeros()) as usize,
        }
    }

    pub fn set_baseline(&mut self, class_id: u32, data: Vec<u8>) {
        self.baselines.insert(class_id, data);
    }

    pub fn baseline(&self, class_id: u32) -> Option<&[u8]> {
        self.baselines.get(&class_id).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(count: usize) -> ClassTable {
        ClassTable::new(
            (0..count)
                .map(|i| ServerClass::new(i as u32, format!("C{i}"), format!("DT_{i}"), vec![], vec![]))
                .collect(),
        )
    }

    #[test]
    fn class_bits_is_ceil_log2() {
        assert_eq!(table(1).class_bits(), 0);
        assert_eq!(table(2).class_bits(), 1);
        assert_eq!(table(3).class_bits(), 2);
        assert_eq!(table(4).class_bits(), 2);
        assert_eq!(table(5).class_bits(), 3);
        assert_eq!(table(283).class_bits(), 9);
    }

    #[test]
    fn raw_flags_keep_known_bits() {
        let flags = SendProp::raw_flags((1 << 0) | (1 << 19) | (1 << 30));
        assert!(flags.contains(SendPropFlag::Unsigned));
        assert!(flags.contains(SendPropFlag::VarInt));
        assert_eq!(flags.len(), 2);
    }
}
