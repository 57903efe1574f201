use crate::schema::SendPropType;
use crate::parser::weapon::EquipmentElement;
use bitbuffer::BitError;
use thiserror::Error;

/// Failures that abort decoding of a demo.
///
/// Anything in here means the remaining bits can no longer be trusted, so
/// there is no attempt at recovery; the current tick produces no events.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported property type {kind:?} for {property}")]
    UnsupportedPropertyType {
        property: String,
        kind: SendPropType,
    },
    #[error("{property} claims {bits} bits, more than a value holds")]
    PropertyBitCount { property: String, bits: u32 },
    #[error("field index {index} out of range for {class} ({count} properties)")]
    FieldIndexOutOfRange {
        class: String,
        index: i32,
        count: usize,
    },
    #[error("unknown server class id {0}")]
    UnknownServerClass(u32),
    #[error("delta for unknown entity {0}")]
    UnknownEntity(u32),
    #[error("entity index {0} out of range")]
    EntityIndexOutOfRange(i64),
    #[error("unknown model {model:?} for {weapon:?}")]
    UnknownWeaponModel {
        weapon: EquipmentElement,
        model: String,
    },
    #[error("unexpected end of data")]
    EndOfData,
    #[error("malformed bit stream: {0}")]
    Bits(BitError),
    #[error("game event {event} is missing key {key}")]
    MissingEventKey { event: String, key: String },
    #[error("game event {event} key {key} has an unexpected type")]
    EventKeyType { event: String, key: String },
}

impl From<BitError> for ParseError {
    fn from(err: BitError) -> Self {
        match err {
            BitError::NotEnoughData { .. } => ParseError::EndOfData,
            err => ParseError::Bits(err),
        }
    }
}

impl ParseError {
    /// Errors raised while mapping a raw game event only cost that event.
    pub fn is_event_local(&self) -> bool {
        matches!(
            self,
            ParseError::MissingEventKey { .. } | ParseError::EventKeyType { .. }
        )
    }
}
