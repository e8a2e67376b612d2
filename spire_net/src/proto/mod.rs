//! The peer-to-peer replication protocol
//!
//! A packet is the payload transmitted over the link. It is never
//! greater than [`MTU`] bytes and always begins with a [`Header`]
//! carrying the sender's world sequence and the last world sequence it
//! accepted from the receiver.
//!
//! The header is followed by zero or more entity records:
//!
//! ```text
//! Packet       := Header EntityRecord*
//! Header       := sequence:i32 ack_sequence:i32
//! EntityRecord := entity_type:i32 replication_sequence:i32 changed:u8 payload:u8[N]
//! ```
//!
//! The payload is present only when `changed == 1`. Its length `N` is
//! not carried on the wire; both sides derive it from the entity type's
//! registered replicated component set.
//!
//! All integers are big-endian. Component payloads are copied verbatim
//! from the entity store, which stores them in an explicit fixed-endian
//! record format defined by the game.

pub mod sequence;

use std::convert::Infallible;

use bytes::{Buf, BufMut};
use thiserror::Error;

pub use sequence::Sequence;

/// The maximum size of a packet. Entities that do not fit are
/// excluded, never fragmented.
pub const MTU: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error(transparent)]
pub enum Error {
    UnexpectedEof(#[from] EofError),
    InvalidEntityType(#[from] InvalidEntityType),
}

impl From<Infallible> for Error {
    fn from(value: Infallible) -> Self {
        match value {}
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("unexpected eof: expected {expected} bytes, found {found}")]
pub struct EofError {
    pub expected: usize,
    pub found: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("invalid entity type: {0}")]
pub struct InvalidEntityType(pub i32);

pub trait Encode {
    type Error;

    fn encode<B>(&self, buf: B) -> Result<(), Self::Error>
    where
        B: BufMut;
}

pub trait Decode: Sized {
    type Error;

    fn decode<B>(buf: B) -> Result<Self, Self::Error>
    where
        B: Buf;
}

macro_rules! impl_primitive {
    ($($t:ty),*$(,)?) => {
        $(
            impl Encode for $t {
                type Error = Infallible;

                fn encode<B>(&self, mut buf: B) -> Result<(), Self::Error>
                where
                    B: BufMut,
                {
                    buf.put_slice(&self.to_be_bytes());
                    Ok(())
                }
            }

            impl Decode for $t {
                type Error = EofError;

                fn decode<B>(mut buf: B) -> Result<Self, Self::Error>
                where
                    B: Buf
                {
                    if buf.remaining() < std::mem::size_of::<Self>() {
                        return Err(EofError {
                            expected: std::mem::size_of::<Self>(),
                            found: buf.remaining(),
                        });
                    }

                    let mut bytes = [0; std::mem::size_of::<Self>()];
                    buf.copy_to_slice(&mut bytes);
                    Ok(Self::from_be_bytes(bytes))
                }
            }
        )*
    };
}

impl_primitive! { u8, u16, u32, u64, i8, i16, i32, i64, f32, f64 }

/// A small integer identifying an entity's replicated shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityTypeId(pub i32);

impl Encode for EntityTypeId {
    type Error = Infallible;

    #[inline]
    fn encode<B>(&self, buf: B) -> Result<(), Self::Error>
    where
        B: BufMut,
    {
        self.0.encode(buf)
    }
}

impl Decode for EntityTypeId {
    type Error = EofError;

    #[inline]
    fn decode<B>(buf: B) -> Result<Self, Self::Error>
    where
        B: Buf,
    {
        i32::decode(buf).map(Self)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// The sender's current world sequence.
    pub sequence: Sequence,
    /// The last world sequence the sender accepted from the receiver.
    pub ack_sequence: Sequence,
}

impl Header {
    pub const SIZE: usize = 8;
}

impl Encode for Header {
    type Error = Infallible;

    fn encode<B>(&self, mut buf: B) -> Result<(), Self::Error>
    where
        B: BufMut,
    {
        self.sequence.encode(&mut buf)?;
        self.ack_sequence.encode(&mut buf)?;
        Ok(())
    }
}

impl Decode for Header {
    type Error = EofError;

    fn decode<B>(mut buf: B) -> Result<Self, Self::Error>
    where
        B: Buf,
    {
        let sequence = Sequence::decode(&mut buf)?;
        let ack_sequence = Sequence::decode(&mut buf)?;
        Ok(Self {
            sequence,
            ack_sequence,
        })
    }
}

/// The fixed prefix of every entity record, both inside snapshots and
/// on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EntityRecordHeader {
    pub entity_type: EntityTypeId,
    /// The generation counter of the entity's spawn event on the
    /// sending side. Disambiguates entity slot reuse.
    pub replication_sequence: i32,
}

impl EntityRecordHeader {
    pub const SIZE: usize = 8;
}

impl Encode for EntityRecordHeader {
    type Error = Infallible;

    fn encode<B>(&self, mut buf: B) -> Result<(), Self::Error>
    where
        B: BufMut,
    {
        self.entity_type.encode(&mut buf)?;
        self.replication_sequence.encode(&mut buf)?;
        Ok(())
    }
}

impl Decode for EntityRecordHeader {
    type Error = EofError;

    fn decode<B>(mut buf: B) -> Result<Self, Self::Error>
    where
        B: Buf,
    {
        let entity_type = EntityTypeId::decode(&mut buf)?;
        let replication_sequence = i32::decode(&mut buf)?;
        Ok(Self {
            entity_type,
            replication_sequence,
        })
    }
}
