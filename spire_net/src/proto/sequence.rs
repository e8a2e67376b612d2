use std::fmt::{self, Display, Formatter};
use std::ops::{Add, AddAssign};

use bytes::{Buf, BufMut};

use super::{Decode, Encode};

/// A world sequence number.
///
/// World sequences count game ticks and double as the wire-level
/// packet/ack sequence. They grow monotonically and never wrap;
/// [`Sequence::NONE`] marks "nothing seen/acknowledged yet".
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Sequence(i32);

impl Sequence {
    pub const NONE: Self = Self(-1);

    #[inline]
    pub fn new(n: i32) -> Self {
        Self(n)
    }

    #[inline]
    pub fn to_bits(self) -> i32 {
        self.0
    }
}

impl Default for Sequence {
    #[inline]
    fn default() -> Self {
        Self::NONE
    }
}

impl Add<i32> for Sequence {
    type Output = Self;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<i32> for Sequence {
    #[inline]
    fn add_assign(&mut self, rhs: i32) {
        *self = *self + rhs;
    }
}

impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Encode for Sequence {
    type Error = <i32 as Encode>::Error;

    #[inline]
    fn encode<B>(&self, buf: B) -> Result<(), Self::Error>
    where
        B: BufMut,
    {
        self.0.encode(buf)
    }
}

impl Decode for Sequence {
    type Error = <i32 as Decode>::Error;

    #[inline]
    fn decode<B>(buf: B) -> Result<Self, Self::Error>
    where
        B: Buf,
    {
        i32::decode(buf).map(Self)
    }
}
